//! In-memory series store for development and testing
//!
//! BTreeMaps keyed by timestamp (raw) and slot (rollups) give the range
//! scans the read paths need; the outer maps are concurrent so ingestion,
//! the pipeline, and queries can touch different locators freely.

use super::{RollupPoint, SeriesStore, TimeRange};
use crate::granularity::Granularity;
use crate::schedule::{SlotKey, SlotState};
use crate::shard::{Locator, Shard};
use crate::stats::{Rollup, Sample, SampleValue};
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Local in-memory store.
///
/// `fail_next_writes`/`fail_next_reads` inject transient store errors so
/// tests can exercise the pipeline's retry and exhaustion paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Raw samples per locator, keyed by timestamp
    samples: DashMap<Locator, BTreeMap<i64, Vec<SampleValue>>>,
    /// Rollups per (locator, granularity), keyed by slot number
    rollups: DashMap<(Locator, Granularity), BTreeMap<i64, Rollup>>,
    /// Persisted slot states
    slot_states: DashMap<SlotKey, SlotState>,
    fail_writes: AtomicU32,
    fail_reads: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one raw sample. Callers pair this with
    /// [`crate::schedule::ScheduleContext::notify_arrival`].
    pub fn add_sample(&self, locator: &Locator, timestamp_ms: i64, value: impl Into<SampleValue>) {
        self.samples
            .entry(locator.clone())
            .or_default()
            .entry(timestamp_ms)
            .or_default()
            .push(value.into());
    }

    /// Make the next `n` rollup writes fail with a transient store error.
    pub fn fail_next_writes(&self, n: u32) {
        self.fail_writes.store(n, Ordering::Release);
    }

    /// Make the next `n` reads fail with a transient store error.
    pub fn fail_next_reads(&self, n: u32) {
        self.fail_reads.store(n, Ordering::Release);
    }

    /// Drop a persisted rollup, simulating a gap for read-repair tests.
    pub fn remove_rollup(&self, locator: &Locator, granularity: Granularity, slot: i64) {
        if let Some(mut slots) = self.rollups.get_mut(&(locator.clone(), granularity)) {
            slots.remove(&slot);
        }
    }

    fn consume_failure(counter: &AtomicU32) -> Result<()> {
        let mut current = counter.load(Ordering::Acquire);
        while current > 0 {
            match counter.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Err(crate::Error::Store("injected transient failure".into())),
                Err(observed) => current = observed,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SeriesStore for MemoryStore {
    async fn locators(&self, shard: Shard) -> Result<Vec<Locator>> {
        Self::consume_failure(&self.fail_reads)?;
        let mut out: Vec<Locator> = self
            .samples
            .iter()
            .map(|e| e.key().clone())
            .chain(self.rollups.iter().map(|e| e.key().0.clone()))
            .filter(|locator| locator.shard() == shard)
            .collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    async fn read_samples(&self, locator: &Locator, range: TimeRange) -> Result<Vec<Sample>> {
        Self::consume_failure(&self.fail_reads)?;
        let Some(by_ts) = self.samples.get(locator) else {
            return Ok(Vec::new());
        };
        Ok(by_ts
            .range(range.start..range.end)
            .flat_map(|(&ts, values)| values.iter().map(move |&v| Sample::new(ts, v)))
            .collect())
    }

    async fn read_rollups(
        &self,
        locator: &Locator,
        granularity: Granularity,
        range: TimeRange,
    ) -> Result<Vec<RollupPoint>> {
        Self::consume_failure(&self.fail_reads)?;
        if range.end <= range.start {
            return Ok(Vec::new());
        }
        let Some(slots) = self.rollups.get(&(locator.clone(), granularity)) else {
            return Ok(Vec::new());
        };
        let first = granularity.slot_number(range.start);
        let last = granularity.slot_number(range.end - 1);
        Ok(slots
            .range(first..=last)
            .filter(|(&slot, _)| range.contains(granularity.bucket_range(slot).0))
            .map(|(&slot, rollup)| RollupPoint {
                timestamp_ms: granularity.bucket_range(slot).0,
                rollup: *rollup,
            })
            .collect())
    }

    async fn write_rollup(
        &self,
        locator: &Locator,
        granularity: Granularity,
        slot: i64,
        rollup: &Rollup,
    ) -> Result<()> {
        Self::consume_failure(&self.fail_writes)?;
        // Overwrite, never append: re-rolling a slot is idempotent
        self.rollups
            .entry((locator.clone(), granularity))
            .or_default()
            .insert(slot, *rollup);
        Ok(())
    }

    async fn read_slot_states(&self, shard: Shard) -> Result<Vec<(SlotKey, SlotState)>> {
        Self::consume_failure(&self.fail_reads)?;
        Ok(self
            .slot_states
            .iter()
            .filter(|e| e.key().shard == shard)
            .map(|e| (*e.key(), *e.value()))
            .collect())
    }

    async fn write_slot_states(
        &self,
        _shard: Shard,
        states: &[(SlotKey, SlotState)],
    ) -> Result<()> {
        Self::consume_failure(&self.fail_writes)?;
        for (key, state) in states {
            self.slot_states.insert(*key, *state);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator() -> Locator {
        Locator::new("acct.web01.cpu.user")
    }

    #[tokio::test]
    async fn test_sample_range_read() {
        let store = MemoryStore::new();
        let loc = locator();
        for ts in [100i64, 200, 300, 400] {
            store.add_sample(&loc, ts, ts);
        }
        let samples = store
            .read_samples(&loc, TimeRange::new(200, 400))
            .await
            .unwrap();
        let timestamps: Vec<i64> = samples.iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(timestamps, vec![200, 300], "half-open range scan");
    }

    #[tokio::test]
    async fn test_rollup_overwrite_is_idempotent() {
        let store = MemoryStore::new();
        let loc = locator();
        let g = Granularity::Min5;

        let samples = [Sample::new(0, 1i64), Sample::new(1, 3i64)];
        let first = Rollup::from_samples(&samples).unwrap();
        store.write_rollup(&loc, g, 0, &first).await.unwrap();
        store.write_rollup(&loc, g, 0, &first).await.unwrap();

        let points = store
            .read_rollups(&loc, g, TimeRange::new(0, g.duration_ms()))
            .await
            .unwrap();
        assert_eq!(points.len(), 1, "overwrite must not append");
        assert_eq!(points[0].rollup, first);
    }

    #[tokio::test]
    async fn test_locators_filtered_by_shard() {
        let store = MemoryStore::new();
        let loc = locator();
        store.add_sample(&loc, 0, 1i64);

        let found = store.locators(loc.shard()).await.unwrap();
        assert_eq!(found, vec![loc.clone()]);

        let other = Shard((loc.shard().0 + 1) % crate::shard::SHARD_COUNT);
        assert!(store.locators(other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let store = MemoryStore::new();
        let loc = locator();
        store.fail_next_reads(1);
        assert!(store.read_samples(&loc, TimeRange::new(0, 10)).await.is_err());
        assert!(store.read_samples(&loc, TimeRange::new(0, 10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_slot_state_round_trip() {
        let store = MemoryStore::new();
        let key = SlotKey::new(Shard(3), Granularity::Min5, 17);
        store
            .write_slot_states(Shard(3), &[(key, SlotState::Rolled)])
            .await
            .unwrap();
        let states = store.read_slot_states(Shard(3)).await.unwrap();
        assert_eq!(states, vec![(key, SlotState::Rolled)]);
        assert!(store.read_slot_states(Shard(4)).await.unwrap().is_empty());
    }
}
