//! Store adapter interface
//!
//! The backing column store is an external collaborator; this crate only
//! depends on the keyed read/write contract below. The in-memory
//! implementation serves development, testing, and single-node use.

mod memory;

pub use memory::MemoryStore;

use crate::granularity::Granularity;
use crate::schedule::{SlotKey, SlotState};
use crate::shard::{Locator, Shard};
use crate::stats::{Rollup, Sample};
use crate::Result;
use async_trait::async_trait;
use std::ops::Range;

/// Half-open time range `[start, end)` in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }
}

impl From<Range<i64>> for TimeRange {
    fn from(range: Range<i64>) -> Self {
        Self::new(range.start, range.end)
    }
}

/// A persisted rollup point: bucket start time plus the aggregate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollupPoint {
    pub timestamp_ms: i64,
    pub rollup: Rollup,
}

/// Keyed time-series store interface.
///
/// Writes must be idempotent: re-rolling a slot overwrites the previous
/// rollup rather than appending. Implementations are responsible for their
/// own timeouts, surfacing them as [`crate::Error::Timeout`].
#[async_trait]
pub trait SeriesStore: Send + Sync {
    /// All locators with any data on a shard; the pipeline rolls each one.
    async fn locators(&self, shard: Shard) -> Result<Vec<Locator>>;

    /// Raw samples for a locator within a time range, timestamp-ordered.
    async fn read_samples(&self, locator: &Locator, range: TimeRange) -> Result<Vec<Sample>>;

    /// Persisted rollups for a locator at one granularity within a time
    /// range, bucket-ordered.
    async fn read_rollups(
        &self,
        locator: &Locator,
        granularity: Granularity,
        range: TimeRange,
    ) -> Result<Vec<RollupPoint>>;

    /// Persist one slot's rollup, overwriting any previous value.
    async fn write_rollup(
        &self,
        locator: &Locator,
        granularity: Granularity,
        slot: i64,
        rollup: &Rollup,
    ) -> Result<()>;

    /// Load the persisted slot states for a shard.
    async fn read_slot_states(&self, shard: Shard) -> Result<Vec<(SlotKey, SlotState)>>;

    /// Persist a shard's slot states, overwriting previous entries for the
    /// same keys.
    async fn write_slot_states(&self, shard: Shard, states: &[(SlotKey, SlotState)])
        -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_contains_half_open() {
        let range = TimeRange::new(100, 200);
        assert!(range.contains(100));
        assert!(range.contains(199));
        assert!(!range.contains(200));
        assert!(!range.contains(99));
        assert_eq!(range.duration_ms(), 100);
    }

    #[test]
    fn test_time_range_overlaps() {
        let a = TimeRange::new(0, 100);
        assert!(a.overlaps(&TimeRange::new(50, 150)));
        assert!(a.overlaps(&TimeRange::new(99, 100)));
        assert!(!a.overlaps(&TimeRange::new(100, 200)), "touching is not overlap");
        assert!(!a.overlaps(&TimeRange::new(-50, 0)));
    }

    #[test]
    fn test_time_range_from_std_range() {
        let range: TimeRange = (5..15).into();
        assert_eq!(range, TimeRange::new(5, 15));
    }
}
