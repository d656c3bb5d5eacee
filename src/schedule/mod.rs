//! Schedule context: the per-process rollup scheduling state machine
//!
//! Tracks, per (shard, granularity, slot), whether data has arrived and
//! whether it has been rolled, and produces the prioritized queue of
//! rollup-ready work. Slot state is the only shared mutable structure and
//! lives in a concurrent map with compare-and-set transitions: a ROLLED
//! write from a finishing worker loses to a concurrent ACTIVE re-mark from
//! late-arriving data.

mod slot;

pub use slot::{SlotKey, SlotState};

use crate::clock::Clock;
use crate::coordinator::ShardLockCoordinator;
use crate::granularity::Granularity;
use crate::shard::{Shard, ShardSet};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Scheduling configuration.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Minimum age a bucket must reach past its end before it is eligible
    /// for rollup, to tolerate late-arriving data.
    pub rollup_delay_ms: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            rollup_delay_ms: 300_000, // one full 5-minute bucket of slack
        }
    }
}

/// Work counters exposed for observability and backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkCounters {
    pub queued: u64,
    pub in_flight: u64,
    pub completed: u64,
}

#[derive(Debug, Clone, Copy)]
struct SlotEntry {
    state: SlotState,
    /// Bumped on every ACTIVE re-mark; lets a finishing worker detect that
    /// late data arrived while it was rolling.
    epoch: u64,
}

/// Process-local scheduling state machine.
///
/// `notify_arrival` is safe to call from many ingestion threads
/// concurrently with `tick` and `get_ready_slots`.
pub struct ScheduleContext {
    clock: Arc<dyn Clock>,
    config: ScheduleConfig,
    coordinator: Arc<ShardLockCoordinator>,
    managed: RwLock<ShardSet>,
    slots: DashMap<SlotKey, SlotEntry>,
    /// Slots dequeued by the pipeline, mapped to the epoch they were
    /// dequeued at. Present here means "do not offer again".
    in_flight: DashMap<SlotKey, u64>,
    now_ms: AtomicI64,
    queued: AtomicU64,
    completed: AtomicU64,
}

impl ScheduleContext {
    pub fn new(
        clock: Arc<dyn Clock>,
        config: ScheduleConfig,
        coordinator: Arc<ShardLockCoordinator>,
        initial_shards: ShardSet,
    ) -> Self {
        let start = clock.now_ms();
        Self {
            clock,
            config,
            coordinator,
            managed: RwLock::new(initial_shards),
            slots: DashMap::new(),
            in_flight: DashMap::new(),
            now_ms: AtomicI64::new(start),
            queued: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        }
    }

    /// Record that a raw sample landed at `ts_ms` on a shard.
    ///
    /// Marks the covering slot ACTIVE at every rollup granularity.
    /// Arrivals for unmanaged shards are ignored; ingestion for those
    /// shards is some other process's scheduling problem.
    pub fn notify_arrival(&self, shard: Shard, ts_ms: i64) {
        if !self.managed.read().contains(shard) {
            debug!("Ignoring arrival for unmanaged shard {}", shard);
            return;
        }
        for granularity in Granularity::ROLLUP_LEVELS {
            let key = SlotKey::containing(shard, granularity, ts_ms);
            self.slots
                .entry(key)
                .and_modify(|entry| {
                    entry.state = SlotState::Active;
                    entry.epoch += 1;
                })
                .or_insert(SlotEntry {
                    state: SlotState::Active,
                    epoch: 0,
                });
        }
    }

    /// Advance the scheduler's notion of "now". Never moves backward.
    pub fn tick(&self, now_ms: i64) {
        self.now_ms.fetch_max(now_ms, Ordering::AcqRel);
    }

    /// Advance the clock from the injected source.
    pub fn tick_from_clock(&self) {
        self.tick(self.clock.now_ms());
    }

    pub fn current_time_ms(&self) -> i64 {
        self.now_ms.load(Ordering::Acquire)
    }

    /// Every ACTIVE slot on a lock-held managed shard whose delay window
    /// has elapsed, finest granularity first, oldest bucket first.
    ///
    /// Returned slots move to the in-flight set and are not offered again
    /// until the pipeline reports [`ScheduleContext::complete`] or
    /// [`ScheduleContext::fail`]; a slot re-marked by late data while in
    /// flight stays ACTIVE through its completion and is offered afresh on
    /// the next pass.
    pub fn get_ready_slots(&self) -> Vec<SlotKey> {
        let now = self.current_time_ms();
        let managed = self.managed.read().clone();

        let mut ready: Vec<(SlotKey, u64)> = self
            .slots
            .iter()
            .filter(|entry| {
                let key = *entry.key();
                entry.state == SlotState::Active
                    && managed.contains(key.shard)
                    && self.coordinator.held(key.shard)
                    && key.bucket_end() + self.config.rollup_delay_ms <= now
                    && !self.in_flight.contains_key(&key)
            })
            .map(|entry| (*entry.key(), entry.epoch))
            .collect();

        // Finest granularity first so a 5m rollup lands before the 20m
        // rollup that depends on it; oldest bucket first within a level.
        ready.sort_by_key(|(key, _)| (key.granularity, key.slot, key.shard));

        // Claim through the entry API so concurrent callers can never hand
        // out the same slot twice; a slot another caller claimed between
        // the scan and here is simply theirs.
        let mut claimed = Vec::with_capacity(ready.len());
        for (key, epoch) in ready {
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.in_flight.entry(key) {
                slot.insert(epoch);
                claimed.push(key);
            }
        }
        self.queued.store(claimed.len() as u64, Ordering::Release);
        claimed
    }

    /// Pipeline reports a successful rollup for a dequeued slot.
    ///
    /// Transitions the slot to ROLLED unless late data re-marked it while
    /// the worker was running, in which case ACTIVE wins and the slot is
    /// re-offered after the delay window. Returns the slot's state after
    /// the transition. Completing a key that was never dequeued is a
    /// no-op: state and counters are left untouched.
    pub fn complete(&self, key: SlotKey) -> SlotState {
        let Some((_, dequeued_epoch)) = self.in_flight.remove(&key) else {
            // Not a slot we handed out; leave state and counters alone
            return self.slot_state(key).unwrap_or(SlotState::Active);
        };
        self.completed.fetch_add(1, Ordering::Relaxed);

        let mut result = SlotState::Active;
        self.slots.alter(&key, |_, entry| {
            if entry.epoch == dequeued_epoch {
                result = SlotState::Rolled;
                SlotEntry {
                    state: SlotState::Rolled,
                    ..entry
                }
            } else {
                debug!("Slot {} re-marked during rollup, staying active", key);
                entry
            }
        });
        result
    }

    /// Pipeline reports a failed rollup; the slot stays ACTIVE and becomes
    /// eligible again on a later scheduling pass.
    pub fn fail(&self, key: SlotKey) {
        self.in_flight.remove(&key);
    }

    /// Current state of a slot; `None` means UNSEEN.
    pub fn slot_state(&self, key: SlotKey) -> Option<SlotState> {
        self.slots.get(&key).map(|entry| entry.state)
    }

    /// Seed slot state from a persisted snapshot at startup.
    pub fn hydrate(&self, states: impl IntoIterator<Item = (SlotKey, SlotState)>) {
        for (key, state) in states {
            self.slots
                .entry(key)
                .or_insert(SlotEntry { state, epoch: 0 });
        }
    }

    /// Snapshot of one shard's slot states, for persistence.
    pub fn snapshot_shard(&self, shard: Shard) -> Vec<(SlotKey, SlotState)> {
        self.slots
            .iter()
            .filter(|entry| entry.key().shard == shard)
            .map(|entry| (*entry.key(), entry.state))
            .collect()
    }

    /// Add a shard to the managed set and attempt its lock.
    ///
    /// A `Busy` or failed acquisition leaves the shard managed but
    /// unheld; the pipeline re-attempts each cycle.
    pub async fn add_shard(&self, shard: Shard) {
        let inserted = self.managed.write().insert(shard);
        if inserted {
            info!("Now managing shard {}", shard);
        }
        // Failure already logged and counted by the coordinator
        let _ = self.coordinator.acquire_shard(shard).await;
    }

    /// Remove a shard from the managed set, dropping its slot state and
    /// releasing its lock.
    pub async fn remove_shard(&self, shard: Shard) {
        let removed = self.managed.write().remove(shard);
        if removed {
            info!("No longer managing shard {}", shard);
        }
        self.slots.retain(|key, _| key.shard != shard);
        self.in_flight.retain(|key, _| key.shard != shard);
        if let Err(e) = self.coordinator.release_shard(shard).await {
            tracing::warn!("Failed to release lock for removed shard {}: {}", shard, e);
        }
    }

    /// Attempt lock acquisition for every managed-but-unheld shard.
    /// Called once per scheduling cycle, off the ingestion hot path.
    pub async fn acquire_managed_locks(&self) {
        let managed = self.managed.read().clone();
        for shard in managed.iter() {
            if !self.coordinator.held(shard) {
                // Busy and service failure both leave the shard unheld
                let _ = self.coordinator.acquire_shard(shard).await;
            }
        }
    }

    pub fn managed_shards(&self) -> ShardSet {
        self.managed.read().clone()
    }

    pub fn coordinator(&self) -> &Arc<ShardLockCoordinator> {
        &self.coordinator
    }

    pub fn counters(&self) -> WorkCounters {
        WorkCounters {
            queued: self.queued.load(Ordering::Acquire),
            in_flight: self.in_flight.len() as u64,
            completed: self.completed.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::coordinator::{InMemoryLockService, LockService};
    use std::time::Duration;

    const HOUR: i64 = 3_600_000;

    async fn context(start_ms: i64, shards: &[u32]) -> (Arc<ManualClock>, ScheduleContext) {
        let clock = Arc::new(ManualClock::new(start_ms));
        let coordinator = Arc::new(ShardLockCoordinator::new(
            Arc::new(InMemoryLockService::new()),
            "test-node",
            Duration::from_secs(300),
        ));
        let ctx = ScheduleContext::new(
            clock.clone(),
            ScheduleConfig::default(),
            coordinator,
            shards.iter().copied().collect(),
        );
        ctx.acquire_managed_locks().await;
        (clock, ctx)
    }

    #[tokio::test]
    async fn test_arrival_marks_all_rollup_levels() {
        let (_, ctx) = context(0, &[1]).await;
        ctx.notify_arrival(Shard(1), 100_000);
        for g in Granularity::ROLLUP_LEVELS {
            let key = SlotKey::containing(Shard(1), g, 100_000);
            assert_eq!(ctx.slot_state(key), Some(SlotState::Active), "{}", g);
        }
        // FULL is never a rollup target
        let full = SlotKey::containing(Shard(1), Granularity::Full, 100_000);
        assert_eq!(ctx.slot_state(full), None);
    }

    #[tokio::test]
    async fn test_unmanaged_arrival_ignored() {
        let (_, ctx) = context(0, &[1]).await;
        ctx.notify_arrival(Shard(2), 100_000);
        let key = SlotKey::containing(Shard(2), Granularity::Min5, 100_000);
        assert_eq!(ctx.slot_state(key), None);
    }

    #[tokio::test]
    async fn test_ready_respects_delay_window() {
        let (_, ctx) = context(0, &[1]).await;
        ctx.notify_arrival(Shard(1), 10_000);

        // Just past the 5m bucket end, but inside the delay window
        ctx.tick(300_000 + 100);
        assert!(ctx.get_ready_slots().is_empty());

        // Past bucket end + delay: the 5m slot (and only it) is ready
        ctx.tick(600_000);
        let ready = ctx.get_ready_slots();
        assert_eq!(
            ready,
            vec![SlotKey::containing(Shard(1), Granularity::Min5, 10_000)]
        );
    }

    #[tokio::test]
    async fn test_ready_ordering_finest_first_oldest_first() {
        let (_, ctx) = context(0, &[1]).await;
        ctx.notify_arrival(Shard(1), 0);
        ctx.notify_arrival(Shard(1), 300_000);
        ctx.notify_arrival(Shard(1), 1_200_000);

        // Far enough out that every level's delay has elapsed
        ctx.tick(3 * 86_400_000);
        let ready = ctx.get_ready_slots();

        let granularities: Vec<Granularity> = ready.iter().map(|k| k.granularity).collect();
        let mut sorted = granularities.clone();
        sorted.sort();
        assert_eq!(granularities, sorted, "finest granularity first");

        let min5_slots: Vec<i64> = ready
            .iter()
            .filter(|k| k.granularity == Granularity::Min5)
            .map(|k| k.slot)
            .collect();
        assert_eq!(min5_slots, vec![0, 1, 4], "oldest bucket first");
    }

    #[tokio::test]
    async fn test_dequeued_slot_not_reoffered_until_fail() {
        let (_, ctx) = context(0, &[1]).await;
        ctx.notify_arrival(Shard(1), 0);
        ctx.tick(HOUR);

        let first = ctx.get_ready_slots();
        let key = SlotKey::containing(Shard(1), Granularity::Min5, 0);
        assert!(first.contains(&key));

        // Still active and eligible, but in flight
        assert!(!ctx.get_ready_slots().contains(&key));

        ctx.fail(key);
        assert!(ctx.get_ready_slots().contains(&key));
    }

    #[tokio::test]
    async fn test_complete_of_undequeued_slot_is_inert() {
        let (_, ctx) = context(0, &[1]).await;
        ctx.notify_arrival(Shard(1), 0);

        // Never dequeued: completion must not transition or count
        let key = SlotKey::containing(Shard(1), Granularity::Min5, 0);
        assert_eq!(ctx.complete(key), SlotState::Active);
        assert_eq!(ctx.slot_state(key), Some(SlotState::Active));
        assert_eq!(ctx.counters().completed, 0);
    }

    #[tokio::test]
    async fn test_concurrent_dequeues_claim_disjoint_slots() {
        let (_, ctx) = context(0, &[1]).await;
        for i in 0..16i64 {
            ctx.notify_arrival(Shard(1), i * 300_000);
        }
        ctx.tick(3 * 86_400_000);

        let ctx = Arc::new(ctx);
        let a = {
            let ctx = ctx.clone();
            std::thread::spawn(move || ctx.get_ready_slots())
        };
        let b = {
            let ctx = ctx.clone();
            std::thread::spawn(move || ctx.get_ready_slots())
        };
        let a = a.join().unwrap();
        let b = b.join().unwrap();

        for key in &a {
            assert!(!b.contains(key), "slot {} handed out twice", key);
        }
        let min5 = |v: &[SlotKey]| {
            v.iter()
                .filter(|k| k.granularity == Granularity::Min5)
                .count()
        };
        assert_eq!(min5(&a) + min5(&b), 16, "every 5m slot claimed exactly once");
    }

    #[tokio::test]
    async fn test_complete_transitions_to_rolled() {
        let (_, ctx) = context(0, &[1]).await;
        ctx.notify_arrival(Shard(1), 0);
        ctx.tick(HOUR);

        let key = SlotKey::containing(Shard(1), Granularity::Min5, 0);
        assert!(ctx.get_ready_slots().contains(&key));
        assert_eq!(ctx.complete(key), SlotState::Rolled);
        assert_eq!(ctx.slot_state(key), Some(SlotState::Rolled));
        assert!(!ctx.get_ready_slots().contains(&key));
        assert_eq!(ctx.counters().completed, 1);
    }

    #[tokio::test]
    async fn test_late_data_reactivates_rolled_slot() {
        let (_, ctx) = context(0, &[1]).await;
        ctx.notify_arrival(Shard(1), 0);
        ctx.tick(HOUR);

        let key = SlotKey::containing(Shard(1), Granularity::Min5, 0);
        ctx.get_ready_slots();
        ctx.complete(key);
        assert_eq!(ctx.slot_state(key), Some(SlotState::Rolled));

        // Backfilled write inside the rolled bucket
        ctx.notify_arrival(Shard(1), 60_000);
        assert_eq!(ctx.slot_state(key), Some(SlotState::Active));
        assert!(ctx.get_ready_slots().contains(&key));
    }

    #[tokio::test]
    async fn test_remark_during_rollup_wins_over_rolled() {
        let (_, ctx) = context(0, &[1]).await;
        ctx.notify_arrival(Shard(1), 0);
        ctx.tick(HOUR);

        let key = SlotKey::containing(Shard(1), Granularity::Min5, 0);
        ctx.get_ready_slots();
        // Late data lands while the worker is rolling
        ctx.notify_arrival(Shard(1), 120_000);
        assert_eq!(ctx.complete(key), SlotState::Active);
        assert_eq!(ctx.slot_state(key), Some(SlotState::Active));
    }

    #[tokio::test]
    async fn test_remove_shard_drops_state() {
        let (_, ctx) = context(0, &[1, 2]).await;
        ctx.notify_arrival(Shard(1), 0);
        ctx.notify_arrival(Shard(2), 0);
        ctx.remove_shard(Shard(1)).await;

        let key = SlotKey::containing(Shard(1), Granularity::Min5, 0);
        assert_eq!(ctx.slot_state(key), None);
        assert!(!ctx.coordinator().held(Shard(1)));

        ctx.tick(HOUR);
        assert!(ctx.get_ready_slots().iter().all(|k| k.shard == Shard(2)));
    }

    #[tokio::test]
    async fn test_unheld_shard_not_offered() {
        // Another process holds shard 1's lock
        let other = Arc::new(InMemoryLockService::new());
        other
            .acquire(Shard(1), "other-node", Duration::from_secs(300))
            .await
            .unwrap();

        let clock = Arc::new(ManualClock::new(0));
        let coordinator = Arc::new(ShardLockCoordinator::new(
            other.clone(),
            "test-node",
            Duration::from_secs(300),
        ));
        let ctx = ScheduleContext::new(
            clock,
            ScheduleConfig::default(),
            coordinator,
            [1u32].into_iter().collect(),
        );
        ctx.acquire_managed_locks().await;

        ctx.notify_arrival(Shard(1), 0);
        ctx.tick(HOUR);
        assert!(
            ctx.get_ready_slots().is_empty(),
            "busy shard must be skipped"
        );
    }

    #[tokio::test]
    async fn test_hydrate_and_snapshot() {
        let (_, ctx) = context(0, &[1]).await;
        let rolled = SlotKey::containing(Shard(1), Granularity::Min5, 0);
        let active = SlotKey::containing(Shard(1), Granularity::Min5, 300_000);
        ctx.hydrate([(rolled, SlotState::Rolled), (active, SlotState::Active)]);

        assert_eq!(ctx.slot_state(rolled), Some(SlotState::Rolled));
        assert_eq!(ctx.slot_state(active), Some(SlotState::Active));

        let mut snapshot = ctx.snapshot_shard(Shard(1));
        snapshot.sort_by_key(|(k, _)| *k);
        assert_eq!(
            snapshot,
            vec![(rolled, SlotState::Rolled), (active, SlotState::Active)]
        );
    }
}
