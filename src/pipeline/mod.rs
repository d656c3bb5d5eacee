//! Rollup generation pipeline
//!
//! Dequeues ready slot keys from the schedule context, reads the finer
//! granularity's data for each slot's range, computes or merges a rollup,
//! persists it, and reports the transition back. Work runs on bounded
//! per-granularity worker pools; store failures are retried with backoff
//! and exhaustion leaves the slot active for a later pass rather than
//! silently losing data.

use crate::granularity::Granularity;
use crate::schedule::{ScheduleContext, SlotKey, SlotState};
use crate::shard::Locator;
use crate::stats::Rollup;
use crate::store::{SeriesStore, TimeRange};
use crate::telemetry::{self, RollupOutcome};
use crate::{Error, Result};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Scheduling poll cadence
    pub check_interval: Duration,
    /// Per-slot store retry budget
    pub max_retries: u32,
    /// Initial retry backoff; doubles per attempt
    pub retry_backoff: Duration,
    /// Worker pool size per granularity. Coarser levels are rarer but each
    /// unit spans more finer data, so sizing is a tunable, not a ratio.
    pub workers: HashMap<Granularity, usize>,
}

impl PipelineConfig {
    pub fn workers_for(&self, granularity: Granularity) -> usize {
        self.workers.get(&granularity).copied().unwrap_or(2).max(1)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let workers = HashMap::from([
            (Granularity::Min5, 8),
            (Granularity::Min20, 4),
            (Granularity::Min60, 2),
            (Granularity::Min240, 2),
            (Granularity::Min1440, 1),
        ]);
        Self {
            check_interval: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
            workers,
        }
    }
}

/// Retry policy threaded into spawned workers.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
}

/// Build one slot's rollup from the next-finer granularity's data.
///
/// Raw samples when the finer level is `Full`, child rollups otherwise.
/// `Ok(None)` means no finer data exists for the range; data absence is
/// not an error. Shared with the read-repair path, which must produce
/// field-for-field the same rollup the scheduler would persist.
pub async fn build_slot_rollup(
    store: &dyn SeriesStore,
    locator: &Locator,
    granularity: Granularity,
    range: TimeRange,
) -> Result<Option<Rollup>> {
    let finer = granularity.finer()?;
    if finer == Granularity::Full {
        let samples = store.read_samples(locator, range).await?;
        Ok(Rollup::from_samples(&samples))
    } else {
        let children = store.read_rollups(locator, finer, range).await?;
        Ok(Rollup::from_children(children.iter().map(|p| &p.rollup)))
    }
}

/// The rollup worker service.
pub struct RollupPipeline {
    config: PipelineConfig,
    store: Arc<dyn SeriesStore>,
    context: Arc<ScheduleContext>,
    pools: HashMap<Granularity, Arc<Semaphore>>,
    shutdown: CancellationToken,
}

impl RollupPipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn SeriesStore>,
        context: Arc<ScheduleContext>,
    ) -> Self {
        let pools = Granularity::ROLLUP_LEVELS
            .into_iter()
            .map(|g| (g, Arc::new(Semaphore::new(config.workers_for(g)))))
            .collect();
        Self {
            config,
            store,
            context,
            pools,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token used to trigger graceful shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Seed the schedule context from persisted slot states so a restarted
    /// process resumes where its predecessor stopped.
    pub async fn hydrate_from_store(&self) -> Result<()> {
        for shard in self.context.managed_shards().iter() {
            let states = self.store.read_slot_states(shard).await?;
            if !states.is_empty() {
                debug!("Hydrated {} slot states for shard {}", states.len(), shard);
            }
            self.context.hydrate(states);
        }
        Ok(())
    }

    /// Run the service loop until the shutdown token is cancelled.
    /// In-flight units finish before the loop exits; held shard locks are
    /// released on the way out.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.config.check_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
                _ = self.shutdown.cancelled() => {
                    info!("Rollup pipeline shutting down gracefully");
                    break;
                }
            }
        }
        self.context.coordinator().release_all().await;
    }

    /// One scheduling pass: advance the clock, refresh locks, drain the
    /// ready queue, wait for the dispatched work to settle, persist slot
    /// state.
    pub async fn run_cycle(&self) {
        self.context.tick_from_clock();
        self.context.acquire_managed_locks().await;
        self.context.coordinator().renew_held().await;

        let ready = self.context.get_ready_slots();
        telemetry::record_queue_depth(ready.len() as u64);
        if ready.is_empty() {
            return;
        }
        debug!("Dispatching {} ready slots", ready.len());

        let policy = RetryPolicy {
            max_retries: self.config.max_retries,
            initial_backoff: self.config.retry_backoff,
        };

        // The ready queue is sorted finest granularity first. Each level is
        // drained to completion before the next starts, so a 20m rollup in
        // this cycle sees the 5m rollups this cycle just wrote.
        for granularity in Granularity::ROLLUP_LEVELS {
            let level: Vec<SlotKey> = ready
                .iter()
                .copied()
                .filter(|key| key.granularity == granularity)
                .collect();
            if level.is_empty() {
                continue;
            }
            let pool = match self.pools.get(&granularity) {
                Some(pool) => Arc::clone(pool),
                None => {
                    // FULL is never queued; a missing pool is a broken table
                    error!("No worker pool for granularity {}", granularity);
                    for key in level {
                        self.context.fail(key);
                    }
                    continue;
                }
            };
            let mut workers = JoinSet::new();
            for key in level {
                let pool = Arc::clone(&pool);
                let store = Arc::clone(&self.store);
                let context = Arc::clone(&self.context);
                workers.spawn(async move {
                    let permit = match pool.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            context.fail(key);
                            return;
                        }
                    };
                    roll_slot(store, context, policy, key).await;
                    drop(permit);
                });
            }
            while workers.join_next().await.is_some() {}
        }

        self.persist_slot_states().await;
    }

    /// Persist each held shard's slot states; best effort, the next cycle
    /// tries again.
    async fn persist_slot_states(&self) {
        for shard in self.context.coordinator().held_shards().iter() {
            let snapshot = self.context.snapshot_shard(shard);
            if snapshot.is_empty() {
                continue;
            }
            if let Err(e) = self.store.write_slot_states(shard, &snapshot).await {
                warn!("Failed to persist slot states for shard {}: {}", shard, e);
            }
        }
    }
}

/// Process one dequeued slot end to end and report the transition.
async fn roll_slot(
    store: Arc<dyn SeriesStore>,
    context: Arc<ScheduleContext>,
    policy: RetryPolicy,
    key: SlotKey,
) {
    let started = Instant::now();
    match roll_slot_inner(store.as_ref(), policy, key).await {
        Ok(wrote_any) => {
            let state = context.complete(key);
            if state == SlotState::Active {
                debug!("Slot {} re-activated during rollup", key);
            }
            let outcome = if wrote_any {
                RollupOutcome::Ok
            } else {
                RollupOutcome::Empty
            };
            telemetry::record_rollup_outcome(key.granularity, outcome);
        }
        Err(e) => {
            warn!("Rollup failed for slot {}: {}", key, e);
            context.fail(key);
            telemetry::record_rollup_outcome(key.granularity, RollupOutcome::Failed);
        }
    }
    telemetry::record_rollup_duration(key.granularity, started.elapsed());
}

/// Returns whether any rollup was written. An empty slot (no finer data
/// for any locator) returns `Ok(false)` and still counts as rolled.
async fn roll_slot_inner(store: &dyn SeriesStore, policy: RetryPolicy, key: SlotKey) -> Result<bool> {
    let (start, end) = key.time_range();
    let range = TimeRange::new(start, end);

    let locators = with_retries(policy, || store.locators(key.shard)).await?;

    let mut wrote_any = false;
    for locator in &locators {
        let rollup = with_retries(policy, || {
            build_slot_rollup(store, locator, key.granularity, range)
        })
        .await?;
        let Some(rollup) = rollup else {
            continue;
        };
        with_retries(policy, || {
            store.write_rollup(locator, key.granularity, key.slot, &rollup)
        })
        .await?;
        wrote_any = true;
    }
    Ok(wrote_any)
}

fn is_transient(error: &Error) -> bool {
    matches!(error, Error::Store(_) | Error::Timeout)
}

/// Retry a store operation with exponential backoff. Only transient
/// errors are retried; exhaustion surfaces as `TooManyRetries`.
async fn with_retries<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) && attempt < policy.max_retries => {
                attempt += 1;
                debug!(
                    "Transient store error (attempt {}/{}): {}",
                    attempt, policy.max_retries, e
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) if is_transient(&e) => {
                warn!("Retry budget exhausted after {} attempts: {}", attempt, e);
                return Err(Error::TooManyRetries);
            }
            Err(e) => return Err(e),
        }
    }
}
