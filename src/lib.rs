//! # Strata
//!
//! A clustered time-series rollup engine. Strata ingests arrival
//! notifications for raw samples keyed by hierarchical metric locators and
//! incrementally produces pre-aggregated statistics at successively
//! coarser time granularities (5m, 20m, 1h, 4h, 1d), so range queries over
//! long windows never scan raw samples.
//!
//! ## Architecture
//!
//! - **Granularity model**: ordered resolution levels with exact integer
//!   bucket math
//! - **Statistics engine**: numerically stable, mergeable accumulators
//!   (count, average, variance, min, max) behind one [`stats::Rollup`]
//!   type for both raw-sample builds and rollup-of-rollups merges
//! - **Shard lock coordinator**: lease-based exclusive shard locks so at
//!   most one process in the fleet rolls a shard at a time
//! - **Schedule context**: the per-slot ACTIVE/ROLLED state machine that
//!   queues delay-eligible rollup work, finest granularity first
//! - **Rollup pipeline**: bounded per-granularity worker pools that read
//!   finer data, aggregate, persist, and report back
//! - **Read-repair**: query-time synthesis of rollups the scheduler has
//!   not persisted yet

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod granularity;
pub mod pipeline;
pub mod repair;
pub mod schedule;
pub mod shard;
pub mod stats;
pub mod store;
pub mod telemetry;

mod error;

pub use error::{Error, Result};

/// Top-level configuration for a strata process.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Scheduling configuration
    pub schedule: schedule::ScheduleConfig,
    /// Pipeline configuration
    pub pipeline: pipeline::PipelineConfig,
}

impl Config {
    /// Build configuration from `STRATA_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            schedule: config::ComponentFactory::schedule_config()?,
            pipeline: config::ComponentFactory::pipeline_config()?,
        })
    }
}

/// Re-exports for convenience
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::coordinator::{
        InMemoryLockService, LockAttempt, LockService, ShardLock, ShardLockCoordinator,
    };
    pub use crate::granularity::Granularity;
    pub use crate::pipeline::{PipelineConfig, RollupPipeline};
    pub use crate::repair::read_with_repair;
    pub use crate::schedule::{ScheduleConfig, ScheduleContext, SlotKey, SlotState};
    pub use crate::shard::{Locator, Shard, ShardSet};
    pub use crate::stats::{Rollup, Sample, SampleValue};
    pub use crate::store::{MemoryStore, SeriesStore, TimeRange};
    pub use crate::{Config, Error, Result};
}
