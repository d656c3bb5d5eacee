//! Granularity model: resolution levels and exact bucket math
//!
//! Defines the ordered set of rollup resolutions and the slot arithmetic
//! shared by the scheduler, the generation pipeline, and the read-repair
//! path. All bucket math is integer millisecond arithmetic so alignment is
//! bit-exact and idempotent under repeated computation.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A resolution level with a fixed bucket duration.
///
/// `Full` is raw samples; it shares the 5-minute slot width for scheduling
/// purposes but is never itself a rollup target. The remaining levels are
/// totally ordered finest to coarsest, and each level's bucket range exactly
/// contains an integer number of its finer neighbor's buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Granularity {
    /// Raw samples, bucketed in 5-minute slots for scheduling
    Full,
    /// 5-minute rollups
    Min5,
    /// 20-minute rollups
    Min20,
    /// 1-hour rollups
    Min60,
    /// 4-hour rollups
    Min240,
    /// 1-day rollups
    Min1440,
}

impl Granularity {
    /// All levels, finest first.
    pub const ALL: [Granularity; 6] = [
        Granularity::Full,
        Granularity::Min5,
        Granularity::Min20,
        Granularity::Min60,
        Granularity::Min240,
        Granularity::Min1440,
    ];

    /// Rollup target levels, finest first (everything but `Full`).
    pub const ROLLUP_LEVELS: [Granularity; 5] = [
        Granularity::Min5,
        Granularity::Min20,
        Granularity::Min60,
        Granularity::Min240,
        Granularity::Min1440,
    ];

    /// Bucket duration in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        match self {
            Granularity::Full => 300_000,
            Granularity::Min5 => 300_000,
            Granularity::Min20 => 1_200_000,
            Granularity::Min60 => 3_600_000,
            Granularity::Min240 => 14_400_000,
            Granularity::Min1440 => 86_400_000,
        }
    }

    /// Default retention hint for data stored at this level.
    pub fn ttl_hint(&self) -> Duration {
        const DAY: u64 = 86_400;
        match self {
            Granularity::Full => Duration::from_secs(2 * DAY),
            Granularity::Min5 => Duration::from_secs(7 * DAY),
            Granularity::Min20 => Duration::from_secs(14 * DAY),
            Granularity::Min60 => Duration::from_secs(30 * DAY),
            Granularity::Min240 => Duration::from_secs(90 * DAY),
            Granularity::Min1440 => Duration::from_secs(365 * DAY),
        }
    }

    /// Short stable name, used in slot-key string forms and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Full => "full",
            Granularity::Min5 => "5m",
            Granularity::Min20 => "20m",
            Granularity::Min60 => "60m",
            Granularity::Min240 => "240m",
            Granularity::Min1440 => "1440m",
        }
    }

    /// Parse the short name produced by [`Granularity::as_str`].
    pub fn from_str_name(s: &str) -> Option<Granularity> {
        Granularity::ALL.iter().copied().find(|g| g.as_str() == s)
    }

    /// The next coarser level, or `NoCoarserGranularity` at the coarsest.
    pub fn coarser(&self) -> Result<Granularity> {
        let idx = self.index();
        Granularity::ALL
            .get(idx + 1)
            .copied()
            .ok_or(Error::NoCoarserGranularity(*self))
    }

    /// The next finer level, or `NoFinerGranularity` at `Full`.
    pub fn finer(&self) -> Result<Granularity> {
        let idx = self.index();
        if idx == 0 {
            return Err(Error::NoFinerGranularity(*self));
        }
        Ok(Granularity::ALL[idx - 1])
    }

    /// How many finer-neighbor buckets compose one bucket of this level.
    ///
    /// Exact by construction: every duration in the table divides its
    /// coarser neighbor's duration.
    pub fn child_count(&self) -> Result<i64> {
        let finer = self.finer()?;
        Ok(self.duration_ms() / finer.duration_ms())
    }

    /// Start of the bucket containing `ts_ms`, floored toward negative
    /// infinity so alignment holds for pre-epoch timestamps too.
    pub fn bucket_start(&self, ts_ms: i64) -> i64 {
        ts_ms.div_euclid(self.duration_ms()) * self.duration_ms()
    }

    /// Slot number of the bucket containing `ts_ms`.
    pub fn slot_number(&self, ts_ms: i64) -> i64 {
        ts_ms.div_euclid(self.duration_ms())
    }

    /// Half-open time range `[start, end)` of the given slot.
    pub fn bucket_range(&self, slot: i64) -> (i64, i64) {
        let start = slot * self.duration_ms();
        (start, start + self.duration_ms())
    }

    /// Whether this level is a rollup target (everything but `Full`).
    pub fn is_rollup_level(&self) -> bool {
        *self != Granularity::Full
    }

    fn index(&self) -> usize {
        Granularity::ALL
            .iter()
            .position(|g| g == self)
            .expect("granularity present in its own table")
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Select the finest granularity whose bucket count over `[from, to)` does
/// not exceed `desired_points`.
///
/// Degrades to the coarsest level when even a 1-day resolution produces more
/// points than requested; callers asked for "at most N points, best effort".
pub fn granularity_for_point_count(from_ms: i64, to_ms: i64, desired_points: i64) -> Granularity {
    let span = (to_ms - from_ms).max(0);
    for g in Granularity::ALL {
        let points = span.div_euclid(g.duration_ms())
            + if span.rem_euclid(g.duration_ms()) > 0 { 1 } else { 0 };
        if points <= desired_points {
            return g;
        }
    }
    Granularity::Min1440
}
