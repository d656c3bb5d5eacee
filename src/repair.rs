//! Read-repair: rollup-on-read for buckets the scheduler has not reached
//!
//! Driven by query traffic, independent of the scheduler. When a range
//! read at granularity `g` comes up short of `to`, the missing buckets are
//! synthesized on the fly from `g`'s immediate finer neighbor using the
//! same builder the pipeline persists with, so both paths produce the same
//! rollup for the same inputs. Synthesized points are not persisted; the
//! scheduler will reach the bucket on its own.

use crate::granularity::Granularity;
use crate::pipeline::build_slot_rollup;
use crate::shard::Locator;
use crate::stats::Rollup;
use crate::store::{SeriesStore, TimeRange};
use crate::Result;
use tracing::{debug, warn};

/// A rollup point in a repaired read result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepairedPoint {
    pub timestamp_ms: i64,
    pub rollup: Rollup,
    /// True when the point was synthesized at read time rather than read
    /// from the store.
    pub synthesized: bool,
}

/// Read rollups for `[from, to)` at `granularity`, synthesizing any
/// missing tail buckets from the finer level.
///
/// `granularity` must be a rollup level; `Full` has no finer source and
/// fails with `NoFinerGranularity`. Buckets whose finer data is itself
/// missing or unreadable are skipped, never an error: the read path
/// degrades to best effort.
pub async fn read_with_repair(
    store: &dyn SeriesStore,
    locator: &Locator,
    granularity: Granularity,
    from_ms: i64,
    to_ms: i64,
) -> Result<Vec<RepairedPoint>> {
    granularity.finer()?;

    let range = TimeRange::new(from_ms, to_ms);
    let persisted = store.read_rollups(locator, granularity, range).await?;

    let mut points: Vec<RepairedPoint> = persisted
        .iter()
        .map(|p| RepairedPoint {
            timestamp_ms: p.timestamp_ms,
            rollup: p.rollup,
            synthesized: false,
        })
        .collect();

    // Latest covered bucket end; repair only applies when the result is a
    // full bucket or more short of the requested end.
    let duration = granularity.duration_ms();
    let latest_end = points
        .last()
        .map(|p| p.timestamp_ms + duration)
        .unwrap_or_else(|| granularity.bucket_start(from_ms));

    let mut bucket_start = latest_end.max(granularity.bucket_start(from_ms));
    if to_ms - bucket_start < duration {
        return Ok(points);
    }
    debug!(
        "Repairing {} from {} to {} for {}",
        granularity, bucket_start, to_ms, locator
    );

    while bucket_start + duration <= to_ms {
        let bucket = TimeRange::new(bucket_start, bucket_start + duration);
        match build_slot_rollup(store, locator, granularity, bucket).await {
            Ok(Some(rollup)) => points.push(RepairedPoint {
                timestamp_ms: bucket_start,
                rollup,
                synthesized: true,
            }),
            Ok(None) => {} // genuinely no data for this bucket
            Err(e) => {
                // Best effort: a failed bucket is a gap, not a query error
                warn!(
                    "Read-repair skipped bucket at {} for {}: {}",
                    bucket_start, locator, e
                );
            }
        }
        bucket_start += duration;
    }

    points.sort_by_key(|p| p.timestamp_ms);
    Ok(points)
}
