//! Environment-based configuration factory
//!
//! Builds component configs from `STRATA_*` environment variables so
//! deployments switch behavior without code changes. Unset variables fall
//! back to the component defaults.

use crate::granularity::Granularity;
use crate::pipeline::PipelineConfig;
use crate::schedule::ScheduleConfig;
use crate::shard::{Shard, ShardSet, SHARD_COUNT};
use crate::{Error, Result};
use std::time::Duration;
use tracing::info;

pub struct ComponentFactory;

impl ComponentFactory {
    /// Scheduling configuration.
    ///
    /// - `STRATA_ROLLUP_DELAY_MS`: minimum bucket age before rollup
    ///   eligibility (default 300000)
    pub fn schedule_config() -> Result<ScheduleConfig> {
        let mut config = ScheduleConfig::default();
        if let Some(delay) = parse_env_i64("STRATA_ROLLUP_DELAY_MS")? {
            if delay < 0 {
                return Err(Error::Config(format!(
                    "STRATA_ROLLUP_DELAY_MS must be >= 0, got {}",
                    delay
                )));
            }
            config.rollup_delay_ms = delay;
        }
        Ok(config)
    }

    /// Pipeline configuration.
    ///
    /// - `STRATA_CHECK_INTERVAL_MS`: scheduling poll cadence (default 30000)
    /// - `STRATA_MAX_RETRIES`: per-slot store retry budget (default 3)
    /// - `STRATA_RETRY_BACKOFF_MS`: initial retry backoff (default 100)
    /// - `STRATA_WORKERS_<GRAN>` (e.g. `STRATA_WORKERS_5M`): worker pool
    ///   size for one granularity
    pub fn pipeline_config() -> Result<PipelineConfig> {
        let mut config = PipelineConfig::default();
        if let Some(interval) = parse_env_i64("STRATA_CHECK_INTERVAL_MS")? {
            if interval <= 0 {
                return Err(Error::Config(format!(
                    "STRATA_CHECK_INTERVAL_MS must be > 0, got {}",
                    interval
                )));
            }
            config.check_interval = Duration::from_millis(interval as u64);
        }
        if let Some(retries) = parse_env_i64("STRATA_MAX_RETRIES")? {
            if !(0..=100).contains(&retries) {
                return Err(Error::Config(format!(
                    "STRATA_MAX_RETRIES must be in 0..=100, got {}",
                    retries
                )));
            }
            config.max_retries = retries as u32;
        }
        if let Some(backoff) = parse_env_i64("STRATA_RETRY_BACKOFF_MS")? {
            if backoff < 0 {
                return Err(Error::Config(format!(
                    "STRATA_RETRY_BACKOFF_MS must be >= 0, got {}",
                    backoff
                )));
            }
            config.retry_backoff = Duration::from_millis(backoff as u64);
        }
        for granularity in Granularity::ROLLUP_LEVELS {
            let var = format!("STRATA_WORKERS_{}", granularity.as_str().to_uppercase());
            if let Some(workers) = parse_env_i64(&var)? {
                if workers <= 0 {
                    return Err(Error::Config(format!("{} must be > 0, got {}", var, workers)));
                }
                config.workers.insert(granularity, workers as usize);
            }
        }
        Ok(config)
    }

    /// Managed shard set.
    ///
    /// `STRATA_MANAGED_SHARDS` accepts `all` or a comma-separated mix of
    /// single shards and inclusive ranges, e.g. `0-31,64,100-127`.
    /// Defaults to the full shard space.
    pub fn managed_shards() -> Result<ShardSet> {
        match std::env::var("STRATA_MANAGED_SHARDS") {
            Ok(spec) => {
                let set = parse_shard_spec(&spec)?;
                info!("Managing {} shards from STRATA_MANAGED_SHARDS", set.len());
                Ok(set)
            }
            Err(_) => Ok(ShardSet::full()),
        }
    }

    /// Stable holder identity for shard locks.
    ///
    /// `STRATA_NODE_ID` if set, otherwise a random id per process start.
    pub fn holder_id() -> String {
        std::env::var("STRATA_NODE_ID")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("strata-{}", uuid::Uuid::new_v4()))
    }
}

fn parse_env_i64(var: &str) -> Result<Option<i64>> {
    match std::env::var(var) {
        Ok(value) => {
            let value = value.trim();
            value
                .parse::<i64>()
                .map(Some)
                .map_err(|_| Error::Config(format!("{} must be an integer, got '{}'", var, value)))
        }
        Err(_) => Ok(None),
    }
}

/// Parse a shard-set spec: `all`, or comma-separated shards and ranges.
pub fn parse_shard_spec(spec: &str) -> Result<ShardSet> {
    let spec = spec.trim();
    if spec.eq_ignore_ascii_case("all") {
        return Ok(ShardSet::full());
    }
    let mut set = ShardSet::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (lo, hi) = match part.split_once('-') {
            Some((lo, hi)) => (parse_shard_id(lo)?, parse_shard_id(hi)?),
            None => {
                let shard = parse_shard_id(part)?;
                (shard, shard)
            }
        };
        if lo > hi {
            return Err(Error::Config(format!("invalid shard range '{}'", part)));
        }
        for id in lo..=hi {
            set.insert(Shard(id));
        }
    }
    if set.is_empty() {
        return Err(Error::Config(format!("empty shard spec '{}'", spec)));
    }
    Ok(set)
}

fn parse_shard_id(s: &str) -> Result<u32> {
    let id = s
        .trim()
        .parse::<u32>()
        .map_err(|_| Error::Config(format!("invalid shard id '{}'", s)))?;
    if id >= SHARD_COUNT {
        return Err(Error::Config(format!(
            "shard id {} out of range [0, {})",
            id, SHARD_COUNT
        )));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shard_spec_mixed() {
        let set = parse_shard_spec("0-3, 7, 10-11").unwrap();
        let shards: Vec<u32> = set.iter().map(|s| s.0).collect();
        assert_eq!(shards, vec![0, 1, 2, 3, 7, 10, 11]);
    }

    #[test]
    fn test_parse_shard_spec_all() {
        let set = parse_shard_spec("all").unwrap();
        assert_eq!(set.len(), SHARD_COUNT as usize);
    }

    #[test]
    fn test_parse_shard_spec_rejects_bad_input() {
        assert!(parse_shard_spec("5-2").is_err(), "inverted range");
        assert!(parse_shard_spec("200").is_err(), "out of range");
        assert!(parse_shard_spec("x").is_err(), "not a number");
        assert!(parse_shard_spec("").is_err(), "empty");
    }

    #[test]
    fn test_holder_id_is_nonempty() {
        assert!(!ComponentFactory::holder_id().is_empty());
    }
}
