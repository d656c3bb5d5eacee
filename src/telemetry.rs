//! Telemetry bootstrap and rollup instruments
//!
//! Instruments record against the global meter; wiring an exporter is the
//! host process's concern. Counters and histograms cover the operational
//! questions that matter here: is rollup work keeping up, and is the lock
//! service healthy.

use crate::granularity::Granularity;
use crate::shard::Shard;
use crate::{Error, Result};

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::Resource;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install a plain fmt subscriber for library consumers that do not bring
/// their own. Idempotent at the call site's risk: a second global
/// subscriber registration is reported as a config error.
pub fn init_tracing(level: Level) -> Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Config(format!("failed to install tracing subscriber: {}", e)))
}

/// Handle that keeps the metrics SDK provider alive for process lifetime.
///
/// Dropping it flushes and shuts down the provider; hosts that export
/// metrics attach their readers before calling this.
pub struct Metrics {
    meter_provider: SdkMeterProvider,
}

impl Metrics {
    /// Install a global meter provider tagged with this service's name.
    pub fn init(service_name: &str) -> Self {
        let resource = Resource::new([KeyValue::new(
            "service.name",
            service_name.to_string(),
        )]);
        let meter_provider = SdkMeterProvider::builder()
            .with_resource(resource)
            .build();
        global::set_meter_provider(meter_provider.clone());
        Self { meter_provider }
    }
}

impl Drop for Metrics {
    fn drop(&mut self) {
        let _ = self.meter_provider.shutdown();
    }
}

struct RollupInstruments {
    rollups_completed: Counter<u64>,
    rollup_duration_seconds: Histogram<f64>,
    queue_depth: Histogram<u64>,
    lock_failures: Counter<u64>,
}

fn instruments() -> &'static RollupInstruments {
    static INSTRUMENTS: OnceLock<RollupInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("strata.rollup");
        RollupInstruments {
            rollups_completed: meter
                .u64_counter("strata.rollup.completed")
                .with_description("Rollup units finished, by granularity and outcome")
                .init(),
            rollup_duration_seconds: meter
                .f64_histogram("strata.rollup.duration")
                .with_description("Per-slot rollup duration")
                .with_unit("s")
                .init(),
            queue_depth: meter
                .u64_histogram("strata.rollup.queue_depth")
                .with_description("Ready-slot queue depth sampled each scheduling cycle")
                .init(),
            lock_failures: meter
                .u64_counter("strata.coordinator.lock_failures")
                .with_description("Shard lock service failures (not contention)")
                .init(),
        }
    })
}

/// Outcome label values for completed rollup units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupOutcome {
    /// Rollup computed and persisted
    Ok,
    /// No finer data existed; slot closed without a write
    Empty,
    /// Retry budget exhausted; slot left active
    Failed,
}

impl RollupOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            RollupOutcome::Ok => "ok",
            RollupOutcome::Empty => "empty",
            RollupOutcome::Failed => "failed",
        }
    }
}

pub fn record_rollup_outcome(granularity: Granularity, outcome: RollupOutcome) {
    instruments().rollups_completed.add(
        1,
        &[
            KeyValue::new("granularity", granularity.as_str()),
            KeyValue::new("outcome", outcome.as_str()),
        ],
    );
}

pub fn record_rollup_duration(granularity: Granularity, elapsed: Duration) {
    instruments().rollup_duration_seconds.record(
        elapsed.as_secs_f64(),
        &[KeyValue::new("granularity", granularity.as_str())],
    );
}

pub fn record_queue_depth(depth: u64) {
    instruments().queue_depth.record(depth, &[]);
}

pub fn record_lock_failure(shard: Shard) {
    instruments()
        .lock_failures
        .add(1, &[KeyValue::new("shard", shard.0 as i64)]);
}
