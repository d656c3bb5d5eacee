//! Injectable clock sources
//!
//! All scheduling decisions flow through a [`Clock`] so tests and
//! operational tooling can drive time deterministically. The production
//! implementation guards against wall-clock regressions (NTP steps) with
//! a monotonic high-water mark.

use std::sync::atomic::{AtomicI64, Ordering};

/// Millisecond wall-clock source.
///
/// Implementations must be safe to call from many threads.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// A clock source that guarantees monotonically non-decreasing timestamps.
///
/// If the wall clock goes backward (e.g. NTP adjustment), returns the
/// previous high-water mark instead of the regressed reading.
pub struct SystemClock {
    /// High-water mark: the largest timestamp we've ever returned (ms)
    high_water_ms: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            high_water_ms: AtomicI64::new(0),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        let wall = chrono::Utc::now().timestamp_millis();
        loop {
            let prev = self.high_water_ms.load(Ordering::Acquire);
            let ts = wall.max(prev);
            match self.high_water_ms.compare_exchange_weak(
                prev,
                ts,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return ts,
                Err(_) => continue, // CAS failed, retry
            }
        }
    }
}

/// Manually driven clock for deterministic tests and simulated time.
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    /// Set the absolute time.
    pub fn set(&self, ts_ms: i64) {
        self.now_ms.store(ts_ms, Ordering::Release);
    }

    /// Advance the clock by the given number of milliseconds.
    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::Acquire)
    }
}
