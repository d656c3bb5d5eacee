//! Streaming, mergeable rollup statistics
//!
//! Every statistic here supports two input paths that must stay consistent
//! with each other: folding raw samples one at a time, and merging an
//! already-computed child accumulator from the next-finer granularity.
//! Accumulators are not safe for concurrent mutation; merging produces a
//! new value from immutable inputs.

mod average;
mod extrema;
mod rollup;
mod variance;

pub use average::Average;
pub use extrema::{MaxValue, MinValue};
pub use rollup::Rollup;
pub use variance::Variance;

use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw sample value, integer or floating-point.
///
/// The first sample's type puts a statistic in integer or float mode;
/// any later float operand widens the statistic to float mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SampleValue {
    Int(i64),
    Float(f64),
}

impl SampleValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            SampleValue::Int(v) => *v as f64,
            SampleValue::Float(v) => *v,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, SampleValue::Float(_))
    }

    /// The same numeric value in float mode.
    pub fn widened(&self) -> SampleValue {
        SampleValue::Float(self.as_f64())
    }
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleValue::Int(v) => write!(f, "{}", v),
            SampleValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for SampleValue {
    fn from(v: i64) -> Self {
        SampleValue::Int(v)
    }
}

impl From<f64> for SampleValue {
    fn from(v: f64) -> Self {
        SampleValue::Float(v)
    }
}

/// A timestamped raw sample as read back from the store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp_ms: i64,
    pub value: SampleValue,
}

impl Sample {
    pub fn new(timestamp_ms: i64, value: impl Into<SampleValue>) -> Self {
        Self {
            timestamp_ms,
            value: value.into(),
        }
    }
}
