//! Running minimum and maximum
//!
//! Extrema track the winning value together with its numeric mode. Mixed
//! integer/float operands widen the result to float mode even when the
//! integer side wins the comparison.

use super::SampleValue;
use serde::{Deserialize, Serialize};

/// Pick an extremum of two values, widening to float if modes differ.
fn extremum(current: SampleValue, candidate: SampleValue, want_min: bool) -> SampleValue {
    let winner = if (candidate.as_f64() < current.as_f64()) == want_min
        && candidate.as_f64() != current.as_f64()
    {
        candidate
    } else {
        current
    };
    if current.is_float() != candidate.is_float() {
        winner.widened()
    } else {
        winner
    }
}

/// Running minimum.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MinValue {
    value: Option<SampleValue>,
}

impl MinValue {
    pub fn new() -> Self {
        Self { value: None }
    }

    pub fn add(&mut self, candidate: SampleValue) {
        self.value = Some(match self.value {
            None => candidate,
            Some(current) => extremum(current, candidate, true),
        });
    }

    /// Merge another minimum; the merged mode widens if modes differ.
    pub fn merge(&mut self, other: &MinValue) {
        if let Some(v) = other.value {
            self.add(v);
        }
    }

    pub fn value(&self) -> Option<SampleValue> {
        self.value
    }
}

/// Running maximum.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MaxValue {
    value: Option<SampleValue>,
}

impl MaxValue {
    pub fn new() -> Self {
        Self { value: None }
    }

    pub fn add(&mut self, candidate: SampleValue) {
        self.value = Some(match self.value {
            None => candidate,
            Some(current) => extremum(current, candidate, false),
        });
    }

    pub fn merge(&mut self, other: &MaxValue) {
        if let Some(v) = other.value {
            self.add(v);
        }
    }

    pub fn value(&self) -> Option<SampleValue> {
        self.value
    }
}
