//! Running average without a retained sum
//!
//! Keeping the mean instead of the sum avoids overflow across arbitrarily
//! large sample counts. Integer mode carries the division remainder into
//! the next update so the bias of repeated integer division stays bounded
//! instead of drifting.

use super::SampleValue;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
enum State {
    Empty,
    Int { mean: i64, remainder: i64, count: i64 },
    Float { mean: f64, count: i64 },
}

/// Streaming mean in integer or float mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Average {
    state: State,
}

impl Average {
    pub fn new() -> Self {
        Self { state: State::Empty }
    }

    /// Fold one sample into the running mean.
    pub fn add(&mut self, value: SampleValue) {
        self.state = match (self.state, value) {
            (State::Empty, SampleValue::Int(x)) => State::Int {
                mean: x,
                remainder: 0,
                count: 1,
            },
            (State::Empty, SampleValue::Float(x)) => State::Float { mean: x, count: 1 },
            (State::Int { mean, remainder, count }, SampleValue::Int(x)) => {
                let count = count + 1;
                let num = x + remainder - mean;
                State::Int {
                    mean: mean + num / count,
                    remainder: num % count,
                    count,
                }
            }
            // A float operand widens the accumulator; the carried
            // remainder is folded into the float mean so no mass is lost.
            (State::Int { mean, remainder, count }, SampleValue::Float(x)) => {
                let mut mean = mean as f64 + remainder as f64 / count as f64;
                let count = count + 1;
                mean += (x - mean) / count as f64;
                State::Float { mean, count }
            }
            (State::Float { mean, count }, v) => {
                let count = count + 1;
                let mean = mean + (v.as_f64() - mean) / count as f64;
                State::Float { mean, count }
            }
        };
    }

    /// Apply the single-value update `n` times.
    ///
    /// This is how a child rollup's mean is merged into a parent: as
    /// `child.count` repetitions of the child's mean. A closed-form
    /// weighted mean would be exact for the mean itself, but the repeated
    /// update matches the legacy engine's arithmetic and its numerics.
    pub fn add_batch(&mut self, value: SampleValue, n: i64) {
        for _ in 0..n {
            self.add(value);
        }
    }

    /// Merge another average, treating it as `other.count` copies of its
    /// mean.
    pub fn merge(&mut self, other: &Average) {
        if let Some(mean) = other.value() {
            self.add_batch(mean, other.count());
        }
    }

    /// The current mean, or `None` if no samples were folded.
    pub fn value(&self) -> Option<SampleValue> {
        match self.state {
            State::Empty => None,
            State::Int { mean, .. } => Some(SampleValue::Int(mean)),
            State::Float { mean, .. } => Some(SampleValue::Float(mean)),
        }
    }

    pub fn count(&self) -> i64 {
        match self.state {
            State::Empty => 0,
            State::Int { count, .. } | State::Float { count, .. } => count,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self.state, State::Float { .. })
    }
}

impl Default for Average {
    fn default() -> Self {
        Self::new()
    }
}
