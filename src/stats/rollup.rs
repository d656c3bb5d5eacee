//! The rollup aggregate
//!
//! One `Rollup` summarizes either the raw samples inside a single slot or
//! the child rollups of the next-finer granularity covering that slot. Both
//! construction paths produce the same type, so a day rollup built from
//! hour rollups is structurally identical to a 5-minute rollup built from
//! raw samples.

use super::{Average, MaxValue, MinValue, Sample, SampleValue, Variance};
use serde::{Deserialize, Serialize};

/// Mergeable aggregate: count, average, variance, min, max.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rollup {
    count: i64,
    average: Average,
    variance: Variance,
    min: MinValue,
    max: MaxValue,
}

impl Rollup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one raw sample into all four statistics.
    pub fn add_sample(&mut self, value: SampleValue) {
        self.count += 1;
        self.average.add(value);
        self.variance.add(value);
        self.min.add(value);
        self.max.add(value);
    }

    /// Build a rollup from raw timestamped samples within one slot's range.
    ///
    /// Returns `None` for empty input; data absence is not an error and an
    /// empty rollup is never persisted.
    pub fn from_samples<'a, I>(samples: I) -> Option<Rollup>
    where
        I: IntoIterator<Item = &'a Sample>,
    {
        let mut rollup = Rollup::new();
        for sample in samples {
            rollup.add_sample(sample.value);
        }
        if rollup.count == 0 {
            None
        } else {
            Some(rollup)
        }
    }

    /// Fold a child rollup from the next-finer granularity into this one.
    ///
    /// Operates on the child's statistics, not its raw samples: the child's
    /// average enters as `child.count` repetitions of its mean, variance
    /// merges via the parallel formula, extrema take the extremum of
    /// extrema.
    pub fn merge_child(&mut self, child: &Rollup) {
        if child.count == 0 {
            return;
        }
        self.count += child.count;
        self.average.merge(&child.average);
        self.variance.merge(&child.variance);
        self.min.merge(&child.min);
        self.max.merge(&child.max);
    }

    /// Merge a sequence of child rollups into a new parent rollup.
    ///
    /// Returns `None` when no child carries data.
    pub fn from_children<'a, I>(children: I) -> Option<Rollup>
    where
        I: IntoIterator<Item = &'a Rollup>,
    {
        let mut parent = Rollup::new();
        for child in children {
            parent.merge_child(child);
        }
        if parent.count == 0 {
            None
        } else {
            Some(parent)
        }
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn average(&self) -> Option<SampleValue> {
        self.average.value()
    }

    pub fn variance(&self) -> f64 {
        self.variance.value()
    }

    pub fn min(&self) -> Option<SampleValue> {
        self.min.value()
    }

    pub fn max(&self) -> Option<SampleValue> {
        self.max.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_samples(values: &[i64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| Sample::new(i as i64 * 1000, v))
            .collect()
    }

    #[test]
    fn test_from_samples_basic() {
        let samples = int_samples(&[1, 2, 3, 4]);
        let rollup = Rollup::from_samples(&samples).unwrap();
        assert_eq!(rollup.count(), 4);
        assert_eq!(rollup.min(), Some(SampleValue::Int(1)));
        assert_eq!(rollup.max(), Some(SampleValue::Int(4)));
        assert_eq!(rollup.average(), Some(SampleValue::Int(2)));
        // Population variance of 1,2,3,4 is 1.25
        assert!((rollup.variance() - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_from_samples_empty_is_none() {
        assert!(Rollup::from_samples(&[]).is_none());
        assert!(Rollup::from_children(&[]).is_none());
        assert!(Rollup::from_children(&[Rollup::new()]).is_none());
    }

    #[test]
    fn test_merge_count_min_max_associative() {
        let groups: Vec<Rollup> = [&[3i64, 1][..], &[8, 2], &[5]]
            .iter()
            .map(|vals| Rollup::from_samples(&int_samples(vals)).unwrap())
            .collect();

        // (A B) C
        let mut ab = groups[0];
        ab.merge_child(&groups[1]);
        ab.merge_child(&groups[2]);

        // A (B C)
        let mut bc = groups[1];
        bc.merge_child(&groups[2]);
        let mut a_bc = groups[0];
        a_bc.merge_child(&bc);

        assert_eq!(ab.count(), a_bc.count());
        assert_eq!(ab.min(), a_bc.min());
        assert_eq!(ab.max(), a_bc.max());
        assert_eq!(ab.count(), 5);
        assert_eq!(ab.min(), Some(SampleValue::Int(1)));
        assert_eq!(ab.max(), Some(SampleValue::Int(8)));
    }

    #[test]
    fn test_merge_of_singletons_equals_direct_build() {
        // Children each holding one sample carry exact means, so merging
        // them must agree with folding the raw samples directly.
        let values = [10i64, 20, 30, 40];
        let direct = Rollup::from_samples(&int_samples(&values)).unwrap();

        let children: Vec<Rollup> = values
            .iter()
            .map(|&v| Rollup::from_samples(&int_samples(&[v])).unwrap())
            .collect();
        let merged = Rollup::from_children(&children).unwrap();

        assert_eq!(merged.count(), direct.count());
        assert_eq!(merged.min(), direct.min());
        assert_eq!(merged.max(), direct.max());
        assert_eq!(merged.average(), direct.average());
        assert!((merged.variance() - direct.variance()).abs() < 1e-9);
    }

    #[test]
    fn test_idempotent_build() {
        let samples = int_samples(&[7, 7, 8, 9, 12]);
        let a = Rollup::from_samples(&samples).unwrap();
        let b = Rollup::from_samples(&samples).unwrap();
        assert_eq!(a, b, "same inputs must produce a bit-equal rollup");
    }

    #[test]
    fn test_serde_round_trip() {
        let samples = int_samples(&[1, 5, 9]);
        let rollup = Rollup::from_samples(&samples).unwrap();
        let json = serde_json::to_string(&rollup).unwrap();
        let back: Rollup = serde_json::from_str(&json).unwrap();
        assert_eq!(rollup, back);
    }
}
