// beacongraph/src/stats.rs
//
// Edge-weight statistics behind the adaptive thresholds: mean/variance,
// z-score conversion, and the histogram reporting artifact.

use std::collections::BTreeMap;

/// Population mean and variance. Empty input yields (0, 0).
pub fn mean_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, variance)
}

/// z-score of a value under the given distribution.
pub fn get_z(mean: f64, variance: f64, value: f64) -> f64 {
    (value - mean) / variance.sqrt()
}

/// Absolute value for a z-score under the given distribution.
pub fn from_z(mean: f64, variance: f64, z: f64) -> f64 {
    mean + z * variance.sqrt()
}

/// Absolute prune threshold from a z-score, floored at zero — a similarity
/// threshold below zero prunes nothing.
pub fn prune_threshold_from_z(mean: f64, variance: f64, z: f64) -> f64 {
    from_z(mean, variance, z).max(0.0)
}

/// Absolute maximum cluster size from a z-score, rounded to a whole size
/// and floored at zero.
pub fn max_cluster_size_from_z(mean: f64, variance: f64, z: f64) -> f64 {
    from_z(mean, variance, z).round().max(0.0)
}

// ── Histogram ─────────────────────────────────────────────────────────────────

/// Fixed-step histogram: an ordered mapping from bucket lower-bound to
/// count. Reporting artifact only — control decisions use the raw
/// mean/variance, never the buckets.
#[derive(Debug, Clone, Default)]
pub struct HistData {
    step: f64,
    buckets: BTreeMap<i64, u64>,
}

impl HistData {
    /// Non-finite values (a z-transform over a zero-variance distribution)
    /// are not counted.
    pub fn from_values(values: &[f64], step: f64) -> Self {
        let mut buckets: BTreeMap<i64, u64> = BTreeMap::new();
        for &v in values {
            if !v.is_finite() {
                continue;
            }
            let idx = (v / step).floor() as i64;
            *buckets.entry(idx).or_insert(0) += 1;
        }
        Self { step, buckets }
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.buckets.values().sum()
    }

    /// Buckets in ascending lower-bound order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, u64)> + '_ {
        self.buckets
            .iter()
            .map(|(idx, count)| (*idx as f64 * self.step, *count))
    }
}
