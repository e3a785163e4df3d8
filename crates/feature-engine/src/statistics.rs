//! Statistical Features Computation

use serde::{Deserialize, Serialize};

/// Statistical features for a signal window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticalFeatures {
    /// Mean value
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    /// Minimum value
    pub min: f64,
    /// Smallest single-step change; positive when the signal only rises,
    /// 0 with fewer than two values
    pub min_step: f64,
    /// Direction reversals of the first difference
    pub sign_changes: usize,
}

impl StatisticalFeatures {
    /// Compute statistical features from a slice of values
    pub fn compute(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let mean = mean(values);
        let std_dev = std_dev(values);

        let min = values.iter().cloned().fold(f64::MAX, f64::min);

        let diffs = diff(values);
        let min_step = diffs.iter().cloned().reduce(f64::min).unwrap_or(0.0);

        Self {
            mean,
            std_dev,
            min,
            min_step,
            sign_changes: sign_bit_changes(&diffs),
        }
    }
}

/// Arithmetic mean, 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by N), 0 for an empty slice
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// First difference: `out[i] = values[i + 1] - values[i]`
pub fn diff(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Count positions where the sign bit flips between consecutive values.
///
/// Zero counts as non-negative and `-0.0` as negative.
pub fn sign_bit_changes(values: &[f64]) -> usize {
    values
        .windows(2)
        .filter(|w| w[0].is_sign_negative() != w[1].is_sign_negative())
        .count()
}

/// Number of values strictly below `threshold`
pub fn count_below(values: &[f64], threshold: f64) -> usize {
    values.iter().filter(|&&v| v < threshold).count()
}

/// Length of the longest run of consecutive values strictly below `threshold`
pub fn longest_run_below(values: &[f64], threshold: f64) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for &v in values {
        if v < threshold {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}
