//! Sigma-based Outlier Filtering

use crate::statistics::{mean, std_dev};

/// Mean and standard deviation of a sample set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleStats {
    pub mean: f64,
    pub std_dev: f64,
}

impl SampleStats {
    /// Compute from raw values
    pub fn of(values: &[f64]) -> Self {
        Self {
            mean: mean(values),
            std_dev: std_dev(values),
        }
    }
}

/// Drops values further than `sigmas` standard deviations from the mean,
/// then recomputes the statistics over what remains.
#[derive(Debug, Clone, Copy)]
pub struct OutlierFilter {
    sigmas: f64,
}

impl OutlierFilter {
    /// Create a filter with the given sigma band
    pub fn new(sigmas: f64) -> Self {
        Self { sigmas }
    }

    /// Values strictly inside the band around the mean
    pub fn retain(&self, values: &[f64]) -> Vec<f64> {
        let raw = SampleStats::of(values);
        let band = self.sigmas * raw.std_dev;
        values
            .iter()
            .cloned()
            .filter(|v| (v - raw.mean).abs() < band)
            .collect()
    }

    /// Statistics after filtering.
    ///
    /// Returns `None` for empty input. When every value is rejected (a
    /// constant signal has a zero-width band) the unfiltered statistics are
    /// returned instead.
    pub fn stats(&self, values: &[f64]) -> Option<SampleStats> {
        if values.is_empty() {
            return None;
        }
        let kept = self.retain(values);
        if kept.is_empty() {
            Some(SampleStats::of(values))
        } else {
            Some(SampleStats::of(&kept))
        }
    }
}

impl Default for OutlierFilter {
    fn default() -> Self {
        Self::new(2.0)
    }
}
