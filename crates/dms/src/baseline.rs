//! Analyzer-side eyes-open baseline and adaptive threshold

use feature_engine::OutlierFilter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Samples collected before the baseline is computed
pub const BASELINE_SAMPLES: usize = 50;
/// Only values above this are taken as "probably open"
pub const OPEN_EYE_GATE: f64 = 0.2;
/// Threshold returned while no baseline exists
pub const DEFAULT_ADAPTIVE_THRESHOLD: f64 = 0.2;

const THRESHOLD_RATIO: f64 = 0.75;
const THRESHOLD_MIN: f64 = 0.15;
const THRESHOLD_MAX: f64 = 0.30;

const RECALIBRATE_RATIO: f64 = 1.2;
const RECALIBRATE_FLOOR: f64 = 0.25;
const RECALIBRATE_KEEP: f64 = 0.8;

/// Learned eyes-open reference used by the blink/PERCLOS helpers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub mean: f64,
    pub std_dev: f64,
}

/// Opportunistic baseline estimator.
///
/// Collects smoothed EAR values above [`OPEN_EYE_GATE`], computes an
/// outlier-filtered mean/std after [`BASELINE_SAMPLES`] values, then keeps
/// nudging the mean upward when clearly higher EAR shows up.
#[derive(Debug, Clone, Default)]
pub struct AdaptiveBaseline {
    samples: Vec<f64>,
    stats: Option<BaselineStats>,
}

impl AdaptiveBaseline {
    pub fn new() -> Self {
        Self {
            samples: Vec::with_capacity(BASELINE_SAMPLES),
            stats: None,
        }
    }

    /// Feed one smoothed EAR value
    pub fn update_baseline(&mut self, smoothed_ear: f64) {
        if self.stats.is_none() && smoothed_ear > OPEN_EYE_GATE {
            if self.samples.len() < BASELINE_SAMPLES {
                self.samples.push(smoothed_ear);
            }

            if self.samples.len() >= BASELINE_SAMPLES {
                if let Some(filtered) = OutlierFilter::new(2.0).stats(&self.samples) {
                    info!(
                        "Analyzer baseline computed: mean={:.4} std={:.4}",
                        filtered.mean, filtered.std_dev
                    );
                    self.stats = Some(BaselineStats {
                        mean: filtered.mean,
                        std_dev: filtered.std_dev,
                    });
                }
            }
        }

        if let Some(stats) = self.stats.as_mut() {
            if smoothed_ear > stats.mean * RECALIBRATE_RATIO && smoothed_ear > RECALIBRATE_FLOOR {
                let updated = stats.mean * RECALIBRATE_KEEP + smoothed_ear * (1.0 - RECALIBRATE_KEEP);
                debug!("Baseline recalibrated {:.4} -> {:.4}", stats.mean, updated);
                stats.mean = updated;
            }
        }
    }

    /// Closure threshold derived from the baseline, or the default before it exists
    pub fn adaptive_threshold(&self) -> f64 {
        match self.stats {
            Some(stats) => (stats.mean * THRESHOLD_RATIO).clamp(THRESHOLD_MIN, THRESHOLD_MAX),
            None => DEFAULT_ADAPTIVE_THRESHOLD,
        }
    }

    pub fn is_computed(&self) -> bool {
        self.stats.is_some()
    }

    pub fn stats(&self) -> Option<BaselineStats> {
        self.stats
    }

    /// Samples gathered so far (frozen once computed)
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.stats = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feature_engine::SampleStats;

    fn alternating(n: usize) -> Vec<f64> {
        (0..n).map(|i| if i % 2 == 0 { 0.26 } else { 0.30 }).collect()
    }

    #[test]
    fn test_default_threshold_before_baseline() {
        let mut baseline = AdaptiveBaseline::new();
        for v in alternating(49) {
            baseline.update_baseline(v);
        }
        assert!(!baseline.is_computed());
        assert_eq!(baseline.adaptive_threshold(), DEFAULT_ADAPTIVE_THRESHOLD);
    }

    #[test]
    fn test_values_below_gate_are_ignored() {
        let mut baseline = AdaptiveBaseline::new();
        for _ in 0..100 {
            baseline.update_baseline(0.18);
        }
        assert_eq!(baseline.sample_count(), 0);
        assert!(!baseline.is_computed());
    }

    #[test]
    fn test_closed_form_baseline() {
        // 0.26/0.30 alternate: mean 0.28, std 0.02, nothing is beyond 2σ.
        let mut baseline = AdaptiveBaseline::new();
        for v in alternating(50) {
            baseline.update_baseline(v);
        }
        let stats = baseline.stats().unwrap();
        assert!((stats.mean - 0.28).abs() < 1e-12);
        assert!((stats.std_dev - 0.02).abs() < 1e-12);
        assert!((baseline.adaptive_threshold() - 0.21).abs() < 1e-12);
    }

    #[test]
    fn test_outlier_is_excluded() {
        let mut values = vec![0.30; 49];
        values.push(0.60);
        let mut baseline = AdaptiveBaseline::new();
        for v in &values[..49] {
            baseline.update_baseline(*v);
        }
        // The 50th value is also above 1.2×mean, so recalibration nudges the mean.
        baseline.update_baseline(0.60);

        let expected = SampleStats::of(&values[..49]);
        let stats = baseline.stats().unwrap();
        let nudged = expected.mean * 0.8 + 0.60 * 0.2;
        assert!((stats.mean - nudged).abs() < 1e-12);
        assert!((stats.std_dev - expected.std_dev).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_is_clamped() {
        let mut baseline = AdaptiveBaseline::new();
        for _ in 0..50 {
            baseline.update_baseline(0.21);
        }
        // 0.21 * 0.75 = 0.1575, inside the band
        assert!((baseline.adaptive_threshold() - 0.1575).abs() < 1e-12);

        let mut wide = AdaptiveBaseline::new();
        for _ in 0..50 {
            wide.update_baseline(0.48);
        }
        assert!((wide.adaptive_threshold() - 0.30).abs() < 1e-12);
    }

    #[test]
    fn test_recalibration_moves_mean_up() {
        let mut baseline = AdaptiveBaseline::new();
        for _ in 0..50 {
            baseline.update_baseline(0.22);
        }
        baseline.update_baseline(0.40);
        let mean = baseline.stats().unwrap().mean;
        assert!((mean - (0.22 * 0.8 + 0.40 * 0.2)).abs() < 1e-12);

        let before = baseline.stats().unwrap().mean;
        baseline.update_baseline(0.24);
        assert_eq!(baseline.stats().unwrap().mean, before);
    }

    #[test]
    fn test_recalibration_floor() {
        let mut baseline = AdaptiveBaseline::new();
        for _ in 0..50 {
            baseline.update_baseline(0.201);
        }
        let before = baseline.stats().unwrap().mean;
        // Above 1.2×mean but under the 0.25 floor
        baseline.update_baseline(0.245);
        assert_eq!(baseline.stats().unwrap().mean, before);
    }
}
