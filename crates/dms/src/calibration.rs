//! Detector-side start-of-session calibration
//!
//! Independent of the analyzer baseline: it takes every raw EAR value of the
//! first N frames, with no open-eye gate, and produces the threshold the
//! state machine uses for the rest of the session.

use feature_engine::{OutlierFilter, SampleStats};
use tracing::info;

use crate::DmsError;

/// Default calibration window (frames)
pub const DEFAULT_CALIBRATION_FRAMES: usize = 60;

const STD_MULTIPLIER: f64 = 1.8;
const SAFE_MIN: f64 = 0.15;
const SAFE_MAX: f64 = 0.28;

/// Start-of-session threshold calibration
#[derive(Debug, Clone)]
pub struct DetectorCalibration {
    frames: usize,
    samples: Vec<f64>,
    stats: Option<SampleStats>,
    threshold: Option<f64>,
}

impl DetectorCalibration {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            samples: Vec::with_capacity(frames),
            stats: None,
            threshold: None,
        }
    }

    /// Feed one raw EAR value; returns progress in percent.
    ///
    /// Values arriving after completion are ignored.
    pub fn observe(&mut self, ear: f64) -> f64 {
        if self.threshold.is_some() {
            return 100.0;
        }

        self.samples.push(ear);
        if self.samples.len() >= self.frames {
            if let Some(stats) = OutlierFilter::new(2.0).stats(&self.samples) {
                let threshold = (stats.mean - STD_MULTIPLIER * stats.std_dev).clamp(SAFE_MIN, SAFE_MAX);
                info!(
                    "Calibration complete. Adaptive threshold: {:.4} (mean={:.4}, std={:.4})",
                    threshold, stats.mean, stats.std_dev
                );
                self.stats = Some(stats);
                self.threshold = Some(threshold);
            }
        }
        self.progress()
    }

    /// Completion in percent (0 - 100)
    pub fn progress(&self) -> f64 {
        if self.threshold.is_some() || self.frames == 0 {
            return 100.0;
        }
        (self.samples.len() as f64 / self.frames as f64 * 100.0).min(100.0)
    }

    pub fn is_complete(&self) -> bool {
        self.threshold.is_some()
    }

    /// Calibrated threshold, once complete
    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    /// Outlier-filtered statistics, once complete
    pub fn stats(&self) -> Option<SampleStats> {
        self.stats
    }

    /// Calibrated threshold, or [`DmsError::CalibrationIncomplete`]
    pub fn try_threshold(&self) -> Result<f64, DmsError> {
        self.threshold.ok_or(DmsError::CalibrationIncomplete {
            collected: self.samples.len(),
            required: self.frames,
        })
    }

    /// Threshold to apply this frame: calibrated if available, else `fallback`
    pub fn active_threshold(&self, fallback: f64) -> f64 {
        self.threshold.unwrap_or(fallback)
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.stats = None;
        self.threshold = None;
    }
}

impl Default for DetectorCalibration {
    fn default() -> Self {
        Self::new(DEFAULT_CALIBRATION_FRAMES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_and_fallback() {
        let mut calibration = DetectorCalibration::new(60);
        for _ in 0..30 {
            calibration.observe(0.3);
        }
        assert!((calibration.progress() - 50.0).abs() < 1e-12);
        assert!(!calibration.is_complete());
        assert_eq!(calibration.active_threshold(0.21), 0.21);
        assert!(matches!(
            calibration.try_threshold(),
            Err(DmsError::CalibrationIncomplete { collected: 30, required: 60 })
        ));
    }

    #[test]
    fn test_closed_form_threshold() {
        // Alternating 0.28 / 0.32: mean 0.30, std 0.02 → 0.30 - 0.036 = 0.264
        let mut calibration = DetectorCalibration::new(60);
        for i in 0..60 {
            calibration.observe(if i % 2 == 0 { 0.28 } else { 0.32 });
        }
        assert!(calibration.is_complete());
        assert!((calibration.threshold().unwrap() - 0.264).abs() < 1e-12);
        assert_eq!(calibration.active_threshold(0.21), calibration.threshold().unwrap());
    }

    #[test]
    fn test_gate_free_and_clamped() {
        // Closed eyes during calibration are still collected; result is clamped.
        let mut calibration = DetectorCalibration::new(60);
        for _ in 0..60 {
            calibration.observe(0.05);
        }
        assert!((calibration.threshold().unwrap() - 0.15).abs() < 1e-12);

        let mut wide_open = DetectorCalibration::new(60);
        for _ in 0..60 {
            wide_open.observe(0.45);
        }
        assert!((wide_open.threshold().unwrap() - 0.28).abs() < 1e-12);
    }

    #[test]
    fn test_outliers_filtered_before_threshold() {
        let mut values: Vec<f64> = (0..59).map(|i| if i % 2 == 0 { 0.28 } else { 0.32 }).collect();
        values.push(0.02); // blink during calibration
        let mut calibration = DetectorCalibration::new(60);
        for v in &values {
            calibration.observe(*v);
        }

        let kept = SampleStats::of(&values[..59]);
        let expected = (kept.mean - 1.8 * kept.std_dev).clamp(0.15, 0.28);
        assert!((calibration.threshold().unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_reset_restarts_window() {
        let mut calibration = DetectorCalibration::new(10);
        for _ in 0..10 {
            calibration.observe(0.3);
        }
        assert!(calibration.is_complete());
        calibration.reset();
        assert!(!calibration.is_complete());
        assert_eq!(calibration.progress(), 0.0);
    }
}
