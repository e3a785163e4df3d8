//! Eye analyzer: EAR extraction plus the baseline-driven blink helpers

use crate::baseline::{AdaptiveBaseline, BaselineStats};
use crate::ear::{EarExtractor, EarMeasurement};
use crate::landmarks::{EyeLandmarks, LandmarkSet};
use crate::segmenter::{self, BlinkSegmenter};

/// Owns the smoothing window and the analyzer baseline of one subject.
///
/// Helper methods take an optional threshold; `None` means the baseline's
/// adaptive threshold.
#[derive(Debug, Clone)]
pub struct EyeAnalyzer {
    extractor: EarExtractor,
    baseline: AdaptiveBaseline,
    segmenter: BlinkSegmenter,
}

impl EyeAnalyzer {
    pub fn new(smoothing_window: usize) -> Self {
        Self {
            extractor: EarExtractor::new(smoothing_window),
            baseline: AdaptiveBaseline::new(),
            segmenter: BlinkSegmenter::default(),
        }
    }

    /// Extract EAR and feed the smoothed value to the baseline
    pub fn calculate_ear(&mut self, landmarks: &LandmarkSet) -> Option<EarMeasurement> {
        let measurement = self.extractor.compute(landmarks)?;
        self.baseline.update_baseline(measurement.smoothed);
        Some(measurement)
    }

    /// Same as [`calculate_ear`](Self::calculate_ear) for validated points
    pub fn calculate_ear_eyes(&mut self, eyes: &EyeLandmarks) -> EarMeasurement {
        let measurement = self.extractor.compute_eyes(eyes);
        self.baseline.update_baseline(measurement.smoothed);
        measurement
    }

    pub fn adaptive_threshold(&self) -> f64 {
        self.baseline.adaptive_threshold()
    }

    pub fn baseline(&self) -> Option<BaselineStats> {
        self.baseline.stats()
    }

    pub fn detect_blinks(&self, values: &[f64], threshold: Option<f64>) -> Vec<usize> {
        let threshold = threshold.unwrap_or_else(|| self.adaptive_threshold());
        self.segmenter
            .detect_blinks(values, threshold, self.baseline.stats())
    }

    pub fn calculate_perclos(&self, values: &[f64], threshold: Option<f64>, window: usize) -> f64 {
        let threshold = threshold.unwrap_or_else(|| self.adaptive_threshold());
        segmenter::calculate_perclos(values, threshold, window)
    }

    pub fn is_microsleep_candidate(&self, values: &[f64], threshold: Option<f64>, min_frames: usize) -> bool {
        let threshold = threshold.unwrap_or_else(|| self.adaptive_threshold());
        segmenter::is_microsleep_candidate(values, threshold, min_frames)
    }

    pub fn reset(&mut self) {
        self.extractor.reset();
        self.baseline.reset();
    }
}

impl Default for EyeAnalyzer {
    fn default() -> Self {
        Self::new(crate::ear::DEFAULT_SMOOTHING_WINDOW)
    }
}
