//! Eye aspect ratio (EAR) extraction and smoothing

use ring_buffer::RingBuffer;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::landmarks::{Eye, EyeLandmarks, EyeRole, LandmarkSet};

/// Weight of the smaller vertical distance; makes partial closures register sooner
const MIN_VERTICAL_WEIGHT: f64 = 0.6;
const MAX_VERTICAL_WEIGHT: f64 = 0.4;

/// Default moving-average window
pub const DEFAULT_SMOOTHING_WINDOW: usize = 3;

/// EAR values extracted from one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EarMeasurement {
    pub right: f64,
    pub left: f64,
    /// Mean of both eyes
    pub average: f64,
    /// Moving average of `average`
    pub smoothed: f64,
}

/// A measurement stamped with its frame position, kept in the session history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EarSample {
    pub right: f64,
    pub left: f64,
    pub average: f64,
    pub smoothed: f64,
    pub frame_index: u64,
    pub timestamp: f64,
}

impl EarSample {
    pub fn new(measurement: EarMeasurement, frame_index: u64, timestamp: f64) -> Self {
        Self {
            right: measurement.right,
            left: measurement.left,
            average: measurement.average,
            smoothed: measurement.smoothed,
            frame_index,
            timestamp,
        }
    }
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Weighted EAR of a single eye; 0 when the corners coincide
pub fn eye_aspect_ratio(eyes: &EyeLandmarks, eye: Eye) -> f64 {
    let p = |role| eyes.point(eye, role);

    let a = distance(p(EyeRole::UpperFirst), p(EyeRole::LowerFirst));
    let b = distance(p(EyeRole::UpperSecond), p(EyeRole::LowerSecond));
    let c = distance(p(EyeRole::CornerStart), p(EyeRole::CornerEnd));

    if c == 0.0 {
        return 0.0;
    }

    (a.min(b) * MIN_VERTICAL_WEIGHT + a.max(b) * MAX_VERTICAL_WEIGHT) / c
}

/// Per-frame EAR extractor with a short moving-average window
#[derive(Debug, Clone)]
pub struct EarExtractor {
    history: RingBuffer<f64>,
}

impl EarExtractor {
    pub fn new(smoothing_window: usize) -> Self {
        Self {
            history: RingBuffer::new(smoothing_window),
        }
    }

    /// Extract EAR from a raw landmark set.
    ///
    /// Returns `None` if any required eye point is absent; the smoothing
    /// window is left untouched in that case.
    pub fn compute(&mut self, landmarks: &LandmarkSet) -> Option<EarMeasurement> {
        match EyeLandmarks::from_landmarks(landmarks) {
            Ok(eyes) => Some(self.compute_eyes(&eyes)),
            Err(e) => {
                debug!("Skipping EAR extraction: {}", e);
                None
            }
        }
    }

    /// Extract EAR from already validated eye points
    pub fn compute_eyes(&mut self, eyes: &EyeLandmarks) -> EarMeasurement {
        let right = eye_aspect_ratio(eyes, Eye::Right);
        let left = eye_aspect_ratio(eyes, Eye::Left);
        let average = (right + left) / 2.0;

        self.history.push(average);
        let smoothed = self.history.iter().sum::<f64>() / self.history.len() as f64;

        EarMeasurement {
            right,
            left,
            average,
            smoothed,
        }
    }

    /// Forget the smoothing window
    pub fn reset(&mut self) {
        self.history.clear();
    }
}

impl Default for EarExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Eye of width `w` whose two vertical pairs are `a` and `b` pixels apart
    fn eye(w: f64, a: f64, b: f64) -> [(f64, f64); 6] {
        [
            (0.0, 0.0),
            (w / 3.0, -a / 2.0),
            (2.0 * w / 3.0, -b / 2.0),
            (w, 0.0),
            (2.0 * w / 3.0, b / 2.0),
            (w / 3.0, a / 2.0),
        ]
    }

    #[test]
    fn test_weighted_ear() {
        let eyes = EyeLandmarks::from_points(eye(100.0, 20.0, 30.0), eye(100.0, 30.0, 30.0));
        // right: (0.6*20 + 0.4*30) / 100
        assert!((eye_aspect_ratio(&eyes, Eye::Right) - 0.24).abs() < 1e-12);
        assert!((eye_aspect_ratio(&eyes, Eye::Left) - 0.30).abs() < 1e-12);

        let m = EarExtractor::default().compute_eyes(&eyes);
        assert!((m.average - 0.27).abs() < 1e-12);
        assert!((m.smoothed - 0.27).abs() < 1e-12);
    }

    #[test]
    fn test_zero_width_eye_is_zero() {
        let flat = [(5.0, 5.0), (5.0, 0.0), (5.0, 0.0), (5.0, 5.0), (5.0, 10.0), (5.0, 10.0)];
        let eyes = EyeLandmarks::from_points(flat, flat);
        assert_eq!(eye_aspect_ratio(&eyes, Eye::Right), 0.0);
    }

    #[test]
    fn test_smoothing_window() {
        let mut extractor = EarExtractor::new(3);
        let open = EyeLandmarks::from_points(eye(100.0, 30.0, 30.0), eye(100.0, 30.0, 30.0));
        let closed = EyeLandmarks::from_points(eye(100.0, 0.0, 0.0), eye(100.0, 0.0, 0.0));

        extractor.compute_eyes(&open);
        extractor.compute_eyes(&open);
        let m = extractor.compute_eyes(&closed);
        assert!((m.average - 0.0).abs() < 1e-12);
        assert!((m.smoothed - 0.2).abs() < 1e-12);

        extractor.compute_eyes(&closed);
        let m = extractor.compute_eyes(&closed);
        assert!(m.smoothed.abs() < 1e-12);
    }

    #[test]
    fn test_missing_landmarks_yield_none() {
        let mut extractor = EarExtractor::default();
        let mut landmarks = LandmarkSet::new();
        landmarks.insert(33, (0, 0));
        assert!(extractor.compute(&landmarks).is_none());
    }

    proptest! {
        #[test]
        fn ear_is_bounded_for_sane_geometry(
            w in 10.0f64..300.0,
            a_ratio in 0.0f64..1.0,
            b_ratio in 0.0f64..1.0,
        ) {
            let eyes = EyeLandmarks::from_points(eye(w, w * a_ratio, w * b_ratio), eye(w, w * b_ratio, w * a_ratio));
            let ear = eye_aspect_ratio(&eyes, Eye::Right);
            prop_assert!(ear >= 0.0);
            prop_assert!(ear <= 1.0 + 1e-9);
        }
    }
}
