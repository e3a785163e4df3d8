//! Microsleep ensemble classifier
//!
//! Five independent heuristics each score a closure episode in `[0, 1]`:
//!
//! | Method       | Weight | Evidence                                         |
//! |--------------|--------|--------------------------------------------------|
//! | Duration     | 0.35   | length of the current closure                    |
//! | Pattern      | 0.25   | depth, stability and sharpness of the EAR window |
//! | Blink rate   | 0.15   | abnormal or slowing blink rate                   |
//! | PERCLOS      | 0.15   | fraction of recent frames below 0.2              |
//! | Oscillation  | 0.10   | fluttering lids with a downward trend            |
//!
//! The weighted sum is compared against a sensitivity-dependent threshold and
//! the raw decision is smoothed over the last ten calls.

use feature_engine::{count_below, diff, mean, StatisticalFeatures};
use ring_buffer::RingBuffer;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::DmsError;

pub const DURATION_WEIGHT: f64 = 0.35;
pub const PATTERN_WEIGHT: f64 = 0.25;
pub const BLINK_RATE_WEIGHT: f64 = 0.15;
pub const PERCLOS_WEIGHT: f64 = 0.15;
pub const OSCILLATION_WEIGHT: f64 = 0.10;

/// Fewer EAR values than this is a definite negative
pub const MIN_EAR_VALUES: usize = 5;
/// Default sensitivity
pub const DEFAULT_SENSITIVITY: f64 = 0.7;

const DEFAULT_MIN_DURATION: f64 = 0.4;
const DEFAULT_MAX_DURATION: f64 = 30.0;
const RAMP_END: f64 = 0.8;
const RAMP_CAP: f64 = 0.8;
const PLATEAU_END: f64 = 3.0;
const LONG_CLOSURE_FLOOR: f64 = 0.1;

const PATTERN_MIN_SAMPLES: usize = 10;
const PATTERN_CLOSED_EAR: f64 = 0.25;

const NORMAL_BLINK_RATE_MIN: f64 = 8.0;
const NORMAL_BLINK_RATE_MAX: f64 = 20.0;
const HIGH_BLINK_RATE_CAP: f64 = 0.7;

const PERCLOS_THRESHOLD: f64 = 0.2;
const PERCLOS_WINDOW: usize = 90;

const OSCILLATION_MIN_SAMPLES: usize = 30;
const OSCILLATION_WINDOW: usize = 90;
const MIN_OSCILLATIONS: usize = 3;

const DECISION_WINDOW: usize = 10;
const DECISION_QUORUM: f64 = 0.6;
const EVENT_HISTORY: usize = 10;
const PATTERN_BUFFER: usize = 300;
const FRAME_TIME_WINDOW: usize = 30;
const DEFAULT_FPS: f64 = 30.0;

/// Per-method scores of one prediction
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodScores {
    pub duration: f64,
    pub pattern: f64,
    pub blink_rate: f64,
    pub perclos: f64,
    pub oscillation: f64,
}

impl MethodScores {
    /// Weighted ensemble score
    pub fn combined(&self) -> f64 {
        self.duration * DURATION_WEIGHT
            + self.pattern * PATTERN_WEIGHT
            + self.blink_rate * BLINK_RATE_WEIGHT
            + self.perclos * PERCLOS_WEIGHT
            + self.oscillation * OSCILLATION_WEIGHT
    }
}

/// A confirmed microsleep
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MicrosleepEvent {
    pub timestamp: f64,
    pub duration_s: f64,
    pub ear_min: f64,
    pub confidence: f64,
}

/// Summary of what the classifier has seen this session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierStatistics {
    pub detection_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_confidence: Option<f64>,
    /// Mean spacing between recorded microsleeps (seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_interval: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_fps: Option<f64>,
}

/// Duration score: ramp to 0.8 by 0.8 s, plateau at 1.0 until 3 s, then a
/// linear decay that bottoms out at 0.1 by `max_duration`.
pub fn duration_score(closed_duration: f64, min_duration: f64, max_duration: f64) -> f64 {
    if closed_duration < min_duration {
        return 0.0;
    }

    if closed_duration < RAMP_END {
        let span = RAMP_END - min_duration;
        if span <= 0.0 {
            return RAMP_CAP;
        }
        return ((closed_duration - min_duration) / span).clamp(0.0, RAMP_CAP);
    }

    if closed_duration < PLATEAU_END {
        return 1.0;
    }

    let decay_span = (max_duration - PLATEAU_END).max(f64::EPSILON);
    (1.0 - (closed_duration - PLATEAU_END) / decay_span).clamp(LONG_CLOSURE_FLOOR, 1.0)
}

/// Pattern score: deep minimum (0.6), stable window (0.3), sharp drop (0.1)
pub fn pattern_score(ear_values: &[f64]) -> f64 {
    if ear_values.len() < PATTERN_MIN_SAMPLES {
        return 0.0;
    }

    let stats = StatisticalFeatures::compute(ear_values);

    let min_ear_score = (1.0 - stats.min / PATTERN_CLOSED_EAR).clamp(0.0, 1.0);
    let stability_score = 1.0 - (stats.std_dev * 10.0).min(1.0);
    // magnitude of the smallest step, even when the window only rises
    let closure_score = (stats.min_step.abs() * 10.0).min(1.0);

    min_ear_score * 0.6 + stability_score * 0.3 + closure_score * 0.1
}

/// Blink-rate score from inter-blink intervals (seconds); needs three
pub fn blink_rate_score(blink_intervals: &[f64]) -> f64 {
    if blink_intervals.len() < 3 {
        return 0.0;
    }

    let mean_interval = mean(blink_intervals);
    let blink_rate = if mean_interval > 0.0 {
        60.0 / mean_interval
    } else {
        0.0
    };

    let rate_score = if blink_rate < NORMAL_BLINK_RATE_MIN {
        ((NORMAL_BLINK_RATE_MIN - blink_rate) / NORMAL_BLINK_RATE_MIN).min(1.0)
    } else if blink_rate > NORMAL_BLINK_RATE_MAX {
        ((blink_rate - NORMAL_BLINK_RATE_MAX) / NORMAL_BLINK_RATE_MAX).min(HIGH_BLINK_RATE_CAP)
    } else {
        0.0
    };

    // Growing intervals mean the blink rate is slowing down
    let trend_score = if blink_intervals.len() >= 6 {
        let early = mean(&blink_intervals[..3]);
        let late = mean(&blink_intervals[blink_intervals.len() - 3..]);
        let change = late - early;
        if change > 0.0 {
            change.min(1.0)
        } else {
            0.0
        }
    } else {
        0.0
    };

    rate_score.max(trend_score)
}

/// PERCLOS-like score over the last 90 values; needs half a window
pub fn perclos_score(ear_values: &[f64]) -> f64 {
    if (ear_values.len() as f64) < PERCLOS_WINDOW as f64 / 2.0 {
        return 0.0;
    }

    let recent = &ear_values[ear_values.len().saturating_sub(PERCLOS_WINDOW)..];
    let closed = count_below(recent, PERCLOS_THRESHOLD) as f64 / recent.len() as f64;

    if closed > 0.8 {
        1.0
    } else if closed > 0.4 {
        (closed - 0.4) / 0.4
    } else {
        0.0
    }
}

/// Oscillation score over the last 90 values; needs 30
pub fn oscillation_score(ear_values: &[f64]) -> f64 {
    if ear_values.len() < OSCILLATION_MIN_SAMPLES {
        return 0.0;
    }

    let recent = &ear_values[ear_values.len().saturating_sub(OSCILLATION_WINDOW)..];
    let stats = StatisticalFeatures::compute(recent);
    let mut score = (stats.sign_changes as f64 / (2 * MIN_OSCILLATIONS) as f64).min(1.0);

    let start_mean = mean(&recent[..10]);
    let end_mean = mean(&recent[recent.len() - 10..]);
    let trend_magnitude = ((start_mean - end_mean) * 5.0).min(1.0);
    if start_mean > end_mean && trend_magnitude > 0.2 {
        score *= 1.0 + trend_magnitude;
    }

    score.min(1.0)
}

/// Ensemble classifier with temporal smoothing
#[derive(Debug, Clone)]
pub struct MicrosleepClassifier {
    sensitivity: f64,
    min_duration: f64,
    max_duration: f64,
    /// Latest EAR of every call, for the oscillation method
    pattern_buffer: RingBuffer<f64>,
    /// Raw decisions for temporal smoothing
    decisions: RingBuffer<bool>,
    history: RingBuffer<MicrosleepEvent>,
    frame_times: RingBuffer<f64>,
    estimated_fps: f64,
    detection_count: u64,
    last_scores: Option<MethodScores>,
}

impl MicrosleepClassifier {
    pub fn new() -> Self {
        Self {
            sensitivity: DEFAULT_SENSITIVITY,
            min_duration: DEFAULT_MIN_DURATION,
            max_duration: DEFAULT_MAX_DURATION,
            pattern_buffer: RingBuffer::new(PATTERN_BUFFER),
            decisions: RingBuffer::new(DECISION_WINDOW),
            history: RingBuffer::new(EVENT_HISTORY),
            frame_times: RingBuffer::new(FRAME_TIME_WINDOW),
            estimated_fps: DEFAULT_FPS,
            detection_count: 0,
            last_scores: None,
        }
    }

    /// Classify the current closure.
    ///
    /// `timestamp` (seconds) stamps any recorded event and feeds the frame
    /// rate estimate. Fewer than five EAR values is a definite negative.
    pub fn predict(
        &mut self,
        ear_values: &[f64],
        blink_intervals: &[f64],
        closed_duration: f64,
        timestamp: f64,
    ) -> bool {
        self.frame_times.push(timestamp);
        self.update_fps_estimate();

        if let Some(&latest) = ear_values.last() {
            self.pattern_buffer.push(latest);
        }

        let scores = match self.score(ear_values, blink_intervals, closed_duration) {
            Ok(scores) => scores,
            Err(e) => {
                debug!("No prediction: {}", e);
                return false;
            }
        };
        let score = scores.combined();
        self.last_scores = Some(scores);

        let raw = score >= self.decision_threshold();
        self.decisions.push(raw);
        let positives = self.decisions.iter().filter(|&&d| d).count();
        let smoothed = positives as f64 >= self.decisions.len() as f64 * DECISION_QUORUM;

        debug!(
            "Microsleep score {:.3} (threshold {:.3}) raw={} smoothed={} {:?}",
            score,
            self.decision_threshold(),
            raw,
            smoothed,
            scores
        );

        if smoothed {
            let recent = &ear_values[ear_values.len().saturating_sub(10)..];
            let ear_min = recent.iter().cloned().fold(f64::INFINITY, f64::min);
            self.history.push(MicrosleepEvent {
                timestamp,
                duration_s: closed_duration,
                ear_min,
                confidence: score,
            });
            self.detection_count += 1;
        }

        smoothed
    }

    /// Score every method without touching the decision window
    pub fn score(
        &self,
        ear_values: &[f64],
        blink_intervals: &[f64],
        closed_duration: f64,
    ) -> Result<MethodScores, DmsError> {
        if ear_values.len() < MIN_EAR_VALUES {
            return Err(DmsError::InsufficientHistory {
                required: MIN_EAR_VALUES,
                available: ear_values.len(),
            });
        }

        Ok(MethodScores {
            duration: duration_score(closed_duration, self.min_duration, self.max_duration),
            pattern: pattern_score(ear_values),
            blink_rate: blink_rate_score(blink_intervals),
            perclos: perclos_score(ear_values),
            oscillation: oscillation_score(&self.pattern_buffer.to_vec()),
        })
    }

    /// Score needed for a raw positive: `0.5 - 0.3 * sensitivity`
    pub fn decision_threshold(&self) -> f64 {
        0.5 - self.sensitivity * 0.3
    }

    /// Set sensitivity (clamped to 0..=1); also lowers the duration floor
    pub fn set_sensitivity(&mut self, sensitivity: f64) {
        self.sensitivity = sensitivity.clamp(0.0, 1.0);
        self.min_duration = 0.5 - self.sensitivity * 0.2;
        info!(
            "Classifier sensitivity {:.2}, min duration {:.2}s",
            self.sensitivity, self.min_duration
        );
    }

    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    pub fn min_duration(&self) -> f64 {
        self.min_duration
    }

    /// Method scores of the last prediction that had enough history
    pub fn last_scores(&self) -> Option<MethodScores> {
        self.last_scores
    }

    /// Ensemble score of the last prediction that had enough history
    pub fn last_score(&self) -> Option<f64> {
        self.last_scores.map(|s| s.combined())
    }

    pub fn detection_count(&self) -> u64 {
        self.detection_count
    }

    /// Recorded microsleeps, oldest first
    pub fn history(&self) -> Vec<MicrosleepEvent> {
        self.history.to_vec()
    }

    pub fn estimated_fps(&self) -> f64 {
        self.estimated_fps
    }

    fn update_fps_estimate(&mut self) {
        if self.frame_times.len() < 2 {
            return;
        }
        let times = self.frame_times.to_vec();
        let avg_diff = mean(&diff(&times));
        if avg_diff > 0.0 {
            self.estimated_fps = 1.0 / avg_diff;
        }
    }

    pub fn statistics(&self) -> ClassifierStatistics {
        let events = self.history.to_vec();
        let mut stats = ClassifierStatistics {
            detection_count: self.detection_count,
            ..Default::default()
        };

        if !events.is_empty() {
            let durations: Vec<f64> = events.iter().map(|e| e.duration_s).collect();
            let confidences: Vec<f64> = events.iter().map(|e| e.confidence).collect();
            stats.avg_duration = Some(mean(&durations));
            stats.max_duration = Some(durations.iter().cloned().fold(f64::MIN, f64::max));
            stats.avg_confidence = Some(mean(&confidences));
        }

        if events.len() >= 2 {
            let times: Vec<f64> = events.iter().map(|e| e.timestamp).collect();
            stats.avg_interval = Some(mean(&diff(&times)));
        }

        if self.frame_times.len() >= 2 {
            stats.estimated_fps = Some(self.estimated_fps);
        }

        stats
    }

    /// Clear every history and counter; sensitivity is kept
    pub fn reset(&mut self) {
        self.pattern_buffer.clear();
        self.decisions.clear();
        self.history.clear();
        self.frame_times.clear();
        self.estimated_fps = DEFAULT_FPS;
        self.detection_count = 0;
        self.last_scores = None;
    }
}

impl Default for MicrosleepClassifier {
    fn default() -> Self {
        Self::new()
    }
}
