//! Alert state tracking
//!
//! Per-frame driver of the NORMAL / BLINK / DROWSY / MICROSLEEP states. The
//! machine itself does no I/O: [`AlertStateMachine::step`] reports what
//! happened and the session turns that into alert events.

use ring_buffer::RingBuffer;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classifier::MicrosleepClassifier;
use crate::config::DmsConfig;
use crate::ear::EarSample;
use crate::segmenter::ClosureEpisode;

/// Recent raw EAR values handed to the classifier
pub const CLASSIFIER_WINDOW: usize = 30;
/// Below this many recent values the duration fallback decides
pub const MIN_CLASSIFIER_SAMPLES: usize = 10;
/// Blink intervals of this length or more are not recorded
pub const MAX_BLINK_INTERVAL_S: f64 = 10.0;

const BLINK_INTERVAL_HISTORY: usize = 20;
const FALLBACK_FACTOR: f64 = 1.5;
const EVENT_LOG_CAPACITY: usize = 100;

/// Driver alert state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertState {
    #[default]
    Normal,
    Blink,
    Drowsy,
    Microsleep,
}

impl AlertState {
    /// Blink, Drowsy and Microsleep count as alerting
    pub fn is_alerting(&self) -> bool {
        !matches!(self, AlertState::Normal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Normal => "NORMAL",
            AlertState::Blink => "BLINK",
            AlertState::Drowsy => "DROWSY",
            AlertState::Microsleep => "MICROSLEEP",
        }
    }

    /// Numeric level for gauges
    pub fn level(&self) -> u8 {
        match self {
            AlertState::Normal => 0,
            AlertState::Blink => 1,
            AlertState::Drowsy => 2,
            AlertState::Microsleep => 3,
        }
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First frame of a microsleep
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MicrosleepOnset {
    pub duration_s: f64,
    /// Ensemble score; `None` when the duration fallback decided
    pub confidence: Option<f64>,
}

/// What one frame changed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub previous: AlertState,
    pub state: AlertState,
    pub blink: bool,
    pub microsleep: Option<MicrosleepOnset>,
    /// Closure that ended on this frame
    pub closure: Option<ClosureEpisode>,
}

impl StepOutcome {
    pub fn state_changed(&self) -> bool {
        self.previous != self.state
    }
}

/// Alert state machine with entry/exit hysteresis
#[derive(Debug, Clone)]
pub struct AlertStateMachine {
    consec_frames: u32,
    microsleep_frames: u32,
    state_stability_frames: u32,
    fps: f64,
    sensitivity: f64,

    state: AlertState,
    /// Consecutive closed frames
    frame_counter: u32,
    /// Closed frames since the closure qualified as a blink
    microsleep_frame_counter: u32,
    /// Consecutive open frames while leaving Microsleep
    stability: u32,
    closure_start: Option<u64>,

    blink_count: u64,
    microsleep_count: u64,
    last_blink_time: Option<f64>,
    blink_intervals: RingBuffer<f64>,
    blink_frames: RingBuffer<u64>,
    microsleep_frames_log: RingBuffer<u64>,

    classifier: MicrosleepClassifier,
}

impl AlertStateMachine {
    pub fn new(config: &DmsConfig) -> Self {
        let mut classifier = MicrosleepClassifier::new();
        classifier.set_sensitivity(config.sensitivity);

        Self {
            consec_frames: config.consec_frames,
            microsleep_frames: config.microsleep_frames,
            state_stability_frames: config.state_stability_frames,
            fps: config.fps,
            sensitivity: classifier.sensitivity(),
            state: AlertState::Normal,
            frame_counter: 0,
            microsleep_frame_counter: 0,
            stability: 0,
            closure_start: None,
            blink_count: 0,
            microsleep_count: 0,
            last_blink_time: None,
            blink_intervals: RingBuffer::new(BLINK_INTERVAL_HISTORY),
            blink_frames: RingBuffer::new(EVENT_LOG_CAPACITY),
            microsleep_frames_log: RingBuffer::new(EVENT_LOG_CAPACITY),
            classifier,
        }
    }

    /// Advance one face frame.
    ///
    /// `history` is the session's sample ring including `sample`; the
    /// classifier sees the raw average EAR of its last 30 entries.
    pub fn step(&mut self, sample: &EarSample, threshold: f64, history: &RingBuffer<EarSample>) -> StepOutcome {
        let previous = self.state;
        let mut blink = false;
        let mut microsleep = None;
        let mut closure = None;

        let last_blink_time = *self.last_blink_time.get_or_insert(sample.timestamp);

        if sample.smoothed < threshold {
            self.frame_counter += 1;
            self.stability = 0;
            self.closure_start.get_or_insert(sample.frame_index);

            if self.frame_counter == self.consec_frames {
                blink = true;
                self.blink_count += 1;
                self.blink_frames.push(sample.frame_index);

                let interval = sample.timestamp - last_blink_time;
                self.last_blink_time = Some(sample.timestamp);
                if interval < MAX_BLINK_INTERVAL_S {
                    self.blink_intervals.push(interval);
                }

                if self.state != AlertState::Microsleep {
                    self.state = AlertState::Blink;
                }
            }

            if self.frame_counter >= self.consec_frames {
                self.microsleep_frame_counter += 1;

                if self.microsleep_frame_counter >= self.microsleep_frames {
                    microsleep = self.classify_closure(sample, history);
                }
            }
        } else {
            if let Some(start) = self.closure_start.take() {
                closure = Some(ClosureEpisode::new(start, self.frame_counter, self.fps));
            }
            self.frame_counter = 0;
            self.microsleep_frame_counter = 0;

            if self.state == AlertState::Microsleep {
                self.stability += 1;
                if self.stability >= self.state_stability_frames {
                    self.state = AlertState::Normal;
                    self.stability = 0;
                }
            } else {
                self.state = AlertState::Normal;
            }
        }

        if previous != self.state {
            debug!(
                "Frame {}: {} -> {} (smoothed EAR {:.3}, threshold {:.3})",
                sample.frame_index, previous, self.state, sample.smoothed, threshold
            );
        }

        StepOutcome {
            previous,
            state: self.state,
            blink,
            microsleep,
            closure,
        }
    }

    fn classify_closure(&mut self, sample: &EarSample, history: &RingBuffer<EarSample>) -> Option<MicrosleepOnset> {
        let duration_s = f64::from(self.microsleep_frame_counter) / self.fps;
        let recent: Vec<f64> = history
            .tail(CLASSIFIER_WINDOW)
            .iter()
            .map(|s| s.average)
            .collect();

        let (positive, confidence) = if recent.len() >= MIN_CLASSIFIER_SAMPLES {
            let intervals = self.blink_intervals.to_vec();
            let positive = self
                .classifier
                .predict(&recent, &intervals, duration_s, sample.timestamp);
            (positive, self.classifier.last_score())
        } else {
            let forced = f64::from(self.microsleep_frame_counter)
                >= f64::from(self.microsleep_frames) * FALLBACK_FACTOR;
            (forced, None)
        };

        if !positive {
            self.state = AlertState::Drowsy;
            return None;
        }

        let onset = if self.state != AlertState::Microsleep {
            self.microsleep_count += 1;
            self.microsleep_frames_log.push(sample.frame_index);
            warn!(
                "MICROSLEEP detected at frame {} ({:.2}s closed)",
                sample.frame_index, duration_s
            );
            Some(MicrosleepOnset {
                duration_s,
                confidence,
            })
        } else {
            None
        };
        self.state = AlertState::Microsleep;
        onset
    }

    /// Clamp sensitivity, pass it to the classifier and derive the
    /// microsleep frame count (`trunc(20 - 10 * s)`).
    pub fn adjust_sensitivity(&mut self, sensitivity: f64) {
        self.sensitivity = sensitivity.clamp(0.0, 1.0);
        self.classifier.set_sensitivity(self.sensitivity);
        self.microsleep_frames = (20.0 - self.sensitivity * 10.0) as u32;
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    pub fn microsleep_frames(&self) -> u32 {
        self.microsleep_frames
    }

    pub fn blink_count(&self) -> u64 {
        self.blink_count
    }

    pub fn microsleep_count(&self) -> u64 {
        self.microsleep_count
    }

    /// Frame indices of recorded blinks, oldest first
    pub fn blink_frames(&self) -> Vec<u64> {
        self.blink_frames.to_vec()
    }

    /// Frame indices of microsleep onsets, oldest first
    pub fn microsleep_frame_indices(&self) -> Vec<u64> {
        self.microsleep_frames_log.to_vec()
    }

    pub fn blink_intervals(&self) -> Vec<f64> {
        self.blink_intervals.to_vec()
    }

    pub fn classifier(&self) -> &MicrosleepClassifier {
        &self.classifier
    }

    /// Back to the initial state; tuning (sensitivity, frame counts) is kept
    pub fn reset(&mut self) {
        self.state = AlertState::Normal;
        self.frame_counter = 0;
        self.microsleep_frame_counter = 0;
        self.stability = 0;
        self.closure_start = None;
        self.blink_count = 0;
        self.microsleep_count = 0;
        self.last_blink_time = None;
        self.blink_intervals.clear();
        self.blink_frames.clear();
        self.microsleep_frames_log.clear();
        self.classifier.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ear::EarMeasurement;

    const THRESHOLD: f64 = 0.21;

    struct Driver {
        machine: AlertStateMachine,
        history: RingBuffer<EarSample>,
        frame: u64,
    }

    impl Driver {
        fn new(config: DmsConfig) -> Self {
            Self {
                machine: AlertStateMachine::new(&config),
                history: RingBuffer::new(config.ear_history_capacity),
                frame: 0,
            }
        }

        fn feed(&mut self, ear: f64) -> StepOutcome {
            let sample = EarSample::new(
                EarMeasurement {
                    right: ear,
                    left: ear,
                    average: ear,
                    smoothed: ear,
                },
                self.frame,
                self.frame as f64 / 30.0,
            );
            self.history.push(sample);
            self.frame += 1;
            self.machine.step(&sample, THRESHOLD, &self.history)
        }
    }

    #[test]
    fn test_short_closure_is_a_blink() {
        let mut driver = Driver::new(DmsConfig::default());
        assert_eq!(driver.feed(0.30).state, AlertState::Normal);
        let first = driver.feed(0.10);
        assert!(!first.blink);
        assert_eq!(first.state, AlertState::Normal);

        let second = driver.feed(0.10);
        assert!(second.blink);
        assert_eq!(second.state, AlertState::Blink);
        assert!(second.state_changed());

        let open = driver.feed(0.30);
        assert_eq!(open.state, AlertState::Normal);
        let episode = open.closure.unwrap();
        assert_eq!(episode.start_frame, 1);
        assert_eq!(episode.length_frames, 2);
        assert_eq!(driver.machine.blink_count(), 1);
        assert_eq!(driver.machine.blink_frames(), vec![2]);
    }

    #[test]
    fn test_single_closed_frame_is_not_a_blink() {
        let mut driver = Driver::new(DmsConfig::default());
        driver.feed(0.30);
        driver.feed(0.10);
        let open = driver.feed(0.30);
        assert_eq!(open.state, AlertState::Normal);
        assert_eq!(driver.machine.blink_count(), 0);
    }

    #[test]
    fn test_fallback_forces_microsleep_with_short_history() {
        // Ring of 5 keeps the classifier starved: 1.5 × 15 = 22.5 frames
        let config = DmsConfig {
            ear_history_capacity: 5,
            ..DmsConfig::default()
        };
        let mut driver = Driver::new(config);

        let mut onset_frame = None;
        for _ in 0..40 {
            let outcome = driver.feed(0.10);
            if let Some(onset) = outcome.microsleep {
                assert!(onset.confidence.is_none());
                onset_frame = Some(driver.frame - 1);
            }
        }
        // Blink on the 2nd closed frame starts the counter; 23 counted frames
        assert_eq!(onset_frame, Some(23));
        assert_eq!(driver.machine.state(), AlertState::Microsleep);
        assert_eq!(driver.machine.microsleep_count(), 1);
        assert_eq!(driver.machine.microsleep_frame_indices(), vec![23]);
    }

    #[test]
    fn test_drowsy_before_fallback_threshold() {
        let config = DmsConfig {
            ear_history_capacity: 5,
            ..DmsConfig::default()
        };
        let mut driver = Driver::new(config);
        for _ in 0..16 {
            driver.feed(0.10);
        }
        // 15 counted frames reached, fallback still below 22.5
        assert_eq!(driver.machine.state(), AlertState::Drowsy);
    }

    #[test]
    fn test_exit_hysteresis_from_microsleep() {
        let config = DmsConfig {
            ear_history_capacity: 5,
            ..DmsConfig::default()
        };
        let mut driver = Driver::new(config);
        for _ in 0..30 {
            driver.feed(0.10);
        }
        assert_eq!(driver.machine.state(), AlertState::Microsleep);

        for _ in 0..4 {
            assert_eq!(driver.feed(0.30).state, AlertState::Microsleep);
        }
        // A closed frame resets stability
        driver.feed(0.10);
        for _ in 0..4 {
            assert_eq!(driver.feed(0.30).state, AlertState::Microsleep);
        }
        let fifth = driver.feed(0.30);
        assert_eq!(fifth.state, AlertState::Normal);
        assert_eq!(fifth.previous, AlertState::Microsleep);
    }

    #[test]
    fn test_blink_intervals_use_frame_time() {
        let mut driver = Driver::new(DmsConfig::default());
        for _ in 0..3 {
            for _ in 0..28 {
                driver.feed(0.30);
            }
            driver.feed(0.10);
            driver.feed(0.10);
        }
        let intervals = driver.machine.blink_intervals();
        assert_eq!(intervals.len(), 3);
        // First interval runs from the first frame (t=0) to frame 29
        assert!((intervals[0] - 29.0 / 30.0).abs() < 1e-9);
        assert!((intervals[1] - 1.0).abs() < 1e-9);
        assert!((intervals[2] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_adjust_sensitivity() {
        let mut machine = AlertStateMachine::new(&DmsConfig::default());
        machine.adjust_sensitivity(1.0);
        assert_eq!(machine.microsleep_frames(), 10);
        machine.adjust_sensitivity(0.0);
        assert_eq!(machine.microsleep_frames(), 20);
        machine.adjust_sensitivity(0.75);
        assert_eq!(machine.microsleep_frames(), 12);
        machine.adjust_sensitivity(3.0);
        assert_eq!(machine.sensitivity(), 1.0);
        assert!((machine.classifier().min_duration() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_alert_state_labels() {
        assert_eq!(AlertState::Microsleep.to_string(), "MICROSLEEP");
        assert!(AlertState::Blink.is_alerting());
        assert!(!AlertState::Normal.is_alerting());
        assert_eq!(
            serde_json::to_string(&AlertState::Drowsy).unwrap(),
            "\"DROWSY\""
        );
    }
}
