//! Per-subject detection session
//!
//! Everything the pipeline remembers lives here: smoothing window, both
//! calibrations, EAR history, state machine and classifier. Two sessions
//! never share state, and [`DetectionSession::reset`] returns one to the
//! state it had right after construction.

use feature_engine::{diff, mean};
use ring_buffer::RingBuffer;
use tracing::{debug, info};

use crate::analysis::{AlertEvent, FrameAnalysis, ReportStatus, SessionSnapshot};
use crate::analyzer::EyeAnalyzer;
use crate::calibration::DetectorCalibration;
use crate::config::DmsConfig;
use crate::ear::EarSample;
use crate::landmarks::LandmarkSet;
use crate::segmenter::{closure_episodes, ClosureEpisode, DEFAULT_PERCLOS_WINDOW};
use crate::state::{AlertState, AlertStateMachine};
use crate::DmsError;

const FRAME_TIME_WINDOW: usize = 30;

/// Detection pipeline for one subject
#[derive(Debug, Clone)]
pub struct DetectionSession {
    config: DmsConfig,
    analyzer: EyeAnalyzer,
    calibration: DetectorCalibration,
    history: RingBuffer<EarSample>,
    machine: AlertStateMachine,
    frame_times: RingBuffer<f64>,
    frame_index: u64,
    faceless_frames: u64,
    last_report: Option<f64>,
}

impl DetectionSession {
    /// Create a session; invalid configuration is rejected here
    pub fn new(config: DmsConfig) -> Result<Self, DmsError> {
        config.validate()?;
        info!(
            "Detection session created (threshold {:.2}, sensitivity {:.2}, {} fps)",
            config.ear_threshold, config.sensitivity, config.fps
        );

        Ok(Self {
            analyzer: EyeAnalyzer::new(config.smoothing_window),
            calibration: DetectorCalibration::new(config.calibration_frames),
            history: RingBuffer::new(config.ear_history_capacity),
            machine: AlertStateMachine::new(&config),
            frame_times: RingBuffer::new(FRAME_TIME_WINDOW),
            frame_index: 0,
            faceless_frames: 0,
            last_report: None,
            config,
        })
    }

    /// Process one frame.
    ///
    /// `None` (or a set missing any eye landmark) is a gap: the frame index
    /// advances but no EAR-dependent state changes and no event is emitted.
    pub fn process_frame(&mut self, landmarks: Option<&LandmarkSet>, timestamp: f64) -> FrameAnalysis {
        let frame_index = self.frame_index;
        self.frame_index += 1;
        self.frame_times.push(timestamp);

        let measurement = landmarks.and_then(|l| self.analyzer.calculate_ear(l));
        let Some(measurement) = measurement else {
            self.faceless_frames += 1;
            debug!("Frame {}: no usable face", frame_index);
            return FrameAnalysis {
                frame_index,
                timestamp,
                face_detected: false,
                state: self.machine.state(),
                ..Default::default()
            };
        };

        self.calibration.observe(measurement.average);
        let threshold = self.current_threshold();

        let sample = EarSample::new(measurement, frame_index, timestamp);
        self.history.push(sample);

        let outcome = self.machine.step(&sample, threshold, &self.history);
        let mut events = Vec::new();

        if outcome.state_changed() {
            events.push(AlertEvent::StateChanged {
                from: outcome.previous,
                to: outcome.state,
                frame_index,
                timestamp,
            });
        }

        if let Some(onset) = outcome.microsleep {
            events.push(AlertEvent::MicrosleepAlert {
                frame_index,
                timestamp,
                duration_s: onset.duration_s,
                confidence: onset.confidence,
            });
        }

        // Rate-limited on frame time; state changes wait for the next slot
        let report_due = match self.last_report {
            None => true,
            Some(last) => timestamp - last >= self.config.report_interval_s,
        };
        if report_due {
            self.last_report = Some(timestamp);
            events.push(AlertEvent::Report {
                status: ReportStatus::from_state(outcome.state),
                state: outcome.state,
                timestamp,
            });
        }

        FrameAnalysis {
            frame_index,
            timestamp,
            face_detected: true,
            sample: Some(sample),
            threshold: Some(threshold),
            state: outcome.state,
            blink: outcome.blink,
            closure: outcome.closure,
            events,
        }
    }

    /// Threshold the state machine applies: calibrated once available
    pub fn current_threshold(&self) -> f64 {
        self.calibration.active_threshold(self.config.ear_threshold)
    }

    pub fn state(&self) -> AlertState {
        self.machine.state()
    }

    pub fn config(&self) -> &DmsConfig {
        &self.config
    }

    pub fn analyzer(&self) -> &EyeAnalyzer {
        &self.analyzer
    }

    pub fn calibration(&self) -> &DetectorCalibration {
        &self.calibration
    }

    pub fn state_machine(&self) -> &AlertStateMachine {
        &self.machine
    }

    /// Session EAR history, oldest first
    pub fn history(&self) -> &RingBuffer<EarSample> {
        &self.history
    }

    /// Smoothed EAR values of the history, oldest first
    pub fn smoothed_history(&self) -> Vec<f64> {
        self.history.iter().map(|s| s.smoothed).collect()
    }

    /// Blink centres in the history, as frame indices
    pub fn recent_blinks(&self) -> Vec<u64> {
        let samples = self.history.to_vec();
        let values: Vec<f64> = samples.iter().map(|s| s.smoothed).collect();
        self.analyzer
            .detect_blinks(&values, None)
            .into_iter()
            .map(|i| samples[i].frame_index)
            .collect()
    }

    /// PERCLOS of the history against the analyzer's adaptive threshold
    pub fn perclos(&self) -> f64 {
        self.analyzer
            .calculate_perclos(&self.smoothed_history(), None, DEFAULT_PERCLOS_WINDOW)
    }

    /// Closure episodes in the history against the active threshold
    pub fn closure_episodes(&self) -> Vec<ClosureEpisode> {
        let first_frame = self.history.iter().next().map_or(0, |s| s.frame_index);
        closure_episodes(
            &self.smoothed_history(),
            self.current_threshold(),
            self.config.fps,
            first_frame,
        )
    }

    /// Frame rate estimated from recent frame timestamps
    pub fn processing_fps(&self) -> Option<f64> {
        if self.frame_times.len() < 2 {
            return None;
        }
        let avg = mean(&diff(&self.frame_times.to_vec()));
        (avg > 0.0).then(|| 1.0 / avg)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frame_index
    }

    pub fn faceless_frames(&self) -> u64 {
        self.faceless_frames
    }

    pub fn adjust_sensitivity(&mut self, sensitivity: f64) {
        self.machine.adjust_sensitivity(sensitivity);
        self.config.sensitivity = self.machine.sensitivity();
        self.config.microsleep_frames = self.machine.microsleep_frames();
        info!(
            "Sensitivity adjusted to {:.2}, microsleep frames threshold: {}",
            self.config.sensitivity, self.config.microsleep_frames
        );
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            frames_processed: self.frame_index,
            faceless_frames: self.faceless_frames,
            state: self.machine.state(),
            blink_count: self.machine.blink_count(),
            microsleep_count: self.machine.microsleep_count(),
            calibration_progress: self.calibration.progress(),
            calibrated_threshold: self.calibration.threshold(),
            adaptive_threshold: self.analyzer.adaptive_threshold(),
            sensitivity: self.machine.sensitivity(),
            last_sample: self.history.last().copied(),
            perclos: self.perclos(),
            processing_fps: self.processing_fps(),
            recent_blink_frames: self.machine.blink_frames(),
            recent_microsleep_frames: self.machine.microsleep_frame_indices(),
            detected_blink_frames: self.recent_blinks(),
            closure_episodes: self.closure_episodes(),
            classifier: self.machine.classifier().statistics(),
        }
    }

    /// Forget everything observed; configuration and sensitivity are kept
    pub fn reset(&mut self) {
        self.analyzer.reset();
        self.calibration.reset();
        self.history.clear();
        self.machine.reset();
        self.frame_times.clear();
        self.frame_index = 0;
        self.faceless_frames = 0;
        self.last_report = None;
        info!("Detection session reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::Eye;

    /// Landmarks whose EAR is exactly `ear` for both eyes
    fn landmarks_with_ear(ear: f64) -> LandmarkSet {
        let opening = (ear * 100.0).round() as i32;
        let mut set = LandmarkSet::new();
        for eye in Eye::ALL {
            let ids = eye.landmark_ids();
            let dx = if eye == Eye::Right { 0 } else { 300 };
            set.insert(ids[0], (dx, 100));
            set.insert(ids[1], (dx + 30, 100 - opening));
            set.insert(ids[2], (dx + 60, 100 - opening));
            set.insert(ids[3], (dx + 100, 100));
            set.insert(ids[4], (dx + 60, 100));
            set.insert(ids[5], (dx + 30, 100));
        }
        set
    }

    fn session() -> DetectionSession {
        DetectionSession::new(DmsConfig::default()).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = DmsConfig {
            consec_frames: 0,
            ..Default::default()
        };
        assert!(matches!(DetectionSession::new(config), Err(DmsError::Config(_))));
    }

    #[test]
    fn test_faceless_frame_is_a_gap() {
        let mut session = session();
        let analysis = session.process_frame(None, 0.0);
        assert!(!analysis.face_detected);
        assert!(analysis.events.is_empty());
        assert_eq!(session.frames_processed(), 1);
        assert_eq!(session.faceless_frames(), 1);
        assert!(session.history().is_empty());
        assert_eq!(session.calibration().progress(), 0.0);
    }

    #[test]
    fn test_incomplete_landmarks_are_skipped() {
        let mut session = session();
        let mut set = landmarks_with_ear(0.3);
        set.remove(&159);
        let analysis = session.process_frame(Some(&set), 0.0);
        assert!(!analysis.face_detected);
        assert_eq!(session.faceless_frames(), 1);
    }

    #[test]
    fn test_first_frame_reports_then_interval() {
        let mut session = session();
        let open = landmarks_with_ear(0.3);

        let first = session.process_frame(Some(&open), 0.0);
        assert!(matches!(
            first.events.as_slice(),
            [AlertEvent::Report { status: ReportStatus::Off, .. }]
        ));

        let quiet = session.process_frame(Some(&open), 0.5);
        assert!(quiet.events.is_empty());

        let periodic = session.process_frame(Some(&open), 1.0);
        assert_eq!(periodic.events.len(), 1);
    }

    #[test]
    fn test_rapid_blinking_reports_once_per_interval() {
        let config = DmsConfig {
            smoothing_window: 1,
            ..Default::default()
        };
        let mut session = DetectionSession::new(config).unwrap();
        let pattern = [0.10, 0.10, 0.30, 0.30, 0.30];

        let mut report_frames = Vec::new();
        let mut state_changes = 0;
        for i in 0..90u64 {
            let ear = pattern[i as usize % pattern.len()];
            let analysis = session.process_frame(Some(&landmarks_with_ear(ear)), i as f64 / 30.0);
            for event in &analysis.events {
                match event {
                    AlertEvent::Report { state, .. } => {
                        assert_eq!(*state, analysis.state);
                        report_frames.push(analysis.frame_index);
                    }
                    AlertEvent::StateChanged { .. } => state_changes += 1,
                    AlertEvent::MicrosleepAlert { .. } => {}
                }
            }
        }

        // the state flips twice per blink but reports stay on the 1 s grid
        assert!(state_changes > 20, "only {} state changes", state_changes);
        assert_eq!(report_frames, vec![0, 30, 60]);
    }

    #[test]
    fn test_snapshot_segments_history() {
        let config = DmsConfig {
            smoothing_window: 1,
            calibration_frames: 1000,
            ..Default::default()
        };
        let mut session = DetectionSession::new(config).unwrap();

        // 50 open frames give the analyzer baseline (mean 0.30 → threshold 0.225)
        let mut script = vec![0.30; 50];
        script.extend([0.10; 3]);
        script.extend([0.30; 5]);
        // single-frame dip that stays above the 0.21 state threshold
        script.push(0.24);
        script.extend([0.30; 5]);

        for (i, ear) in script.iter().enumerate() {
            session.process_frame(Some(&landmarks_with_ear(*ear)), i as f64 / 30.0);
        }
        assert!((session.analyzer().adaptive_threshold() - 0.225).abs() < 1e-9);

        let snapshot = session.snapshot();
        // run-length blink centred on frame 51, rapid dip at frame 58
        assert_eq!(snapshot.detected_blink_frames, vec![51, 58]);
        assert_eq!(snapshot.detected_blink_frames, session.recent_blinks());
        // only the closure crossed the state machine blink count
        assert_eq!(snapshot.blink_count, 1);

        assert_eq!(snapshot.closure_episodes.len(), 1);
        let episode = snapshot.closure_episodes[0];
        assert_eq!(episode.start_frame, 50);
        assert_eq!(episode.length_frames, 3);
        assert!((episode.duration_s - 0.1).abs() < 1e-12);
        assert_eq!(snapshot.closure_episodes, session.closure_episodes());

        assert!((snapshot.perclos - 3.0 / 64.0).abs() < 1e-12);
    }

    #[test]
    fn test_ear_sample_recorded() {
        let mut session = session();
        let analysis = session.process_frame(Some(&landmarks_with_ear(0.3)), 0.0);
        let sample = analysis.sample.unwrap();
        assert!((sample.average - 0.3).abs() < 1e-12);
        assert_eq!(sample.frame_index, 0);
        assert_eq!(analysis.threshold, Some(0.21));
    }

    #[test]
    fn test_calibration_switches_threshold() {
        let config = DmsConfig {
            calibration_frames: 10,
            ..Default::default()
        };
        let mut session = DetectionSession::new(config).unwrap();
        for i in 0..10 {
            session.process_frame(Some(&landmarks_with_ear(0.3)), i as f64 / 30.0);
        }
        // Flat 0.30 → mean 0.30, std 0 → clamped to 0.28
        assert!((session.current_threshold() - 0.28).abs() < 1e-9);
    }

    #[test]
    fn test_adjust_sensitivity_updates_config() {
        let mut session = session();
        session.adjust_sensitivity(1.0);
        assert_eq!(session.config().microsleep_frames, 10);
        assert_eq!(session.snapshot().sensitivity, 1.0);
    }

    #[test]
    fn test_snapshot_counts() {
        let mut session = session();
        session.process_frame(None, 0.0);
        for i in 1..=3 {
            session.process_frame(Some(&landmarks_with_ear(0.3)), i as f64 / 30.0);
        }
        let snapshot = session.snapshot();
        assert_eq!(snapshot.frames_processed, 4);
        assert_eq!(snapshot.faceless_frames, 1);
        assert_eq!(snapshot.state, AlertState::Normal);
        assert!((snapshot.calibration_progress - 5.0).abs() < 1e-9);
        assert!((snapshot.processing_fps.unwrap() - 30.0).abs() < 1e-6);
        assert_eq!(snapshot.perclos, 0.0);
    }
}
