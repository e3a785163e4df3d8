//! Detection results and alert events

use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierStatistics;
use crate::ear::EarSample;
use crate::segmenter::ClosureEpisode;
use crate::state::AlertState;

/// Binary telemetry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

impl ReportStatus {
    pub fn from_state(state: AlertState) -> Self {
        if state.is_alerting() {
            ReportStatus::On
        } else {
            ReportStatus::Off
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::On => "ON",
            ReportStatus::Off => "OFF",
        }
    }
}

/// Event emitted by a session for the notification sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertEvent {
    /// Alert state transition
    StateChanged {
        from: AlertState,
        to: AlertState,
        frame_index: u64,
        timestamp: f64,
    },

    /// First frame of a confirmed microsleep
    MicrosleepAlert {
        frame_index: u64,
        timestamp: f64,
        duration_s: f64,
        /// Ensemble score, absent when the duration fallback fired
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
    },

    /// Periodic or on-change telemetry report
    Report {
        status: ReportStatus,
        state: AlertState,
        timestamp: f64,
    },
}

impl AlertEvent {
    pub fn timestamp(&self) -> f64 {
        match self {
            AlertEvent::StateChanged { timestamp, .. }
            | AlertEvent::MicrosleepAlert { timestamp, .. }
            | AlertEvent::Report { timestamp, .. } => *timestamp,
        }
    }

    /// Transition into Blink, Drowsy or Microsleep
    pub fn is_alert_entry(&self) -> bool {
        matches!(
            self,
            AlertEvent::StateChanged { from, to, .. } if to.is_alerting() && !from.is_alerting()
        )
    }
}

/// Per-frame result of [`DetectionSession::process_frame`](crate::DetectionSession::process_frame)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameAnalysis {
    pub frame_index: u64,
    pub timestamp: f64,

    /// Whether the frame carried a usable face
    pub face_detected: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<EarSample>,

    /// Threshold applied this frame
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,

    pub state: AlertState,

    /// A closure reached blink length on this frame
    pub blink: bool,

    /// Closure that ended on this frame
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closure: Option<ClosureEpisode>,

    pub events: Vec<AlertEvent>,
}

impl FrameAnalysis {
    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// The microsleep alert raised this frame, if any
    pub fn microsleep_alert(&self) -> Option<&AlertEvent> {
        self.events
            .iter()
            .find(|e| matches!(e, AlertEvent::MicrosleepAlert { .. }))
    }
}

/// Serializable session summary for status endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub frames_processed: u64,
    pub faceless_frames: u64,
    pub state: AlertState,
    pub blink_count: u64,
    pub microsleep_count: u64,
    pub calibration_progress: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibrated_threshold: Option<f64>,

    pub adaptive_threshold: f64,
    pub sensitivity: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sample: Option<EarSample>,

    /// PERCLOS over the session history
    pub perclos: f64,

    /// Frames per second derived from frame timestamps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_fps: Option<f64>,

    pub recent_blink_frames: Vec<u64>,
    pub recent_microsleep_frames: Vec<u64>,

    /// Blink centres the segmenter finds in the EAR history, including
    /// sharp dips that never crossed the threshold
    pub detected_blink_frames: Vec<u64>,

    /// Closure episodes in the EAR history
    pub closure_episodes: Vec<ClosureEpisode>,

    pub classifier: ClassifierStatistics,
}
