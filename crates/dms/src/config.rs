//! DMS configuration

use serde::{Deserialize, Serialize};

use crate::DmsError;

/// Detection pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmsConfig {
    /// EAR threshold used until the calibration window completes
    pub ear_threshold: f64,

    /// Consecutive closed frames that count as a blink
    pub consec_frames: u32,

    /// Consecutive closed frames before the closure is classified
    pub microsleep_frames: u32,

    /// Detection sensitivity (0.0 - 1.0)
    pub sensitivity: f64,

    /// Frames collected by the start-of-session calibration
    pub calibration_frames: usize,

    /// Moving-average window for EAR smoothing
    pub smoothing_window: usize,

    /// Open-eye frames required to leave the microsleep state
    pub state_stability_frames: u32,

    /// Nominal frame rate, converts frame counts to seconds
    pub fps: f64,

    /// Minimum spacing between periodic telemetry reports (seconds)
    pub report_interval_s: f64,

    /// Capacity of the per-session EAR history
    pub ear_history_capacity: usize,
}

impl Default for DmsConfig {
    fn default() -> Self {
        Self {
            ear_threshold: 0.21,
            consec_frames: 2,
            microsleep_frames: 15,
            sensitivity: 0.8,
            calibration_frames: 60,
            smoothing_window: 3,
            state_stability_frames: 5,
            fps: 30.0,
            report_interval_s: 1.0,
            ear_history_capacity: 180,
        }
    }
}

impl DmsConfig {
    /// Create strict config (reacts to shorter closures)
    pub fn strict() -> Self {
        Self {
            ear_threshold: 0.24,
            consec_frames: 2,
            microsleep_frames: 12,
            sensitivity: 0.9,
            ..Default::default()
        }
    }

    /// Create lenient config (fewer false alarms)
    pub fn lenient() -> Self {
        Self {
            ear_threshold: 0.20,
            consec_frames: 3,
            microsleep_frames: 20,
            sensitivity: 0.5,
            ..Default::default()
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), DmsError> {
        if !(self.ear_threshold > 0.0 && self.ear_threshold < 1.0) {
            return Err(DmsError::Config(format!(
                "ear_threshold must be in (0, 1), got {}",
                self.ear_threshold
            )));
        }
        if self.consec_frames == 0 {
            return Err(DmsError::Config("consec_frames must be at least 1".into()));
        }
        if self.microsleep_frames == 0 {
            return Err(DmsError::Config("microsleep_frames must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.sensitivity) {
            return Err(DmsError::Config(format!(
                "sensitivity must be in [0, 1], got {}",
                self.sensitivity
            )));
        }
        if !(self.fps > 0.0) {
            return Err(DmsError::Config(format!("fps must be positive, got {}", self.fps)));
        }
        if self.report_interval_s < 0.0 {
            return Err(DmsError::Config("report_interval_s must not be negative".into()));
        }
        Ok(())
    }
}
