//! Driver Monitoring System (DMS)
//!
//! Microsleep detection from facial landmarks:
//! - Eye aspect ratio (EAR) extraction and smoothing
//! - Per-subject baseline and start-of-session calibration
//! - Blink / closure segmentation and PERCLOS
//! - Five-method microsleep ensemble classifier
//! - Alert state machine with entry/exit hysteresis
//!
//! The crate does no I/O. A [`DetectionSession`] consumes one landmark frame
//! at a time and returns [`AlertEvent`]s for whatever sinks the caller runs.

pub mod analysis;
pub mod analyzer;
pub mod baseline;
pub mod calibration;
pub mod classifier;
pub mod config;
pub mod ear;
pub mod landmarks;
pub mod segmenter;
pub mod session;
pub mod state;

pub use analysis::{AlertEvent, FrameAnalysis, ReportStatus, SessionSnapshot};
pub use analyzer::EyeAnalyzer;
pub use baseline::{AdaptiveBaseline, BaselineStats};
pub use calibration::DetectorCalibration;
pub use classifier::{ClassifierStatistics, MethodScores, MicrosleepClassifier, MicrosleepEvent};
pub use config::DmsConfig;
pub use ear::{EarExtractor, EarMeasurement, EarSample};
pub use landmarks::{Eye, EyeLandmarks, EyeRole, LandmarkFrame, LandmarkProvider, LandmarkSet};
pub use segmenter::{BlinkSegmenter, ClosureEpisode};
pub use session::DetectionSession;
pub use state::{AlertState, AlertStateMachine};

use thiserror::Error;

/// DMS error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DmsError {
    #[error("Landmark {0} missing from frame")]
    MissingInput(u32),

    #[error("Insufficient history: {available} of {required} values")]
    InsufficientHistory { required: usize, available: usize },

    #[error("Calibration incomplete: {collected} of {required} frames")]
    CalibrationIncomplete { collected: usize, required: usize },

    #[error("Configuration error: {0}")]
    Config(String),
}
