//! Facial landmark input and eye-point validation

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::DmsError;

/// Landmark id → pixel coordinate for one frame (face-mesh indexing)
pub type LandmarkSet = HashMap<u32, (i32, i32)>;

/// Which eye
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Eye {
    Right,
    Left,
}

impl Eye {
    pub const ALL: [Eye; 2] = [Eye::Right, Eye::Left];

    /// Face-mesh ids of this eye's six EAR points, in [`EyeRole::ALL`] order
    pub const fn landmark_ids(self) -> [u32; 6] {
        match self {
            Eye::Right => [33, 159, 158, 133, 153, 145],
            Eye::Left => [362, 386, 385, 263, 374, 380],
        }
    }

    fn index(self) -> usize {
        match self {
            Eye::Right => 0,
            Eye::Left => 1,
        }
    }
}

/// Role of a point within the six-point eye contour.
///
/// `UpperFirst`/`LowerFirst` and `UpperSecond`/`LowerSecond` are the two
/// vertical pairs; the two corners span the horizontal axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EyeRole {
    CornerStart,
    UpperFirst,
    UpperSecond,
    CornerEnd,
    LowerSecond,
    LowerFirst,
}

impl EyeRole {
    pub const ALL: [EyeRole; 6] = [
        EyeRole::CornerStart,
        EyeRole::UpperFirst,
        EyeRole::UpperSecond,
        EyeRole::CornerEnd,
        EyeRole::LowerSecond,
        EyeRole::LowerFirst,
    ];

    fn index(self) -> usize {
        match self {
            EyeRole::CornerStart => 0,
            EyeRole::UpperFirst => 1,
            EyeRole::UpperSecond => 2,
            EyeRole::CornerEnd => 3,
            EyeRole::LowerSecond => 4,
            EyeRole::LowerFirst => 5,
        }
    }
}

/// The twelve EAR points of both eyes, validated once per frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeLandmarks {
    points: [[(f64, f64); 6]; 2],
}

impl EyeLandmarks {
    /// Pick the required points out of a landmark set.
    ///
    /// Fails with [`DmsError::MissingInput`] naming the first absent id.
    pub fn from_landmarks(landmarks: &LandmarkSet) -> Result<Self, DmsError> {
        let mut points = [[(0.0, 0.0); 6]; 2];
        for eye in Eye::ALL {
            for (slot, id) in eye.landmark_ids().into_iter().enumerate() {
                let (x, y) = landmarks.get(&id).ok_or(DmsError::MissingInput(id))?;
                points[eye.index()][slot] = (f64::from(*x), f64::from(*y));
            }
        }
        Ok(Self { points })
    }

    /// Build directly from per-eye points in [`EyeRole::ALL`] order
    pub fn from_points(right: [(f64, f64); 6], left: [(f64, f64); 6]) -> Self {
        Self {
            points: [right, left],
        }
    }

    /// Coordinate of one role
    pub fn point(&self, eye: Eye, role: EyeRole) -> (f64, f64) {
        self.points[eye.index()][role.index()]
    }
}

/// One frame as delivered by a landmark provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LandmarkFrame {
    /// Capture time, seconds since the Unix epoch
    pub timestamp: f64,
    /// `None` when no face was found
    pub landmarks: Option<LandmarkSet>,
}

/// Source of per-frame landmarks (face mesh, replay file, ...)
pub trait LandmarkProvider {
    /// Next frame, or `None` once the stream has ended
    fn next_frame(&mut self) -> Option<LandmarkFrame>;
}
