//! Ring Buffer
//!
//! Provides a fixed-capacity buffer that overwrites its oldest entry once
//! full. Used for EAR history, calibration windows and decision windows.

mod buffer;

pub use buffer::{RingBuffer, DEFAULT_CAPACITY};
