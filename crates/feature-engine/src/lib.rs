//! Feature Engineering Engine
//!
//! Statistical helpers over EAR signal windows: moments, first differences,
//! run lengths and sigma-based outlier filtering.

mod outlier;
mod statistics;

pub use outlier::{OutlierFilter, SampleStats};
pub use statistics::{
    count_below, diff, longest_run_below, mean, sign_bit_changes, std_dev, StatisticalFeatures,
};
