//! Blink and closure-episode segmentation over EAR sequences

use feature_engine::{count_below, longest_run_below};
use serde::{Deserialize, Serialize};

use crate::baseline::BaselineStats;

/// Shortest below-threshold run accepted as a blink
pub const MIN_BLINK_FRAMES: usize = 2;
/// Longest below-threshold run still accepted as a blink
pub const MAX_BLINK_FRAMES: usize = 7;
/// Default PERCLOS window (~30 s at 30 fps)
pub const DEFAULT_PERCLOS_WINDOW: usize = 900;
/// Default run length for a microsleep candidate
pub const DEFAULT_MICROSLEEP_MIN_FRAMES: usize = 15;

const RAPID_BLINK_BASELINE_RATIO: f64 = 0.85;
const RAPID_BLINK_STD_MULTIPLIER: f64 = 1.5;

/// Maximal run of frames below threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClosureEpisode {
    pub start_frame: u64,
    pub length_frames: u32,
    pub duration_s: f64,
}

impl ClosureEpisode {
    pub fn new(start_frame: u64, length_frames: u32, fps: f64) -> Self {
        let duration_s = if fps > 0.0 {
            f64::from(length_frames) / fps
        } else {
            0.0
        };
        Self {
            start_frame,
            length_frames,
            duration_s,
        }
    }
}

/// Two-pass blink detector
#[derive(Debug, Clone, Copy)]
pub struct BlinkSegmenter {
    pub min_blink_frames: usize,
    pub max_blink_frames: usize,
}

impl Default for BlinkSegmenter {
    fn default() -> Self {
        Self {
            min_blink_frames: MIN_BLINK_FRAMES,
            max_blink_frames: MAX_BLINK_FRAMES,
        }
    }
}

impl BlinkSegmenter {
    /// Indices of detected blink centres.
    ///
    /// Pass 1 accepts below-threshold runs of `min..=max` frames (a run still
    /// open at the end included) and reports `start + len / 2`. Pass 2 needs a
    /// baseline: it adds strict local minima that dip under 85% of the
    /// baseline with a drop larger than 1.5σ, skipping any index equal or
    /// adjacent to one already reported. Pass 1 indices come first.
    pub fn detect_blinks(
        &self,
        values: &[f64],
        threshold: f64,
        baseline: Option<BaselineStats>,
    ) -> Vec<usize> {
        if values.is_empty() {
            return Vec::new();
        }

        let mut blinks = Vec::new();
        let mut run_start = 0;
        let mut run_len = 0;

        for (i, &ear) in values.iter().enumerate() {
            if ear < threshold {
                if run_len == 0 {
                    run_start = i;
                }
                run_len += 1;
            } else {
                if self.is_blink_length(run_len) {
                    blinks.push(run_start + run_len / 2);
                }
                run_len = 0;
            }
        }
        if self.is_blink_length(run_len) {
            blinks.push(run_start + run_len / 2);
        }

        if let Some(baseline) = baseline {
            if values.len() > 3 {
                for i in 1..values.len() - 1 {
                    let near_known = blinks
                        .iter()
                        .any(|&b| b == i || b + 1 == i || b == i + 1);
                    if near_known {
                        continue;
                    }

                    let (prev, cur, next) = (values[i - 1], values[i], values[i + 1]);
                    if cur < prev
                        && cur < next
                        && cur < baseline.mean * RAPID_BLINK_BASELINE_RATIO
                        && prev - cur > baseline.std_dev * RAPID_BLINK_STD_MULTIPLIER
                    {
                        blinks.push(i);
                    }
                }
            }
        }

        blinks
    }

    fn is_blink_length(&self, run_len: usize) -> bool {
        run_len >= self.min_blink_frames && run_len <= self.max_blink_frames
    }
}

/// Fraction of the most recent `window` values strictly below `threshold`
pub fn calculate_perclos(values: &[f64], threshold: f64, window: usize) -> f64 {
    let recent = &values[values.len().saturating_sub(window)..];
    if recent.is_empty() {
        return 0.0;
    }
    count_below(recent, threshold) as f64 / recent.len() as f64
}

/// True when the longest below-threshold run reaches `min_frames`
pub fn is_microsleep_candidate(values: &[f64], threshold: f64, min_frames: usize) -> bool {
    if values.is_empty() || values.len() < min_frames {
        return false;
    }
    longest_run_below(values, threshold) >= min_frames
}

/// Every maximal below-threshold run, indexed from `first_frame`
pub fn closure_episodes(values: &[f64], threshold: f64, fps: f64, first_frame: u64) -> Vec<ClosureEpisode> {
    let mut episodes = Vec::new();
    let mut run: Option<(usize, u32)> = None;

    for (i, &ear) in values.iter().enumerate() {
        if ear < threshold {
            let (_, len) = run.get_or_insert((i, 0));
            *len += 1;
        } else if let Some((start, len)) = run.take() {
            episodes.push(ClosureEpisode::new(first_frame + start as u64, len, fps));
        }
    }
    if let Some((start, len)) = run {
        episodes.push(ClosureEpisode::new(first_frame + start as u64, len, fps));
    }

    episodes
}
