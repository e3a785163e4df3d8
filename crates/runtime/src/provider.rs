//! JSON-lines landmark replay
//!
//! One frame per line:
//! `{"timestamp": 1715934600.033, "landmarks": {"33": [412, 288], ...}}`.
//! `landmarks: null` (or absent) marks a frame without a face. Frames without
//! a timestamp are placed one nominal frame interval after the previous one.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};

use dms::{LandmarkFrame, LandmarkProvider, LandmarkSet};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::settings::STDIN_SOURCE;

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    landmarks: Option<HashMap<String, (f64, f64)>>,
}

/// Reads [`LandmarkFrame`]s from any line-oriented reader
pub struct JsonLinesProvider<R> {
    reader: R,
    frame_interval: f64,
    last_timestamp: Option<f64>,
    line: String,
    line_number: u64,
    frames: u64,
    skipped: u64,
}

impl<R: BufRead> JsonLinesProvider<R> {
    pub fn new(reader: R, fps: f64) -> Self {
        Self {
            reader,
            frame_interval: if fps > 0.0 { 1.0 / fps } else { 0.0 },
            last_timestamp: None,
            line: String::new(),
            line_number: 0,
            frames: 0,
            skipped: 0,
        }
    }

    /// Frames delivered so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Lines rejected as malformed
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn parse_line(&mut self, line: &str) -> Option<LandmarkFrame> {
        let raw: RawFrame = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Skipping malformed landmark line {}: {}", self.line_number, e);
                self.skipped += 1;
                return None;
            }
        };

        let timestamp = match (raw.timestamp, self.last_timestamp) {
            (Some(ts), _) => ts,
            (None, Some(prev)) => prev + self.frame_interval,
            (None, None) => 0.0,
        };
        self.last_timestamp = Some(timestamp);

        let landmarks = raw.landmarks.map(|points| self.convert(points));
        Some(LandmarkFrame {
            timestamp,
            landmarks,
        })
    }

    fn convert(&self, points: HashMap<String, (f64, f64)>) -> LandmarkSet {
        points
            .into_iter()
            .filter_map(|(key, (x, y))| match key.parse::<u32>() {
                Ok(id) => Some((id, (x.round() as i32, y.round() as i32))),
                Err(_) => {
                    debug!("Ignoring landmark key {:?} on line {}", key, self.line_number);
                    None
                }
            })
            .collect()
    }
}

impl JsonLinesProvider<Box<dyn BufRead + Send>> {
    /// Open a file path, or stdin for `-`
    pub fn open(source: &str, fps: f64) -> io::Result<Self> {
        let reader: Box<dyn BufRead + Send> = if source == STDIN_SOURCE {
            Box::new(BufReader::new(io::stdin()))
        } else {
            Box::new(BufReader::new(File::open(source)?))
        };
        Ok(Self::new(reader, fps))
    }
}

impl<R: BufRead> LandmarkProvider for JsonLinesProvider<R> {
    fn next_frame(&mut self) -> Option<LandmarkFrame> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    warn!("Landmark source read failed: {}", e);
                    return None;
                }
            }
            self.line_number += 1;

            let line = std::mem::take(&mut self.line);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                self.line = line;
                continue;
            }
            let frame = self.parse_line(trimmed);
            self.line = line;

            if let Some(frame) = frame {
                self.frames += 1;
                return Some(frame);
            }
        }
    }
}

/// Drive a blocking provider on its own thread, forwarding frames over a
/// bounded channel. The channel closes when the stream ends.
pub fn spawn_provider<P>(mut provider: P, capacity: usize) -> io::Result<mpsc::Receiver<LandmarkFrame>>
where
    P: LandmarkProvider + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    std::thread::Builder::new()
        .name("landmark-provider".into())
        .spawn(move || {
            while let Some(frame) = provider.next_frame() {
                if tx.blocking_send(frame).is_err() {
                    debug!("Frame loop gone, stopping provider");
                    return;
                }
            }
            debug!("Landmark stream ended");
        })?;
    Ok(rx)
}
