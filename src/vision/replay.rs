//! Detection source replaying a recorded session.
//!
//! A recording is a JSON array of frames, each frame an array of detections:
//!
//! ```json
//! [
//!   [{"class_label": "mouse", "center": {"x": 700, "y": 420}, "confidence": 0.82}],
//!   []
//! ]
//! ```

use std::collections::VecDeque;
use std::path::Path;

use thiserror::Error;

use super::detection::{ClassFilter, Detection, DetectionSource};

/// Replay loading errors.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to read recording: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid recording: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Plays back recorded frames one per poll, then reports empty frames.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    frames: VecDeque<Vec<Detection>>,
}

impl ReplaySource {
    pub fn new(frames: impl IntoIterator<Item = Vec<Detection>>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ReplayError> {
        let frames: Vec<Vec<Detection>> = serde_json::from_str(json)?;
        Ok(Self::new(frames))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let source = Self::from_json(&content)?;
        tracing::info!(
            "Loaded {} recorded frames from {}",
            source.remaining(),
            path.as_ref().display()
        );
        Ok(source)
    }

    /// Frames not yet played back.
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl DetectionSource for ReplaySource {
    fn poll(&mut self, filter: &ClassFilter) -> Vec<Detection> {
        let Some(frame) = self.frames.pop_front() else {
            return Vec::new();
        };
        frame
            .into_iter()
            .filter_map(|mut d| {
                d.class_label = filter.canonical(&d.class_label)?;
                Some(d)
            })
            .collect()
    }
}
