//! Detection records and the seams to the camera and the detection model.

use std::collections::HashMap;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::config::DETECTOR_ALIASES;
use crate::transform::PixelPoint;

/// Default minimum detector confidence.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.35;

/// Default minimum bounding box area in pixels.
pub const DEFAULT_MIN_AREA: i64 = 5000;

/// Axis-aligned bounding box in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn center(&self) -> PixelPoint {
        PixelPoint::new((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }
}

/// A single object found in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_label: String,
    pub center: PixelPoint,
    pub confidence: f32,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
}

impl Detection {
    pub fn new(class_label: impl Into<String>, center: PixelPoint, confidence: f32) -> Self {
        Self {
            class_label: class_label.into(),
            center,
            confidence,
            bbox: None,
        }
    }

    /// Detection centered on its bounding box.
    pub fn from_bbox(class_label: impl Into<String>, bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            class_label: class_label.into(),
            center: bbox.center(),
            confidence,
            bbox: Some(bbox),
        }
    }
}

/// Set of object classes to act on, with detector label aliases.
///
/// Some requested objects have no class of their own in the detector's label
/// set (a can is reported as a cup or a bottle). Aliased labels are searched
/// instead and reported back under the requested name.
#[derive(Debug, Clone, Default)]
pub struct ClassFilter {
    targets: Vec<String>,
    aliases: HashMap<String, String>,
}

impl ClassFilter {
    /// Filter for `targets` using the built-in detector aliases.
    pub fn new<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_aliases(targets, &DETECTOR_ALIASES)
    }

    /// Filter for `targets` with a custom alias table.
    pub fn with_aliases<I, S>(targets: I, aliases: &HashMap<&'static str, Vec<&'static str>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = Self::default();
        for target in targets {
            let target = target.as_ref().trim().to_lowercase();
            if !target.is_empty() && !filter.targets.contains(&target) {
                filter.targets.push(target);
            }
        }

        for target in &filter.targets {
            if let Some(labels) = aliases.get(target.as_str()) {
                for label in labels {
                    // A label that is itself requested keeps its own name.
                    if !filter.targets.iter().any(|t| t == label) {
                        filter.aliases.insert(label.to_string(), target.clone());
                    }
                }
            }
        }
        filter
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Labels to ask the detector for.
    pub fn search_classes(&self) -> Vec<String> {
        let mut classes: Vec<String> = self
            .targets
            .iter()
            .filter(|t| !self.aliases.values().any(|v| v == *t))
            .cloned()
            .collect();
        classes.extend(self.aliases.keys().cloned());
        classes.sort();
        classes.dedup();
        classes
    }

    /// Requested name for a detector label, or `None` if it is not wanted.
    pub fn canonical(&self, label: &str) -> Option<String> {
        let label = label.to_lowercase();
        if self.targets.contains(&label) {
            return Some(label);
        }
        self.aliases.get(&label).cloned()
    }
}

/// Confidence and size thresholds applied to raw detector output.
#[derive(Debug, Clone, Copy)]
pub struct DetectionFilter {
    pub confidence_threshold: f32,
    pub min_area: i64,
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            min_area: DEFAULT_MIN_AREA,
        }
    }
}

impl DetectionFilter {
    pub fn accepts(&self, detection: &Detection) -> bool {
        if detection.confidence < self.confidence_threshold {
            return false;
        }
        match detection.bbox {
            Some(bbox) => bbox.area() >= self.min_area,
            None => true,
        }
    }
}

/// Produces the detections of one camera frame.
///
/// Results are unordered and carry no identity between calls.
pub trait DetectionSource {
    fn poll(&mut self, filter: &ClassFilter) -> Vec<Detection>;
}

impl<T: DetectionSource + ?Sized> DetectionSource for Box<T> {
    fn poll(&mut self, filter: &ClassFilter) -> Vec<Detection> {
        (**self).poll(filter)
    }
}

/// Camera frame acquisition.
pub trait FrameSource {
    /// Next frame, or `None` if capture failed.
    fn next_frame(&mut self) -> Option<RgbImage>;
}

/// Object detection model.
pub trait Detector {
    /// Detect objects of the given detector classes in a frame.
    fn detect(&mut self, frame: &RgbImage, classes: &[String]) -> Vec<Detection>;
}

/// Camera and detector combined into a [`DetectionSource`].
pub struct CameraPipeline<F, D> {
    frames: F,
    detector: D,
    filter: DetectionFilter,
    failed_frames: u64,
}

impl<F: FrameSource, D: Detector> CameraPipeline<F, D> {
    pub fn new(frames: F, detector: D) -> Self {
        Self {
            frames,
            detector,
            filter: DetectionFilter::default(),
            failed_frames: 0,
        }
    }

    pub fn with_filter(mut self, filter: DetectionFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Number of frames that could not be captured.
    pub fn failed_frames(&self) -> u64 {
        self.failed_frames
    }
}

impl<F: FrameSource, D: Detector> DetectionSource for CameraPipeline<F, D> {
    fn poll(&mut self, filter: &ClassFilter) -> Vec<Detection> {
        let Some(frame) = self.frames.next_frame() else {
            self.failed_frames += 1;
            tracing::warn!("Frame capture failed ({} total)", self.failed_frames);
            return Vec::new();
        };

        let classes = filter.search_classes();
        self.detector
            .detect(&frame, &classes)
            .into_iter()
            .filter(|d| self.filter.accepts(d))
            .filter_map(|mut d| {
                d.class_label = filter.canonical(&d.class_label)?;
                Some(d)
            })
            .collect()
    }
}
