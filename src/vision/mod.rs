//! Object detection interfaces and sources.

mod detection;
mod overlay;
mod replay;

pub use detection::{
    BoundingBox, CameraPipeline, ClassFilter, Detection, DetectionFilter, DetectionSource,
    Detector, FrameSource, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MIN_AREA,
};
pub use overlay::{Overlay, OverlayError};
pub use replay::{ReplayError, ReplaySource};
