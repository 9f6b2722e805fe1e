//! Conversion of camera detections into planar robot targets.
//!
//! The camera is mounted on the gripper looking down, so an object seen to the
//! right of the gripper reference pixel generally requires the arm to move in
//! the opposite robot direction. The per-axis inversion flags capture this and
//! are always applied to the pixel offset, before it is scaled into millimetres.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::robot::RobotPose;

/// Default camera frame width in pixels.
pub const DEFAULT_IMAGE_WIDTH: u32 = 1280;

/// Default camera frame height in pixels.
pub const DEFAULT_IMAGE_HEIGHT: u32 = 720;

/// Default millimetres travelled per pixel of image offset.
pub const DEFAULT_SCALE_PER_PIXEL: f64 = 0.35;

/// Default vertical distance (pixels) between the image center and the gripper fingers.
pub const DEFAULT_GRIPPER_OFFSET_Y: f64 = 80.0;

/// Frame transformation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("Offset expressed in {found:?} units, expected {expected:?}")]
    WrongUnit {
        expected: OffsetUnit,
        found: OffsetUnit,
    },
    #[error("Scale per pixel must be finite and positive, got {0}")]
    InvalidScale(f64),
}

/// A detection center in image coordinates (origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

impl PixelPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Space in which a [`PlanarOffset`] is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffsetUnit {
    /// Camera pixels.
    Pixel,
    /// Workspace millimetres.
    Length,
}

/// A planar displacement tagged with the space it is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanarOffset {
    pub dx: f64,
    pub dy: f64,
    pub unit: OffsetUnit,
}

impl PlanarOffset {
    /// Create a pixel-space offset.
    pub fn pixel(dx: f64, dy: f64) -> Self {
        Self {
            dx,
            dy,
            unit: OffsetUnit::Pixel,
        }
    }

    /// Create a length-space offset.
    pub fn length(dx: f64, dy: f64) -> Self {
        Self {
            dx,
            dy,
            unit: OffsetUnit::Length,
        }
    }

    /// Flip the selected axes. Only valid while the offset is still in pixels.
    pub fn inverted(self, invert_x: bool, invert_y: bool) -> Result<Self, TransformError> {
        self.expect_unit(OffsetUnit::Pixel)?;
        Ok(Self {
            dx: if invert_x { -self.dx } else { self.dx },
            dy: if invert_y { -self.dy } else { self.dy },
            unit: OffsetUnit::Pixel,
        })
    }

    /// Scale a pixel offset into workspace millimetres.
    pub fn to_length(self, scale_per_pixel: f64) -> Result<Self, TransformError> {
        self.expect_unit(OffsetUnit::Pixel)?;
        Ok(Self::length(self.dx * scale_per_pixel, self.dy * scale_per_pixel))
    }

    /// Euclidean magnitude of the offset.
    pub fn norm(&self) -> f64 {
        self.dx.hypot(self.dy)
    }

    fn expect_unit(&self, expected: OffsetUnit) -> Result<(), TransformError> {
        if self.unit == expected {
            Ok(())
        } else {
            Err(TransformError::WrongUnit {
                expected,
                found: self.unit,
            })
        }
    }
}

/// Camera-to-gripper calibration constants.
///
/// Supplied externally and immutable for the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Millimetres per pixel at the working distance.
    pub scale_per_pixel: f64,
    /// Object to the right in the image means the arm moves towards -X.
    pub invert_x: bool,
    /// Object lower in the image means the arm moves towards -Y.
    pub invert_y: bool,
    /// Position of the gripper fingers relative to the image center, in pixels.
    pub gripper_offset: PlanarOffset,
    /// Image center (reference pixel origin).
    pub image_center: PixelPoint,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            scale_per_pixel: DEFAULT_SCALE_PER_PIXEL,
            invert_x: true,
            invert_y: false,
            gripper_offset: PlanarOffset::pixel(0.0, DEFAULT_GRIPPER_OFFSET_Y),
            image_center: PixelPoint::new(
                (DEFAULT_IMAGE_WIDTH / 2) as i32,
                (DEFAULT_IMAGE_HEIGHT / 2) as i32,
            ),
        }
    }
}

impl CalibrationConfig {
    pub fn with_scale(mut self, scale_per_pixel: f64) -> Self {
        self.scale_per_pixel = scale_per_pixel;
        self
    }

    pub fn with_inversion(mut self, invert_x: bool, invert_y: bool) -> Self {
        self.invert_x = invert_x;
        self.invert_y = invert_y;
        self
    }

    pub fn with_gripper_offset(mut self, dx: f64, dy: f64) -> Self {
        self.gripper_offset = PlanarOffset::pixel(dx, dy);
        self
    }

    /// Derive the image center from the frame resolution.
    pub fn with_image_size(mut self, width: u32, height: u32) -> Self {
        self.image_center = PixelPoint::new((width / 2) as i32, (height / 2) as i32);
        self
    }

    /// Check the constants before a run.
    pub fn validate(&self) -> Result<(), TransformError> {
        if !self.scale_per_pixel.is_finite() || self.scale_per_pixel <= 0.0 {
            return Err(TransformError::InvalidScale(self.scale_per_pixel));
        }
        self.gripper_offset.expect_unit(OffsetUnit::Pixel)
    }
}

/// Pixel location directly beneath the gripper.
pub fn reference_point(cal: &CalibrationConfig) -> (f64, f64) {
    (
        cal.image_center.x as f64 + cal.gripper_offset.dx,
        cal.image_center.y as f64 + cal.gripper_offset.dy,
    )
}

/// Pixel distance between a detection and the gripper reference point.
pub fn pixel_distance(detection: PixelPoint, cal: &CalibrationConfig) -> f64 {
    raw_offset(detection, cal).norm()
}

fn raw_offset(detection: PixelPoint, cal: &CalibrationConfig) -> PlanarOffset {
    let (ref_x, ref_y) = reference_point(cal);
    PlanarOffset::pixel(detection.x as f64 - ref_x, detection.y as f64 - ref_y)
}

/// Compute the planar robot target that would put `detection` under the gripper.
///
/// Order matters: the offset is inverted while still in pixel units and only
/// then scaled into millimetres. The returned pose keeps `current.z`.
pub fn transform(
    detection: PixelPoint,
    cal: &CalibrationConfig,
    current: &RobotPose,
) -> Result<RobotPose, TransformError> {
    cal.validate()?;

    let offset = raw_offset(detection, cal)
        .inverted(cal.invert_x, cal.invert_y)?
        .to_length(cal.scale_per_pixel)?;

    Ok(RobotPose::new(
        current.x + offset.dx,
        current.y + offset.dy,
        current.z,
    ))
}
