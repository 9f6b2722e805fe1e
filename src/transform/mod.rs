//! Pixel-to-workspace frame transformation.

mod frame;

pub use frame::{
    pixel_distance, reference_point, transform, CalibrationConfig, OffsetUnit, PixelPoint,
    PlanarOffset, TransformError, DEFAULT_GRIPPER_OFFSET_Y, DEFAULT_IMAGE_HEIGHT,
    DEFAULT_IMAGE_WIDTH, DEFAULT_SCALE_PER_PIXEL,
};
