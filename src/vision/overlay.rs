//! Debug overlay showing detections relative to the gripper reference point.

use std::fs;
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_text_mut,
};
use imageproc::rect::Rect;
use thiserror::Error;

use super::detection::Detection;
use crate::transform::{pixel_distance, reference_point, CalibrationConfig};

const GRIPPER_COLOR: Rgb<u8> = Rgb([255, 0, 255]);
const CENTERED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const OFF_CENTER_COLOR: Rgb<u8> = Rgb([255, 165, 0]);
const ARROW_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

/// Radius of the circle drawn around the gripper reference point.
const GRIPPER_RADIUS: i32 = 120;

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("Failed to read font: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid font file")]
    InvalidFont,
    #[error("Failed to save image: {0}")]
    Image(#[from] image::ImageError),
}

/// Draws detections onto camera frames. Labels need a font.
pub struct Overlay {
    font: Option<FontVec>,
    scale: PxScale,
}

impl Default for Overlay {
    fn default() -> Self {
        Self {
            font: None,
            scale: PxScale::from(20.0),
        }
    }
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a TrueType/OpenType font for labels.
    pub fn with_font_file(mut self, path: impl AsRef<Path>) -> Result<Self, OverlayError> {
        let data = fs::read(path)?;
        self.font = Some(FontVec::try_from_vec(data).map_err(|_| OverlayError::InvalidFont)?);
        Ok(self)
    }

    /// Draw the gripper reference and every detection. Detections within
    /// `tolerance_px` of the reference are drawn as centered.
    pub fn annotate(
        &self,
        image: &mut RgbImage,
        detections: &[Detection],
        cal: &CalibrationConfig,
        tolerance_px: f64,
    ) {
        let (ref_x, ref_y) = reference_point(cal);
        let reference = (ref_x as i32, ref_y as i32);

        draw_hollow_circle_mut(image, reference, GRIPPER_RADIUS, GRIPPER_COLOR);
        draw_line_segment_mut(
            image,
            (ref_x as f32 - 15.0, ref_y as f32),
            (ref_x as f32 + 15.0, ref_y as f32),
            GRIPPER_COLOR,
        );
        draw_line_segment_mut(
            image,
            (ref_x as f32, ref_y as f32 - 15.0),
            (ref_x as f32, ref_y as f32 + 15.0),
            GRIPPER_COLOR,
        );

        for detection in detections {
            let center = (detection.center.x, detection.center.y);
            let centered = pixel_distance(detection.center, cal) < tolerance_px;
            let color = if centered {
                CENTERED_COLOR
            } else {
                OFF_CENTER_COLOR
            };

            draw_line_segment_mut(
                image,
                (ref_x as f32, ref_y as f32),
                (center.0 as f32, center.1 as f32),
                ARROW_COLOR,
            );
            if let Some(bbox) = detection.bbox {
                let width = bbox.width().max(1) as u32;
                let height = bbox.height().max(1) as u32;
                draw_hollow_rect_mut(image, Rect::at(bbox.x1, bbox.y1).of_size(width, height), color);
            }
            draw_filled_circle_mut(image, center, 8, color);

            if let Some(font) = &self.font {
                let label = format!(
                    "{} ({:.2})",
                    detection.class_label.to_uppercase(),
                    detection.confidence
                );
                let top = detection.bbox.map(|b| b.y1).unwrap_or(center.1) - 30;
                let left = detection.bbox.map(|b| b.x1).unwrap_or(center.0);
                draw_text_mut(image, color, left, top, self.scale, font, &label);
            }
        }
    }

    /// Render detections on a blank frame of the calibrated size and save it.
    pub fn save_snapshot(
        &self,
        path: impl AsRef<Path>,
        detections: &[Detection],
        cal: &CalibrationConfig,
        tolerance_px: f64,
    ) -> Result<(), OverlayError> {
        let width = (cal.image_center.x.max(1) * 2) as u32;
        let height = (cal.image_center.y.max(1) * 2) as u32;
        let mut image = RgbImage::from_pixel(width, height, Rgb([30, 30, 30]));
        self.annotate(&mut image, detections, cal, tolerance_px);
        image.save(path)?;
        Ok(())
    }
}
