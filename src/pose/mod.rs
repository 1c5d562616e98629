//! Pick-pose extraction.
//!
//! Turns a grayscale image of dark parts on a light background into a list of
//! `(x, y, angle)` candidates in image pixel coordinates. Converting those to
//! robot coordinates is up to the motion layer.

mod extractor;
mod geometry;

use serde::{Deserialize, Serialize};

pub use extractor::PoseExtractor;
pub use geometry::{fold_angle, oriented_box, polygon_moments, Moments};

/// Threshold for the overhead camera: parts are near-black.
pub const DEFAULT_TOP_THRESHOLD: u8 = 20;
/// Threshold for the detail camera, which sees parts under softer light.
pub const DEFAULT_DETAIL_THRESHOLD: u8 = 70;
/// Contours smaller than this share of the image are noise.
pub const DEFAULT_MIN_AREA_FRACTION: f64 = 0.01;
/// 9×9 square kernel.
pub const DEFAULT_DETAIL_DILATE_RADIUS: u8 = 4;

/// Sign convention for the orientation angle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleConvention {
    /// A long axis whose upper end leans right is positive.
    #[default]
    CounterClockwise,
    /// A long axis whose upper end leans right is negative.
    Clockwise,
}

/// Crop window applied before thresholding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Pixels strictly darker than this are foreground.
    pub threshold: u8,
    pub min_area_fraction: f64,
    /// Square dilation radius applied to the mask; 0 disables it.
    pub dilate_radius: u8,
    pub angle_convention: AngleConvention,
    pub roi: Option<Roi>,
    /// Flip rows after cropping (the detail camera is mounted upside down).
    pub flip_vertical: bool,
}

impl ExtractorConfig {
    pub fn top() -> Self {
        Self {
            threshold: DEFAULT_TOP_THRESHOLD,
            min_area_fraction: DEFAULT_MIN_AREA_FRACTION,
            dilate_radius: 0,
            angle_convention: AngleConvention::CounterClockwise,
            roi: None,
            flip_vertical: false,
        }
    }

    pub fn detail() -> Self {
        Self {
            threshold: DEFAULT_DETAIL_THRESHOLD,
            dilate_radius: DEFAULT_DETAIL_DILATE_RADIUS,
            ..Self::top()
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self::top()
    }
}

/// One detected part: integer centroid and long-axis angle in (-90°, 90°].
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PoseCandidate {
    pub x: i32,
    pub y: i32,
    pub angle_deg: f64,
}

impl PoseCandidate {
    pub fn as_tuple(&self) -> (i32, i32, f64) {
        (self.x, self.y, self.angle_deg)
    }
}
