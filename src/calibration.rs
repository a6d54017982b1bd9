//! Pixel-to-millimeter calibration.
//!
//! Scan metadata (field of view, modality) is not available, so the scale is a
//! coarse step function of the image's longest side. It is recomputed for every
//! image and never cached.

use serde::{Deserialize, Serialize};

/// Longest side above which an image is treated as high resolution.
pub const HIGH_RES_MIN_PX: u32 = 1000;
/// Longest side above which an image is treated as medium resolution.
pub const MEDIUM_RES_MIN_PX: u32 = 500;

pub const HIGH_RES_MM_PER_PX: f64 = 0.15;
pub const MEDIUM_RES_MM_PER_PX: f64 = 0.25;
pub const LOW_RES_MM_PER_PX: f64 = 0.35;

/// Millimeters per pixel for one image.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationScale(f64);

impl CalibrationScale {
    /// Estimate the scale from image dimensions.
    pub fn estimate(width: u32, height: u32) -> Self {
        let longest = width.max(height);
        let mm_per_px = if longest > HIGH_RES_MIN_PX {
            HIGH_RES_MM_PER_PX
        } else if longest > MEDIUM_RES_MIN_PX {
            MEDIUM_RES_MM_PER_PX
        } else {
            LOW_RES_MM_PER_PX
        };
        Self(mm_per_px)
    }

    pub fn mm_per_px(self) -> f64 {
        self.0
    }

    pub fn to_mm(self, px: f64) -> f64 {
        px * self.0
    }
}
