use image::{DynamicImage, GenericImageView};

use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Detection};
use crate::error::StoneResult;
use crate::stone::DEFAULT_STONE_TYPE;

pub const SYNTHETIC_BACKEND: &str = "synthetic";

/// The documented fallback detection set for an image of `width` × `height`.
///
/// Two findings at fixed fractions of the image:
/// - `[0.30w, 0.30h, 0.45w, 0.45h]` with confidence 0.85
/// - `[0.55w, 0.20h, 0.65w, 0.30h]` with confidence 0.72
pub fn synthetic_detections(width: u32, height: u32) -> Vec<Detection> {
    let w = width as f64;
    let h = height as f64;
    vec![
        Detection::new(
            BoundingBox::new(w * 0.30, h * 0.30, w * 0.45, h * 0.45),
            0.85,
            Some(DEFAULT_STONE_TYPE.to_string()),
        ),
        Detection::new(
            BoundingBox::new(w * 0.55, h * 0.20, w * 0.65, h * 0.30),
            0.72,
            Some(DEFAULT_STONE_TYPE.to_string()),
        ),
    ]
}

/// Deterministic detector for development without model weights.
#[derive(Clone, Copy, Debug, Default)]
pub struct SyntheticDetector;

impl SyntheticDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Detector for SyntheticDetector {
    fn name(&self) -> &'static str {
        SYNTHETIC_BACKEND
    }

    fn detect(&self, image: &DynamicImage) -> StoneResult<Vec<Detection>> {
        let (width, height) = image.dimensions();
        Ok(synthetic_detections(width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_set_scales_with_image() {
        let image = DynamicImage::new_rgb8(1000, 500);
        let detections = SyntheticDetector::new().detect(&image).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].bbox, BoundingBox::new(300.0, 150.0, 450.0, 225.0));
        assert_eq!(detections[0].confidence, 0.85);
        assert_eq!(detections[1].bbox, BoundingBox::new(550.0, 100.0, 650.0, 150.0));
        assert_eq!(detections[1].confidence, 0.72);
        assert_eq!(detections, synthetic_detections(1000, 500));
    }
}
