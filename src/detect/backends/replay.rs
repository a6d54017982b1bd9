use std::path::Path;

use anyhow::{anyhow, Result};
use image::DynamicImage;

use crate::detect::backend::Detector;
use crate::detect::result::Detection;
use crate::error::StoneResult;

/// Replays a fixed detection set for every image.
///
/// Used to feed externally produced detector output into the pipeline and as
/// a substitutable fake in tests.
#[derive(Clone, Debug, Default)]
pub struct ReplayDetector {
    detections: Vec<Detection>,
}

impl ReplayDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    /// Load a JSON array of `{bbox: [x1,y1,x2,y2], confidence, label?}`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read detections {}: {}", path.display(), e))?;
        let detections: Vec<Detection> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid detections file {}: {}", path.display(), e))?;
        Ok(Self::new(detections))
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }
}

impl Detector for ReplayDetector {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(&self, _image: &DynamicImage) -> StoneResult<Vec<Detection>> {
        Ok(self.detections.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_detections_from_json() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(
            br#"[
                {"bbox": [100, 100, 150, 150], "confidence": 0.85},
                {"bbox": [10, 20, 30, 25], "confidence": 0.4, "label": "staghorn"}
            ]"#,
        )?;
        let detector = ReplayDetector::from_file(file.path())?;
        assert_eq!(detector.detections().len(), 2);
        assert_eq!(detector.detections()[0].label, None);
        assert_eq!(detector.detections()[1].label.as_deref(), Some("staghorn"));

        let out = detector
            .detect(&DynamicImage::new_rgb8(4, 4))
            .map_err(|e| anyhow!(e))?;
        assert_eq!(out, detector.detections());
        Ok(())
    }

    #[test]
    fn rejects_malformed_file() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(b"{\"bbox\": 3}")?;
        assert!(ReplayDetector::from_file(file.path()).is_err());
        Ok(())
    }
}
