use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates, serialized as `[x1, y1, x2, y2]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f64 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        if x2 > x1 && y2 > y1 {
            (x2 - x1) * (y2 - y1)
        } else {
            0.0
        }
    }

    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One raw finding as reported by a detector. Not yet validated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f64,
    #[serde(default, alias = "class", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f64, label: Option<String>) -> Self {
        Self {
            bbox,
            confidence,
            label,
        }
    }
}

/// Where a detection set came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetectionSource {
    /// Produced by the named detector backend.
    Model { backend: String },
    /// The detector was unavailable; the synthetic set was substituted.
    Fallback { reason: String },
}

impl DetectionSource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, DetectionSource::Fallback { .. })
    }

    pub fn backend_name(&self) -> &str {
        match self {
            DetectionSource::Model { backend } => backend,
            DetectionSource::Fallback { .. } => super::backends::SYNTHETIC_BACKEND,
        }
    }
}

/// Detector output plus its provenance.
#[derive(Clone, Debug)]
pub struct DetectionOutcome {
    pub detections: Vec<Detection>,
    pub source: DetectionSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_serializes_as_array() {
        let det = Detection::new(BoundingBox::new(1.0, 2.0, 3.5, 4.0), 0.5, None);
        let json = serde_json::to_string(&det).unwrap();
        assert_eq!(json, r#"{"bbox":[1.0,2.0,3.5,4.0],"confidence":0.5}"#);
        let back: Detection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, det);
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
        assert_eq!(a.iou(&a), 1.0);
        let c = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&c) - 50.0 / 150.0).abs() < 1e-12);
    }
}
