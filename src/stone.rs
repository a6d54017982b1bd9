//! Detection normalizer: raw detector output to validated stone records.

use crate::calibration::CalibrationScale;
use crate::detect::{BoundingBox, Detection};
use crate::error::{DetectionDefect, InvalidDetection};
use crate::position::Position;

/// Type recorded when the detector does not label a finding.
pub const DEFAULT_STONE_TYPE: &str = "kidney_stone";

/// One measured finding. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct StoneRecord {
    /// 1-based, in detector output order within one detection pass.
    pub id: u32,
    pub bbox: BoundingBox,
    pub diameter_px: f64,
    /// `diameter_px * scale`, unrounded.
    pub diameter_mm: f64,
    pub confidence: f64,
    pub position: Position,
    pub stone_type: String,
}

/// Stone records plus the detections that were dropped on the way.
#[derive(Clone, Debug, Default)]
pub struct Normalized {
    pub records: Vec<StoneRecord>,
    pub warnings: Vec<InvalidDetection>,
}

fn validate(index: usize, det: &Detection) -> Result<(), InvalidDetection> {
    let defect = if !det.bbox.is_finite() || !det.confidence.is_finite() {
        Some(DetectionDefect::NonFinite)
    } else if det.bbox.width() < 0.0 || det.bbox.height() < 0.0 {
        Some(DetectionDefect::NegativeExtent)
    } else if !(0.0..=1.0).contains(&det.confidence) {
        Some(DetectionDefect::ConfidenceOutOfRange)
    } else {
        None
    };
    match defect {
        Some(defect) => Err(InvalidDetection { index, defect }),
        None => Ok(()),
    }
}

/// Convert detector output into stone records.
///
/// Malformed detections are dropped and reported in `warnings`; ids are
/// assigned 1..=n over the surviving records in detector order.
pub fn normalize(
    detections: &[Detection],
    scale: CalibrationScale,
    image_width: u32,
    image_height: u32,
) -> Normalized {
    let mut out = Normalized::default();
    for (index, det) in detections.iter().enumerate() {
        if let Err(invalid) = validate(index, det) {
            log::warn!("dropping detection: {}", invalid);
            out.warnings.push(invalid);
            continue;
        }
        let diameter_px = det.bbox.width().max(det.bbox.height());
        let (cx, cy) = det.bbox.center();
        let stone_type = det
            .label
            .as_deref()
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .unwrap_or(DEFAULT_STONE_TYPE)
            .to_string();
        out.records.push(StoneRecord {
            id: out.records.len() as u32 + 1,
            bbox: det.bbox,
            diameter_px,
            diameter_mm: scale.to_mm(diameter_px),
            confidence: det.confidence,
            position: Position::classify(cx, cy, image_width, image_height),
            stone_type,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(b: [f64; 4], confidence: f64) -> Detection {
        Detection::new(b.into(), confidence, None)
    }

    #[test]
    fn measures_diameter_from_longest_side() {
        let scale = CalibrationScale::estimate(800, 600);
        let out = normalize(&[det([100.0, 100.0, 150.0, 130.0], 0.85)], scale, 800, 600);
        assert!(out.warnings.is_empty());
        let rec = &out.records[0];
        assert_eq!(rec.id, 1);
        assert_eq!(rec.diameter_px, 50.0);
        assert_eq!(rec.diameter_mm, 50.0 * 0.25);
        assert_eq!(rec.position.label(), "top-left");
        assert_eq!(rec.stone_type, DEFAULT_STONE_TYPE);
    }

    #[test]
    fn diameter_mm_is_exact_product_for_odd_sizes() {
        let scale = CalibrationScale::estimate(1200, 900);
        let boxes = [
            [0.0, 0.0, 13.37, 2.0],
            [5.5, 5.5, 6.1, 99.9],
            [1.0, 1.0, 1.0, 1.0],
        ];
        let dets: Vec<_> = boxes.iter().map(|b| det(*b, 0.5)).collect();
        let out = normalize(&dets, scale, 1200, 900);
        for rec in &out.records {
            assert_eq!(rec.diameter_mm, rec.diameter_px * scale.mm_per_px());
            assert!(rec.diameter_px >= 0.0);
        }
    }

    #[test]
    fn drops_malformed_and_keeps_going() {
        let scale = CalibrationScale::estimate(300, 300);
        let dets = vec![
            det([10.0, 10.0, 5.0, 20.0], 0.9),
            det([10.0, 10.0, 20.0, 20.0], 1.2),
            det([10.0, 10.0, 20.0, 20.0], 0.7),
            det([f64::NAN, 10.0, 20.0, 20.0], 0.7),
            det([200.0, 200.0, 220.0, 230.0], 0.6),
        ];
        let out = normalize(&dets, scale, 300, 300);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].id, 1);
        assert_eq!(out.records[1].id, 2);
        assert_eq!(out.records[1].position.label(), "bottom-right");
        let defects: Vec<_> = out.warnings.iter().map(|w| (w.index, w.defect.clone())).collect();
        assert_eq!(
            defects,
            vec![
                (0, DetectionDefect::NegativeExtent),
                (1, DetectionDefect::ConfidenceOutOfRange),
                (3, DetectionDefect::NonFinite),
            ]
        );
    }

    #[test]
    fn keeps_detector_label_and_defaults_blank_ones() {
        let scale = CalibrationScale::estimate(300, 300);
        let dets = vec![
            Detection::new([0.0, 0.0, 1.0, 1.0].into(), 0.5, Some("staghorn".into())),
            Detection::new([0.0, 0.0, 1.0, 1.0].into(), 0.5, Some("  ".into())),
        ];
        let out = normalize(&dets, scale, 300, 300);
        assert_eq!(out.records[0].stone_type, "staghorn");
        assert_eq!(out.records[1].stone_type, DEFAULT_STONE_TYPE);
    }

    #[test]
    fn confidence_bounds_are_inclusive() {
        let scale = CalibrationScale::estimate(300, 300);
        let out = normalize(
            &[det([0.0, 0.0, 1.0, 1.0], 0.0), det([0.0, 0.0, 1.0, 1.0], 1.0)],
            scale,
            300,
            300,
        );
        assert_eq!(out.records.len(), 2);
    }
}
