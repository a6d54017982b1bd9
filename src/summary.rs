//! Aggregate summary and severity classification.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::stone::StoneRecord;

/// At most this many stones can still be Normal.
pub const NORMAL_MAX_STONES: usize = 2;
/// Burden (mm) below which a small stone count is Normal.
pub const NORMAL_BURDEN_BELOW_MM: f64 = 5.0;
/// More than this many stones is Severe.
pub const SEVERE_ABOVE_STONES: usize = 4;
/// Burden (mm) above which the finding set is Severe.
pub const SEVERE_BURDEN_ABOVE_MM: f64 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeverityLevel {
    Normal,
    Moderate,
    Severe,
}

impl SeverityLevel {
    /// Classify a finding set by stone count and total burden.
    ///
    /// Rules are applied in order: Normal, then Severe, otherwise Moderate.
    /// An empty set is Normal.
    pub fn classify(total_stones: usize, total_burden_mm: f64) -> Self {
        if total_stones == 0 {
            return SeverityLevel::Normal;
        }
        if total_stones <= NORMAL_MAX_STONES && total_burden_mm < NORMAL_BURDEN_BELOW_MM {
            SeverityLevel::Normal
        } else if total_stones > SEVERE_ABOVE_STONES || total_burden_mm > SEVERE_BURDEN_ABOVE_MM
        {
            SeverityLevel::Severe
        } else {
            SeverityLevel::Moderate
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SeverityLevel::Normal => "Normal",
            SeverityLevel::Moderate => "Moderate",
            SeverityLevel::Severe => "Severe",
        }
    }

    /// Lower-cased mirror of the level, used as `risk_level`.
    pub fn risk_level(self) -> String {
        self.as_str().to_lowercase()
    }

    pub fn description(self) -> &'static str {
        match self {
            SeverityLevel::Normal => "No immediate concerns detected",
            SeverityLevel::Moderate => "Moderate stone burden - regular monitoring recommended",
            SeverityLevel::Severe => {
                "Severe stone burden - immediate medical attention recommended"
            }
        }
    }

    pub fn descriptor(self) -> SeverityDescriptor {
        SeverityDescriptor {
            level: self,
            description: self.description().to_string(),
        }
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityDescriptor {
    pub level: SeverityLevel,
    pub description: String,
}

/// Reduction of one image's stone records. Built once per report and shared
/// by every output view.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateSummary {
    pub total_stones: usize,
    pub total_burden_mm: f64,
    pub largest_stone_mm: f64,
    pub average_confidence: f64,
    pub severity: SeverityLevel,
}

impl AggregateSummary {
    pub fn from_records(records: &[StoneRecord]) -> Self {
        let total_stones = records.len();
        let total_burden_mm: f64 = records.iter().map(|r| r.diameter_mm).sum();
        let largest_stone_mm = records
            .iter()
            .map(|r| r.diameter_mm)
            .fold(0.0_f64, f64::max);
        let average_confidence = if total_stones == 0 {
            0.0
        } else {
            records.iter().map(|r| r.confidence).sum::<f64>() / total_stones as f64
        };
        Self {
            total_stones,
            total_burden_mm,
            largest_stone_mm,
            average_confidence,
            severity: SeverityLevel::classify(total_stones, total_burden_mm),
        }
    }

    pub fn risk_level(&self) -> String {
        self.severity.risk_level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationScale;
    use crate::detect::Detection;
    use crate::stone::normalize;

    fn records(sizes_px: &[f64], confidences: &[f64], w: u32, h: u32) -> Vec<StoneRecord> {
        let dets: Vec<_> = sizes_px
            .iter()
            .zip(confidences)
            .map(|(s, c)| Detection::new([0.0, 0.0, *s, *s].into(), *c, None))
            .collect();
        normalize(&dets, CalibrationScale::estimate(w, h), w, h).records
    }

    #[test]
    fn empty_set_is_normal_with_zeroes() {
        let summary = AggregateSummary::from_records(&[]);
        assert_eq!(summary.total_stones, 0);
        assert_eq!(summary.total_burden_mm, 0.0);
        assert_eq!(summary.largest_stone_mm, 0.0);
        assert_eq!(summary.average_confidence, 0.0);
        assert_eq!(summary.severity, SeverityLevel::Normal);
        assert_eq!(summary.risk_level(), "normal");
    }

    #[test]
    fn aggregates_burden_max_and_mean() {
        // 300x300 -> 0.35 mm/px
        let recs = records(&[10.0, 20.0, 4.0], &[0.9, 0.6, 0.3], 300, 300);
        let summary = AggregateSummary::from_records(&recs);
        assert_eq!(summary.total_stones, 3);
        assert_eq!(summary.total_burden_mm, 10.0 * 0.35 + 20.0 * 0.35 + 4.0 * 0.35);
        assert_eq!(summary.largest_stone_mm, 20.0 * 0.35);
        assert!((summary.average_confidence - 0.6).abs() < 1e-12);
    }

    #[test]
    fn severity_rules_in_order() {
        assert_eq!(SeverityLevel::classify(1, 4.99), SeverityLevel::Normal);
        assert_eq!(SeverityLevel::classify(2, 4.5), SeverityLevel::Normal);
        assert_eq!(SeverityLevel::classify(2, 5.0), SeverityLevel::Moderate);
        assert_eq!(SeverityLevel::classify(3, 1.0), SeverityLevel::Moderate);
        assert_eq!(SeverityLevel::classify(4, 10.0), SeverityLevel::Moderate);
        assert_eq!(SeverityLevel::classify(5, 1.0), SeverityLevel::Severe);
        assert_eq!(SeverityLevel::classify(1, 10.01), SeverityLevel::Severe);
        assert_eq!(SeverityLevel::classify(1, 12.5), SeverityLevel::Severe);
    }

    #[test]
    fn severity_matches_closed_form() {
        for count in 1..8usize {
            for tenth in 0..160 {
                let burden = tenth as f64 / 10.0;
                let level = SeverityLevel::classify(count, burden);
                let normal = count <= 2 && burden < 5.0;
                let severe = !normal && (count > 4 || burden > 10.0);
                let expected = if normal {
                    SeverityLevel::Normal
                } else if severe {
                    SeverityLevel::Severe
                } else {
                    SeverityLevel::Moderate
                };
                assert_eq!(level, expected, "count={count} burden={burden}");
            }
        }
    }

    #[test]
    fn risk_level_mirrors_severity() {
        assert_eq!(SeverityLevel::Moderate.risk_level(), "moderate");
        assert_eq!(SeverityLevel::Severe.risk_level(), "severe");
        assert_eq!(
            SeverityLevel::Severe.descriptor().description,
            SeverityLevel::Severe.description()
        );
    }
}
