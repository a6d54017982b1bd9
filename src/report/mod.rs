//! Report assembly and the JSON view.
//!
//! A `Report` owns the one `AggregateSummary` computed for an image. The JSON
//! document and the PDF are both projections of it; neither recomputes burden
//! or severity, and both apply the same display rounding from `format`.

pub mod format;
pub mod pdf;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationScale;
use crate::detect::BoundingBox;
use crate::error::StoneResult;
use crate::position::Position;
use crate::stone::StoneRecord;
use crate::summary::{AggregateSummary, SeverityDescriptor};

pub const JPEG_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

pub fn jpeg_data_uri(jpeg: &[u8]) -> String {
    format!(
        "{}{}",
        JPEG_DATA_URI_PREFIX,
        general_purpose::STANDARD.encode(jpeg)
    )
}

/// Facts about the processed image and how it was measured.
#[derive(Clone, Debug, PartialEq)]
pub struct ReportMetadata {
    pub filename: Option<String>,
    pub filesize: Option<u64>,
    pub filetype: Option<String>,
    pub image_width: u32,
    pub image_height: u32,
    pub scale: CalibrationScale,
    pub detector: String,
    pub synthetic_fallback: bool,
    pub image_sha256: Option<String>,
}

/// One processed image.
#[derive(Clone, Debug)]
pub struct Report {
    pub records: Vec<StoneRecord>,
    pub summary: AggregateSummary,
    pub recommendations: Vec<String>,
    /// `data:image/jpeg;base64,...` when the annotated image is embedded.
    pub annotated_image: Option<String>,
    pub analysis_timestamp: DateTime<Utc>,
    pub metadata: ReportMetadata,
}

impl Report {
    pub fn assemble(
        records: Vec<StoneRecord>,
        summary: AggregateSummary,
        recommendations: Vec<String>,
        metadata: ReportMetadata,
        analysis_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            records,
            summary,
            recommendations,
            annotated_image: None,
            analysis_timestamp,
            metadata,
        }
    }

    pub fn with_annotated_jpeg(mut self, jpeg: &[u8]) -> Self {
        self.annotated_image = Some(jpeg_data_uri(jpeg));
        self
    }

    pub fn timestamp_string(&self) -> String {
        self.analysis_timestamp
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn severity_descriptor(&self) -> SeverityDescriptor {
        self.summary.severity.descriptor()
    }

    /// Project the report into its machine-readable form.
    pub fn to_document(&self) -> ReportDocument {
        let detections = self
            .records
            .iter()
            .map(|r| DetectionEntry {
                id: r.id,
                bbox: r.bbox,
                confidence: r.confidence,
                diameter_px: format::round2(r.diameter_px),
                diameter_mm: format::round2(r.diameter_mm),
                stone_type: r.stone_type.clone(),
                position: r.position,
            })
            .collect();
        let meta = &self.metadata;
        ReportDocument {
            detections,
            summary: SummaryEntry {
                total_stones: self.summary.total_stones,
                total_burden_mm: format::round2(self.summary.total_burden_mm),
                largest_stone_mm: format::round2(self.summary.largest_stone_mm),
                average_confidence: self.summary.average_confidence,
                risk_level: self.summary.risk_level(),
                severity: Some(self.severity_descriptor()),
            },
            recommendations: self.recommendations.clone(),
            annotated_image: self.annotated_image.clone(),
            analysis_timestamp: self.timestamp_string(),
            metadata: MetadataEntry {
                filename: meta.filename.clone(),
                filesize: meta.filesize,
                filetype: meta.filetype.clone(),
                image_dimensions: format!("{}x{}", meta.image_width, meta.image_height),
                scale_factor_mm_per_pixel: meta.scale.mm_per_px(),
                detector: meta.detector.clone(),
                synthetic_fallback: meta.synthetic_fallback,
                image_sha256: meta.image_sha256.clone(),
            },
        }
    }

    pub fn to_json_pretty(&self) -> StoneResult<String> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionEntry {
    pub id: u32,
    pub bbox: BoundingBox,
    pub confidence: f64,
    pub diameter_px: f64,
    pub diameter_mm: f64,
    #[serde(rename = "type")]
    pub stone_type: String,
    pub position: Position,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub total_stones: usize,
    pub total_burden_mm: f64,
    pub largest_stone_mm: f64,
    pub average_confidence: f64,
    pub risk_level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<SeverityDescriptor>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filetype: Option<String>,
    pub image_dimensions: String,
    pub scale_factor_mm_per_pixel: f64,
    pub detector: String,
    pub synthetic_fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_sha256: Option<String>,
}

/// JSON view of a report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub detections: Vec<DetectionEntry>,
    pub summary: SummaryEntry,
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotated_image: Option<String>,
    pub analysis_timestamp: String,
    pub metadata: MetadataEntry,
}

impl ReportDocument {
    pub fn from_json(raw: &str) -> StoneResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
