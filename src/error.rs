//! Error taxonomy for the report pipeline.

use thiserror::Error;

/// Why a single raw detection was rejected by the normalizer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetectionDefect {
    NegativeExtent,
    ConfidenceOutOfRange,
    NonFinite,
}

impl std::fmt::Display for DetectionDefect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DetectionDefect::NegativeExtent => "bbox has negative width or height",
            DetectionDefect::ConfidenceOutOfRange => "confidence outside [0, 1]",
            DetectionDefect::NonFinite => "bbox or confidence is not finite",
        };
        f.write_str(text)
    }
}

/// A malformed detection. Dropped from the batch and surfaced as a warning.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("invalid detection at detector index {index}: {defect}")]
pub struct InvalidDetection {
    /// Zero-based position in the detector output.
    pub index: usize,
    pub defect: DetectionDefect,
}

#[derive(Debug, Error)]
pub enum StoneError {
    /// Malformed, oversized or undecodable upload. Fatal for the request.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    InvalidDetection(#[from] InvalidDetection),

    /// Detector timed out or could not run. The pipeline answers this with
    /// the synthetic detection set.
    #[error("detector unavailable: {0}")]
    DetectorUnavailable(String),

    /// Annotation could not open or encode the image. Fatal for the
    /// annotation/PDF branch only.
    #[error("image decode failed: {0}")]
    ImageDecode(String),

    /// PDF assembly failed. Any JSON report already produced stays valid.
    #[error("report generation failed: {0}")]
    ReportGeneration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StoneError {
    /// True for failures caused by the caller's input (4xx-equivalent).
    pub fn is_client_error(&self) -> bool {
        matches!(self, StoneError::InvalidInput(_))
    }
}

pub type StoneResult<T> = std::result::Result<T, StoneError>;
