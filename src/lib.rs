//! StoneSense report kernel
//!
//! Turns object-detection output over a kidney scan into a structured report:
//! per-stone measurements, an aggregate severity assessment, recommendations,
//! and three synchronized views (JSON, annotated image, PDF).
//!
//! # Pipeline
//!
//! image dimensions → `calibration` → scale;
//! (detections, scale) → `stone::normalize` → records (with `position` labels);
//! records → `summary` → severity → `recommend`;
//! everything → `report` (JSON, PDF) plus `annotate` (image).
//!
//! One `AggregateSummary` is computed per image and every view reads from it.
//!
//! # Module Structure
//!
//! - `detect`: detector capability, backends, bounded invocation with synthetic fallback
//! - `input`: upload validation and decoding
//! - `pipeline`: single-image and batch processing
//! - `storage`: atomic artifact persistence
//! - `advice`: findings context and advisors
//! - `patients`: patient records behind a repository trait
//! - `config`: file + environment configuration

pub mod advice;
pub mod annotate;
pub mod calibration;
pub mod config;
pub mod detect;
pub mod error;
pub mod input;
pub mod patients;
pub mod pipeline;
pub mod position;
pub mod recommend;
pub mod report;
pub mod stone;
pub mod storage;
pub mod summary;

pub use calibration::CalibrationScale;
pub use config::ReportConfig;
pub use detect::{BoundingBox, Detection, DetectionSource, Detector, DetectorRegistry};
pub use error::{StoneError, StoneResult};
pub use input::ImageInput;
pub use pipeline::{Analysis, Pipeline};
pub use position::Position;
pub use report::{Report, ReportDocument};
pub use stone::StoneRecord;
pub use summary::{AggregateSummary, SeverityLevel};
