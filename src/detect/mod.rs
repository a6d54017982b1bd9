mod backend;
pub mod backends;
mod invoke;
mod registry;
mod result;

pub use backend::Detector;
pub use backends::{synthetic_detections, ReplayDetector, SyntheticDetector};
pub use invoke::{detect_or_fallback, MAX_DETACHED_CALLS};
pub use registry::DetectorRegistry;
pub use result::{BoundingBox, Detection, DetectionOutcome, DetectionSource};
