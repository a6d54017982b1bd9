pub mod replay;
pub mod synthetic;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use replay::ReplayDetector;
pub use synthetic::{synthetic_detections, SyntheticDetector, SYNTHETIC_BACKEND};

#[cfg(feature = "backend-tract")]
pub use tract::TractDetector;
