use image::DynamicImage;

use crate::detect::result::Detection;
use crate::error::StoneResult;

/// Detector capability.
///
/// A detector is loaded once at startup and shared immutably between
/// concurrent pipeline invocations, so `detect` takes `&self` and
/// implementations must be `Send + Sync`. Implementations must not mutate
/// internal state after construction.
///
/// Returning `StoneError::DetectorUnavailable` is the expected way to signal
/// that inference could not run; the pipeline substitutes the synthetic set.
pub trait Detector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a decoded image. Zero detections is a valid answer.
    fn detect(&self, image: &DynamicImage) -> StoneResult<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> StoneResult<()> {
        Ok(())
    }
}
