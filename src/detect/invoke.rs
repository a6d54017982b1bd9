//! Bounded-time detector invocation with the synthetic fallback.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{DynamicImage, GenericImageView};

use super::backend::Detector;
use super::backends::synthetic_detections;
use super::result::{DetectionOutcome, DetectionSource};
use crate::error::StoneError;

/// Run `detector` on `image`, substituting the synthetic set when the
/// detector errors, panics, or does not answer within `timeout`.
///
/// With a timeout the detector runs on a helper thread; a detector that
/// overruns keeps running detached and its late answer is discarded. At most
/// `MAX_DETACHED_CALLS` such threads are left behind at once.
/// `None` runs the detector inline with no bound; a panic is still caught.
pub fn detect_or_fallback(
    detector: &Arc<dyn Detector>,
    image: &Arc<DynamicImage>,
    timeout: Option<Duration>,
) -> DetectionOutcome {
    let (width, height) = image.dimensions();
    let started = Instant::now();
    let result = match timeout {
        None => run_inline(detector, image),
        Some(limit) => run_bounded(detector, image, limit),
    };
    log::debug!(
        "detector {} finished in {}ms",
        detector.name(),
        started.elapsed().as_millis()
    );

    match result {
        Ok(detections) => DetectionOutcome {
            detections,
            source: DetectionSource::Model {
                backend: detector.name().to_string(),
            },
        },
        Err(err) => {
            log::warn!(
                "detector {} unavailable, using synthetic detections: {}",
                detector.name(),
                err
            );
            DetectionOutcome {
                detections: synthetic_detections(width, height),
                source: DetectionSource::Fallback {
                    reason: err.to_string(),
                },
            }
        }
    }
}

fn run_inline(
    detector: &Arc<dyn Detector>,
    image: &DynamicImage,
) -> Result<Vec<super::Detection>, StoneError> {
    panic::catch_unwind(AssertUnwindSafe(|| detector.detect(image)))
        .unwrap_or_else(|_| Err(StoneError::DetectorUnavailable("detector panicked".to_string())))
}

/// Overrunning detector calls allowed to keep running detached. Past this,
/// bounded calls fall back immediately instead of spawning another thread.
pub const MAX_DETACHED_CALLS: usize = 8;

static DETACHED_CALLS: AtomicUsize = AtomicUsize::new(0);

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const DETACHED: u8 = 2;

/// Lifecycle of one bounded call, shared with its worker thread.
struct CallState {
    state: AtomicU8,
    detached: &'static AtomicUsize,
}

impl CallState {
    /// Give up on the worker. False when it finished in the meantime.
    fn detach(&self) -> bool {
        self.detached.fetch_add(1, Ordering::SeqCst);
        let won = self
            .state
            .compare_exchange(RUNNING, DETACHED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if !won {
            self.detached.fetch_sub(1, Ordering::SeqCst);
        }
        won
    }
}

/// Marks the call finished when the worker exits, panicking or not.
struct FinishGuard(Arc<CallState>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if self.0.state.swap(FINISHED, Ordering::SeqCst) == DETACHED {
            self.0.detached.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn run_bounded(
    detector: &Arc<dyn Detector>,
    image: &Arc<DynamicImage>,
    limit: Duration,
) -> Result<Vec<super::Detection>, StoneError> {
    run_bounded_with(detector, image, limit, &DETACHED_CALLS, MAX_DETACHED_CALLS)
}

fn run_bounded_with(
    detector: &Arc<dyn Detector>,
    image: &Arc<DynamicImage>,
    limit: Duration,
    detached: &'static AtomicUsize,
    max_detached: usize,
) -> Result<Vec<super::Detection>, StoneError> {
    let stalled = detached.load(Ordering::SeqCst);
    if stalled >= max_detached {
        log::warn!(
            "detector {} has {} overrunning call(s) still running; not starting another",
            detector.name(),
            stalled
        );
        return Err(StoneError::DetectorUnavailable(format!(
            "{} earlier detector call(s) still running",
            stalled
        )));
    }

    let call = Arc::new(CallState {
        state: AtomicU8::new(RUNNING),
        detached,
    });
    let (tx, rx) = mpsc::channel();
    let worker_detector = Arc::clone(detector);
    let worker_image = Arc::clone(image);
    let worker_call = Arc::clone(&call);
    std::thread::Builder::new()
        .name(format!("detect-{}", detector.name()))
        .spawn(move || {
            let _finish = FinishGuard(worker_call);
            let _ = tx.send(worker_detector.detect(&worker_image));
        })
        .map_err(|e| StoneError::DetectorUnavailable(format!("spawn detector thread: {}", e)))?;

    let received = match rx.recv_timeout(limit) {
        Err(RecvTimeoutError::Timeout) if call.detach() => {
            log::warn!(
                "detector {} overran {}ms; {} call(s) now running detached",
                detector.name(),
                limit.as_millis(),
                detached.load(Ordering::SeqCst)
            );
            return Err(StoneError::DetectorUnavailable(format!(
                "timed out after {}ms",
                limit.as_millis()
            )));
        }
        // Finished right at the deadline: the answer is already queued.
        Err(RecvTimeoutError::Timeout) => rx.try_recv().ok(),
        Ok(result) => Some(result),
        Err(RecvTimeoutError::Disconnected) => None,
    };

    match received {
        Some(result) => result.map_err(|err| match err {
            StoneError::DetectorUnavailable(_) => err,
            other => StoneError::DetectorUnavailable(other.to_string()),
        }),
        None => Err(StoneError::DetectorUnavailable(
            "detector thread panicked".to_string(),
        )),
    }
}
