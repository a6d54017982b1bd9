//! One image in, one report out.
//!
//! `Pipeline::process` is synchronous and keeps no state between calls; the
//! only shared piece is the detector handle, which is immutable. Batch mode
//! runs the same call on a small pool of scoped worker threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::annotate::{self, AnnotatedImage};
use crate::calibration::CalibrationScale;
use crate::config::{DetectorSettings, RenderSettings, ReportConfig};
use crate::detect::{detect_or_fallback, DetectionSource, Detector};
use crate::error::{InvalidDetection, StoneResult};
use crate::input::{ImageInput, DEFAULT_MAX_UPLOAD_BYTES};
use crate::recommend::recommendations;
use crate::report::pdf::{render_pdf, PdfImage};
use crate::report::{Report, ReportMetadata};
use crate::stone::normalize;
use crate::summary::AggregateSummary;

/// Everything produced for one image.
#[derive(Clone, Debug)]
pub struct Analysis {
    pub report: Report,
    pub annotated: Option<AnnotatedImage>,
    /// JPEG encoding of `annotated`, shared by the data URI and the PDF.
    pub annotated_jpeg: Option<Vec<u8>>,
    /// Detections dropped during normalization.
    pub warnings: Vec<InvalidDetection>,
    pub source: DetectionSource,
    /// Set when the annotated image could not be encoded.
    pub annotation_error: Option<String>,
}

impl Analysis {
    /// Render the PDF view. Failure here leaves the JSON report valid.
    pub fn render_pdf(&self) -> StoneResult<Vec<u8>> {
        let image = match (&self.annotated, &self.annotated_jpeg) {
            (Some(img), Some(jpeg)) => Some(PdfImage {
                jpeg,
                width: img.width(),
                height: img.height(),
            }),
            _ => None,
        };
        render_pdf(&self.report, image)
    }
}

pub struct Pipeline {
    detector: Arc<dyn Detector>,
    timeout: Option<Duration>,
    render: RenderSettings,
    max_upload_bytes: u64,
}

impl Pipeline {
    /// A pipeline with the default detector timeout and render settings.
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self {
            detector,
            timeout: DetectorSettings::default().timeout,
            render: RenderSettings::default(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn from_config(config: &ReportConfig, detector: Arc<dyn Detector>) -> Self {
        Self {
            detector,
            timeout: config.detector.timeout,
            render: config.render.clone(),
            max_upload_bytes: config.upload.max_bytes,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_render(mut self, render: RenderSettings) -> Self {
        self.render = render;
        self
    }

    pub fn with_max_upload_bytes(mut self, max_bytes: u64) -> Self {
        self.max_upload_bytes = max_bytes;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    pub fn render_settings(&self) -> &RenderSettings {
        &self.render
    }

    pub fn process(&self, input: &ImageInput) -> StoneResult<Analysis> {
        self.process_at(input, Utc::now())
    }

    /// Like `process`, stamping the report with `timestamp`.
    pub fn process_at(&self, input: &ImageInput, timestamp: DateTime<Utc>) -> StoneResult<Analysis> {
        let started = Instant::now();
        let decoded = input.decode(self.max_upload_bytes)?;
        let (width, height) = (decoded.width, decoded.height);
        let scale = CalibrationScale::estimate(width, height);
        let image = Arc::new(decoded.image);

        let outcome = detect_or_fallback(&self.detector, &image, self.timeout);
        log::debug!(
            "detector {} returned {} detection(s) in {:?}",
            outcome.source.backend_name(),
            outcome.detections.len(),
            started.elapsed()
        );

        let normalized = normalize(&outcome.detections, scale, width, height);
        let summary = AggregateSummary::from_records(&normalized.records);
        let recs = recommendations(summary.total_stones, summary.largest_stone_mm);

        let annotated = annotate::render_decoded(&image, decoded.format, &normalized.records);
        let (annotated_jpeg, annotation_error) = match annotated.to_jpeg(self.render.jpeg_quality) {
            Ok(jpeg) => (Some(jpeg), None),
            Err(e) => {
                log::warn!("annotated image unavailable: {}", e);
                (None, Some(e.to_string()))
            }
        };

        let metadata = ReportMetadata {
            filename: input.filename.clone(),
            filesize: Some(decoded.filesize),
            filetype: Some(decoded.format.to_mime_type().to_string()),
            image_width: width,
            image_height: height,
            scale,
            detector: outcome.source.backend_name().to_string(),
            synthetic_fallback: outcome.source.is_fallback(),
            image_sha256: Some(decoded.sha256),
        };
        let mut report = Report::assemble(normalized.records, summary, recs, metadata, timestamp);
        if self.render.embed_image {
            if let Some(jpeg) = &annotated_jpeg {
                report = report.with_annotated_jpeg(jpeg);
            }
        }

        log::info!(
            "analyzed {}: {} stone(s), burden {:.2} mm, severity {}",
            input.filename.as_deref().unwrap_or("<upload>"),
            report.summary.total_stones,
            report.summary.total_burden_mm,
            report.summary.severity
        );
        log::debug!("pipeline finished in {:?}", started.elapsed());

        Ok(Analysis {
            report,
            annotated: annotation_error.is_none().then_some(annotated),
            annotated_jpeg,
            warnings: normalized.warnings,
            source: outcome.source,
            annotation_error,
        })
    }

    /// Process every input on up to `workers` threads. Results come back in
    /// input order; one failing image does not affect the others.
    pub fn process_batch(&self, inputs: &[ImageInput], workers: usize) -> Vec<StoneResult<Analysis>> {
        self.process_batch_with(inputs, workers, |_, _| {})
    }

    /// `process_batch` with a callback run on the calling thread as each
    /// image completes.
    pub fn process_batch_with<F>(
        &self,
        inputs: &[ImageInput],
        workers: usize,
        mut on_done: F,
    ) -> Vec<StoneResult<Analysis>>
    where
        F: FnMut(usize, &StoneResult<Analysis>),
    {
        if inputs.is_empty() {
            return Vec::new();
        }
        let workers = workers.clamp(1, inputs.len());
        let cursor = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel();
        let mut slots: Vec<Option<StoneResult<Analysis>>> = inputs.iter().map(|_| None).collect();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let cursor = &cursor;
                scope.spawn(move || loop {
                    let index = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(input) = inputs.get(index) else {
                        break;
                    };
                    if tx.send((index, self.process(input))).is_err() {
                        break;
                    }
                });
            }
            drop(tx);
            for (index, result) in rx {
                on_done(index, &result);
                slots[index] = Some(result);
            }
        });

        slots.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detection, ReplayDetector, SyntheticDetector};
    use crate::error::StoneError;
    use crate::summary::SeverityLevel;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(w: u32, h: u32) -> ImageInput {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([40, 40, 40])))
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        ImageInput::from_bytes(buf.into_inner(), Some(format!("{}x{}.png", w, h)))
    }

    #[test]
    fn replayed_detections_flow_into_report() {
        let det = Detection::new([100.0, 100.0, 150.0, 150.0].into(), 0.85, None);
        let pipeline = Pipeline::new(Arc::new(ReplayDetector::new(vec![det])));
        let analysis = pipeline.process(&png(800, 600)).unwrap();

        assert_eq!(analysis.report.records.len(), 1);
        assert_eq!(analysis.report.records[0].diameter_mm, 12.5);
        assert_eq!(analysis.report.summary.severity, SeverityLevel::Severe);
        assert_eq!(analysis.report.metadata.detector, "replay");
        assert!(!analysis.report.metadata.synthetic_fallback);
        assert!(analysis.report.annotated_image.is_some());
        assert!(analysis.annotated.is_some());
    }

    #[test]
    fn invalid_input_is_rejected_before_detection() {
        let pipeline = Pipeline::new(Arc::new(SyntheticDetector::new()));
        let err = pipeline
            .process(&ImageInput::from_bytes(Vec::new(), None))
            .unwrap_err();
        assert!(matches!(err, StoneError::InvalidInput(_)));
    }

    #[test]
    fn embed_can_be_disabled() {
        let render = RenderSettings {
            embed_image: false,
            ..RenderSettings::default()
        };
        let pipeline = Pipeline::new(Arc::new(SyntheticDetector::new())).with_render(render);
        let analysis = pipeline.process(&png(64, 64)).unwrap();
        assert!(analysis.report.annotated_image.is_none());
        assert!(analysis.annotated_jpeg.is_some());
    }

    #[test]
    fn batch_preserves_input_order() {
        let pipeline = Pipeline::new(Arc::new(SyntheticDetector::new()));
        let inputs = vec![
            png(100, 80),
            ImageInput::from_bytes(b"nope".to_vec(), None),
            png(700, 300),
            png(1200, 50),
        ];
        let mut seen = 0;
        let results = pipeline.process_batch_with(&inputs, 3, |_, _| seen += 1);
        assert_eq!(seen, 4);
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().unwrap().report.metadata.image_width, 100);
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().report.metadata.image_width, 700);
        assert_eq!(results[3].as_ref().unwrap().report.metadata.image_width, 1200);
    }

    #[test]
    fn empty_batch_is_empty() {
        let pipeline = Pipeline::new(Arc::new(SyntheticDetector::new()));
        assert!(pipeline.process_batch(&[], 4).is_empty());
    }
}
