#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::result::{BoundingBox, Detection};
use crate::error::{StoneError, StoneResult};

/// Tract-based backend for YOLO-style ONNX detectors.
///
/// The model takes a `1×3×S×S` RGB tensor in `[0, 1]` and produces
/// `1×(4+C)×N` rows of `(cx, cy, w, h, class scores...)` in input pixels.
/// The plan is built once and only read afterwards, so one instance can serve
/// concurrent pipeline invocations.
pub struct TractDetector {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
    class_labels: Vec<String>,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        if input_size == 0 {
            return Err(anyhow!("model input size must be > 0"));
        }
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, side, side]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            class_labels: vec![crate::stone::DEFAULT_STONE_TYPE.to_string()],
        })
    }

    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    pub fn with_class_labels(mut self, labels: Vec<String>) -> Self {
        if !labels.is_empty() {
            self.class_labels = labels;
        }
        self
    }

    fn build_input(&self, image: &DynamicImage) -> Tensor {
        let side = self.input_size;
        let rgb = image.resize_exact(side, side, FilterType::Triangle).into_rgb8();
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, width: u32, height: u32) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not 1x(4+C)xN")?;
        let channels = view.shape()[1];
        let anchors = view.shape()[2];
        if channels < 5 {
            return Err(anyhow!("model output has {} channels, expected >= 5", channels));
        }

        let sx = width as f32 / self.input_size as f32;
        let sy = height as f32 / self.input_size as f32;
        let mut candidates = Vec::new();
        for a in 0..anchors {
            let (class_id, score) = (4..channels)
                .map(|c| (c - 4, view[[0, c, a]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < self.confidence_threshold {
                continue;
            }
            let (cx, cy, w, h) = (
                view[[0, 0, a]],
                view[[0, 1, a]],
                view[[0, 2, a]],
                view[[0, 3, a]],
            );
            let bbox = BoundingBox::new(
                ((cx - w / 2.0) * sx).max(0.0) as f64,
                ((cy - h / 2.0) * sy).max(0.0) as f64,
                ((cx + w / 2.0) * sx).min(width as f32) as f64,
                ((cy + h / 2.0) * sy).min(height as f32) as f64,
            );
            let label = self
                .class_labels
                .get(class_id)
                .cloned()
                .unwrap_or_else(|| format!("class_{}", class_id));
            candidates.push(Detection::new(
                bbox,
                score.clamp(0.0, 1.0) as f64,
                Some(label),
            ));
        }
        Ok(non_max_suppression(candidates, self.iou_threshold as f64))
    }
}

/// Greedy class-agnostic NMS. Survivors come out highest confidence first.
pub(crate) fn non_max_suppression(mut candidates: Vec<Detection>, iou: f64) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();
    for cand in candidates {
        if kept.iter().all(|k| k.bbox.iou(&cand.bbox) <= iou) {
            kept.push(cand);
        }
    }
    kept
}

impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&self, image: &DynamicImage) -> StoneResult<Vec<Detection>> {
        let (width, height) = image.dimensions();
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| StoneError::DetectorUnavailable(format!("ONNX inference failed: {}", e)))?;
        self.decode(outputs, width, height)
            .map_err(|e| StoneError::DetectorUnavailable(e.to_string()))
    }

    fn warm_up(&self) -> StoneResult<()> {
        let blank = DynamicImage::new_rgb8(self.input_size, self.input_size);
        self.detect(&blank).map(|_| ())
    }
}
