use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::input::DEFAULT_MAX_UPLOAD_BYTES;

const DEFAULT_OUTPUT_DIR: &str = "stonesense-out";
const DEFAULT_DETECTOR_BACKEND: &str = "synthetic";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_DETECTOR_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_JPEG_QUALITY: u8 = 90;
const DEFAULT_WORKERS: usize = 4;
const MAX_WORKERS: usize = 64;
const DEFAULT_ADVISOR_MODEL: &str = "gpt-4o-mini";
const DEFAULT_ADVISOR_API_KEY_ENV: &str = "STONESENSE_ADVISOR_API_KEY";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ReportConfigFile {
    output_dir: Option<PathBuf>,
    workers: Option<usize>,
    detector: Option<DetectorConfigFile>,
    render: Option<RenderConfigFile>,
    upload: Option<UploadConfigFile>,
    advisor: Option<AdvisorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    replay_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    timeout_ms: Option<u64>,
    class_labels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RenderConfigFile {
    jpeg_quality: Option<u8>,
    embed_image: Option<bool>,
    pdf: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct UploadConfigFile {
    max_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AdvisorConfigFile {
    endpoint: Option<String>,
    model: Option<String>,
    api_key_env: Option<String>,
}

/// Runtime configuration for report generation.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
    pub workers: usize,
    pub detector: DetectorSettings,
    pub render: RenderSettings,
    pub upload: UploadSettings,
    pub advisor: AdvisorSettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Registry name of the backend to use by default.
    pub backend: String,
    pub model_path: Option<PathBuf>,
    /// JSON file of detections for the `replay` backend.
    pub replay_path: Option<PathBuf>,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// `None` waits for the detector indefinitely.
    pub timeout: Option<Duration>,
    pub class_labels: Vec<String>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR_BACKEND.to_string(),
            model_path: None,
            replay_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            timeout: Some(Duration::from_millis(DEFAULT_DETECTOR_TIMEOUT_MS)),
            class_labels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub jpeg_quality: u8,
    /// Embed the annotated image in the JSON report as a data URI.
    pub embed_image: bool,
    pub pdf: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            embed_image: true,
            pdf: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub max_bytes: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdvisorSettings {
    /// Chat-completions endpoint; the offline advisor is used when unset.
    pub endpoint: Option<String>,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for AdvisorSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: DEFAULT_ADVISOR_MODEL.to_string(),
            api_key_env: DEFAULT_ADVISOR_API_KEY_ENV.to_string(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            workers: DEFAULT_WORKERS,
            detector: DetectorSettings::default(),
            render: RenderSettings::default(),
            upload: UploadSettings::default(),
            advisor: AdvisorSettings::default(),
        }
    }
}

impl ReportConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("STONESENSE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ReportConfigFile) -> Self {
        let defaults = Self::default();
        let detector_file = file.detector.unwrap_or_default();
        let render_file = file.render.unwrap_or_default();
        let advisor_file = file.advisor.unwrap_or_default();

        let detector = DetectorSettings {
            backend: detector_file.backend.unwrap_or(defaults.detector.backend),
            model_path: detector_file.model_path,
            replay_path: detector_file.replay_path,
            input_size: detector_file
                .input_size
                .unwrap_or(defaults.detector.input_size),
            confidence_threshold: detector_file
                .confidence_threshold
                .unwrap_or(defaults.detector.confidence_threshold),
            iou_threshold: detector_file
                .iou_threshold
                .unwrap_or(defaults.detector.iou_threshold),
            timeout: match detector_file.timeout_ms {
                Some(ms) => timeout_from_ms(ms),
                None => defaults.detector.timeout,
            },
            class_labels: detector_file.class_labels.unwrap_or_default(),
        };
        let render = RenderSettings {
            jpeg_quality: render_file
                .jpeg_quality
                .unwrap_or(defaults.render.jpeg_quality),
            embed_image: render_file
                .embed_image
                .unwrap_or(defaults.render.embed_image),
            pdf: render_file.pdf.unwrap_or(defaults.render.pdf),
        };
        let upload = UploadSettings {
            max_bytes: file
                .upload
                .and_then(|upload| upload.max_bytes)
                .unwrap_or(defaults.upload.max_bytes),
        };
        let advisor = AdvisorSettings {
            endpoint: advisor_file.endpoint,
            model: advisor_file.model.unwrap_or(defaults.advisor.model),
            api_key_env: advisor_file
                .api_key_env
                .unwrap_or(defaults.advisor.api_key_env),
        };
        Self {
            output_dir: file.output_dir.unwrap_or(defaults.output_dir),
            workers: file.workers.unwrap_or(defaults.workers),
            detector,
            render,
            upload,
            advisor,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("STONESENSE_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(backend) = std::env::var("STONESENSE_DETECTOR") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("STONESENSE_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(timeout) = std::env::var("STONESENSE_DETECTOR_TIMEOUT_MS") {
            let ms: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("STONESENSE_DETECTOR_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.detector.timeout = timeout_from_ms(ms);
        }
        if let Ok(workers) = std::env::var("STONESENSE_WORKERS") {
            self.workers = workers
                .trim()
                .parse()
                .map_err(|_| anyhow!("STONESENSE_WORKERS must be a positive integer"))?;
        }
        if let Ok(max) = std::env::var("STONESENSE_MAX_UPLOAD_BYTES") {
            self.upload.max_bytes = max
                .trim()
                .parse()
                .map_err(|_| anyhow!("STONESENSE_MAX_UPLOAD_BYTES must be an integer"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.detector.backend = self.detector.backend.to_lowercase();
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(anyhow!("workers must be between 1 and {}", MAX_WORKERS));
        }
        if self.upload.max_bytes == 0 {
            return Err(anyhow!("upload.max_bytes must be greater than zero"));
        }
        if !(1..=100).contains(&self.render.jpeg_quality) {
            return Err(anyhow!("render.jpeg_quality must be between 1 and 100"));
        }
        let d = &self.detector;
        if d.input_size == 0 || d.input_size % 32 != 0 {
            return Err(anyhow!("detector.input_size must be a positive multiple of 32"));
        }
        for (name, value) in [
            ("confidence_threshold", d.confidence_threshold),
            ("iou_threshold", d.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("detector.{} must be within [0, 1]", name));
            }
        }
        match d.backend.as_str() {
            "replay" if d.replay_path.is_none() => {
                return Err(anyhow!("replay backend requires detector.replay_path"))
            }
            "tract" if d.model_path.is_none() => {
                return Err(anyhow!("tract backend requires detector.model_path"))
            }
            _ => {}
        }
        if let Some(endpoint) = &self.advisor.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(anyhow!("advisor.endpoint must be an http(s) URL"));
            }
        }
        Ok(())
    }
}

/// Zero disables the detector timeout.
fn timeout_from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn read_config_file(path: &Path) -> Result<ReportConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() -> Result<()> {
        let mut cfg = ReportConfig::from_file(ReportConfigFile::default());
        cfg.validate()?;
        assert_eq!(cfg.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert_eq!(cfg.detector.backend, "synthetic");
        assert_eq!(
            cfg.detector.timeout,
            Some(Duration::from_millis(DEFAULT_DETECTOR_TIMEOUT_MS))
        );
        assert_eq!(cfg.upload.max_bytes, 10 * 1024 * 1024);
        assert!(cfg.render.pdf);
        Ok(())
    }

    #[test]
    fn zero_timeout_disables_it() {
        let file = ReportConfigFile {
            detector: Some(DetectorConfigFile {
                timeout_ms: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(ReportConfig::from_file(file).detector.timeout, None);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = ReportConfig::default();
        cfg.workers = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ReportConfig::default();
        cfg.detector.backend = "Replay".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("replay_path"));

        let mut cfg = ReportConfig::default();
        cfg.detector.iou_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = ReportConfig::default();
        cfg.advisor.endpoint = Some("ftp://example".into());
        assert!(cfg.validate().is_err());
    }
}
