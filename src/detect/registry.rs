use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::Detector;
use super::backends::{ReplayDetector, SyntheticDetector};
use crate::config::DetectorSettings;

/// Registry of detector backends, each loaded once and shared immutably.
pub struct DetectorRegistry {
    detectors: HashMap<String, Arc<dyn Detector>>,
    default_name: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            detectors: HashMap::new(),
            default_name: None,
        }
    }

    /// Build the registry described by configuration. The configured backend
    /// becomes the default; the synthetic backend is always available.
    pub fn from_settings(settings: &DetectorSettings) -> Result<Self> {
        let mut registry = Self::new();
        match settings.backend.as_str() {
            "synthetic" => {}
            "replay" => {
                let path = settings
                    .replay_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("replay backend requires detector.replay_path"))?;
                registry.register(ReplayDetector::from_file(path)?);
            }
            #[cfg(feature = "backend-tract")]
            "tract" => {
                let path = settings
                    .model_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("tract backend requires detector.model_path"))?;
                let detector = super::backends::TractDetector::new(path, settings.input_size)?
                    .with_thresholds(settings.confidence_threshold, settings.iou_threshold)
                    .with_class_labels(settings.class_labels.clone());
                registry.register(detector);
            }
            other => {
                return Err(anyhow!(
                    "detector backend '{}' is not available in this build",
                    other
                ))
            }
        }
        registry.register(SyntheticDetector::new());
        Ok(registry)
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<D: Detector + 'static>(&mut self, detector: D) {
        self.register_shared(Arc::new(detector));
    }

    pub fn register_shared(&mut self, detector: Arc<dyn Detector>) {
        let name = detector.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.detectors.insert(name, detector);
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.detectors.contains_key(name) {
            return Err(anyhow!("detector '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Detector>> {
        self.detectors.get(name).cloned()
    }

    pub fn default_detector(&self) -> Option<Arc<dyn Detector>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.detectors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
