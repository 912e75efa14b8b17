use crate::device::PowerMode;
use crate::kernel::KernelRegistry;
use crate::model_io::{ModelIoError, ModelType};
use crate::place::Place;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where a model's program and parameters come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    /// Directory holding `model.json`/`model.bin` and `params.bin`.
    Dir(PathBuf),
    Files {
        program: PathBuf,
        #[serde(default)]
        params: Option<PathBuf>,
    },
    Buffer {
        program: Vec<u8>,
        #[serde(default)]
        params: Option<Vec<u8>>,
    },
}

/// Everything needed to build a predictor from a stored model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    pub model: ModelSource,
    #[serde(default)]
    pub model_type: ModelType,
    /// Candidate places, most preferred first.
    pub valid_places: Vec<Place>,
    /// Optional optimizer passes to run; empty selects the default pipeline.
    #[serde(default)]
    pub passes: Vec<String>,
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub power_mode: Option<PowerMode>,
    /// Kernel registry to build against instead of the global one.
    #[serde(skip)]
    pub kernels: Option<Arc<KernelRegistry>>,
}

impl PredictorConfig {
    pub fn new(model: ModelSource) -> Self {
        PredictorConfig {
            model,
            model_type: ModelType::default(),
            valid_places: vec![Place::host_float()],
            passes: Vec::new(),
            threads: None,
            power_mode: None,
            kernels: None,
        }
    }

    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(ModelSource::Dir(dir.into()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ModelIoError> {
        let path = path.as_ref();
        let text = fs::read(path).map_err(|err| ModelIoError::io(path, err))?;
        Ok(serde_json::from_slice(&text)?)
    }

    pub fn model_type(mut self, model_type: ModelType) -> Self {
        self.model_type = model_type;
        self
    }

    pub fn valid_places(mut self, places: impl Into<Vec<Place>>) -> Self {
        self.valid_places = places.into();
        self
    }

    pub fn passes<S: Into<String>>(mut self, passes: impl IntoIterator<Item = S>) -> Self {
        self.passes = passes.into_iter().map(Into::into).collect();
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn power_mode(mut self, mode: PowerMode) -> Self {
        self.power_mode = Some(mode);
        self
    }

    pub fn kernels(mut self, kernels: Arc<KernelRegistry>) -> Self {
        self.kernels = Some(kernels);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_config_fills_defaults() {
        let json = r#"{
            "model": { "dir": "/models/mlp" },
            "valid_places": [ { "target": "host", "precision": "float", "layout": "nchw" } ]
        }"#;
        let config: PredictorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.model, ModelSource::Dir(PathBuf::from("/models/mlp")));
        assert_eq!(config.model_type, ModelType::Json);
        assert_eq!(config.valid_places, vec![Place::host_float()]);
        assert!(config.passes.is_empty());
        assert!(config.threads.is_none());
    }

    #[test]
    fn builder_methods_override_fields() {
        let config = PredictorConfig::from_dir("m")
            .model_type(ModelType::Bincode)
            .passes(["fc_fuse_pass"])
            .threads(2)
            .power_mode(PowerMode::Full);
        assert_eq!(config.model_type, ModelType::Bincode);
        assert_eq!(config.passes, vec!["fc_fuse_pass".to_string()]);
        assert_eq!(config.threads, Some(2));
        assert_eq!(config.power_mode, Some(PowerMode::Full));
    }
}
