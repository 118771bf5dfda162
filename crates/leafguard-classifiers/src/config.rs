//! Configuration for the classification service

use crate::calibration::DEFAULT_PERCENTILE;
use crate::corpus::DEFAULT_BATCH_SIZE;
use crate::model_loader::{DeviceType, EncoderConfig, ModelFormat, ModelSource, DEFAULT_EMBEDDING_DIM};
use leafguard_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the classification service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Encoder weights and architecture
    #[serde(default)]
    pub encoder: EncoderSpec,

    /// Root of the labeled exemplar corpus
    #[serde(default = "default_exemplar_dir")]
    pub exemplar_dir: PathBuf,

    /// Device to run the encoder on ("cpu", "cuda", "cuda:1", "metal")
    #[serde(default = "default_device")]
    pub device: DeviceType,

    /// Threshold calibration settings
    #[serde(default)]
    pub calibration: CalibrationSpec,

    /// Exemplars embedded per encoder call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Encoder specification (for config files)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderSpec {
    /// Where the weights live
    #[serde(flatten)]
    pub source: ModelSourceSpec,

    /// Weights format
    #[serde(default)]
    pub format: ModelFormatSpec,

    /// Output dimension of the projection head
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
}

/// Model source specification (for config files)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelSourceSpec {
    /// Local file path
    Local {
        path: PathBuf,
    },

    /// Hugging Face Hub
    HuggingFace {
        repo_id: String,
        filename: String,
        revision: Option<String>,
    },
}

/// Model format specification
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormatSpec {
    SafeTensors,
    PyTorch,
}

impl Default for ModelFormatSpec {
    fn default() -> Self {
        Self::SafeTensors
    }
}

/// Threshold calibration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationSpec {
    /// Percentile of same-class similarities used as the rejection threshold
    #[serde(default = "default_percentile")]
    pub percentile: f32,
}

impl Default for CalibrationSpec {
    fn default() -> Self {
        Self {
            percentile: default_percentile(),
        }
    }
}

impl Default for EncoderSpec {
    fn default() -> Self {
        Self {
            source: ModelSourceSpec::Local {
                path: default_encoder_path(),
            },
            format: ModelFormatSpec::default(),
            embedding_dim: default_embedding_dim(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderSpec::default(),
            exemplar_dir: default_exemplar_dir(),
            device: default_device(),
            calibration: CalibrationSpec::default(),
            batch_size: default_batch_size(),
        }
    }
}

impl ClassifierConfig {
    /// Load from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid classifier config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let percentile = self.calibration.percentile;
        if !(0.0..=100.0).contains(&percentile) {
            return Err(Error::config(format!(
                "calibration.percentile must be within [0, 100], got {}",
                percentile
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be at least 1"));
        }
        if self.encoder.embedding_dim == 0 {
            return Err(Error::config("encoder.embedding_dim must be at least 1"));
        }
        Ok(())
    }

    /// Point the encoder at a local weights file
    pub fn with_encoder_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.encoder.source = ModelSourceSpec::Local { path: path.into() };
        self
    }

    /// Set the exemplar corpus root
    pub fn with_exemplar_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.exemplar_dir = dir.into();
        self
    }

    /// Set the calibration percentile
    pub fn with_percentile(mut self, percentile: f32) -> Self {
        self.calibration.percentile = percentile;
        self
    }

    /// Set the device
    pub fn with_device(mut self, device: DeviceType) -> Self {
        self.device = device;
        self
    }

    /// Convert to EncoderConfig for loading
    pub fn to_encoder_config(&self) -> EncoderConfig {
        let source = match &self.encoder.source {
            ModelSourceSpec::Local { path } => ModelSource::LocalPath(path.clone()),
            ModelSourceSpec::HuggingFace {
                repo_id,
                filename,
                revision,
            } => ModelSource::HuggingFace {
                repo_id: repo_id.clone(),
                revision: revision.clone(),
                filename: filename.clone(),
            },
        };

        let format = match self.encoder.format {
            ModelFormatSpec::SafeTensors => ModelFormat::SafeTensors,
            ModelFormatSpec::PyTorch => ModelFormat::PyTorch,
        };

        EncoderConfig {
            source,
            device: self.device,
            format,
            embedding_dim: self.encoder.embedding_dim,
        }
    }
}

fn default_encoder_path() -> PathBuf {
    PathBuf::from("models/encoder.safetensors")
}

fn default_device() -> DeviceType {
    DeviceType::Cpu
}

fn default_exemplar_dir() -> PathBuf {
    PathBuf::from("data/fewshot/train")
}

fn default_embedding_dim() -> usize {
    DEFAULT_EMBEDDING_DIM
}

fn default_percentile() -> f32 {
    DEFAULT_PERCENTILE
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
