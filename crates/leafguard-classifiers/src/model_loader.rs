//! Encoder loading and inference with Candle

use crate::embedder::Embedder;
use crate::preprocess::{PreprocessedImage, CHANNELS};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Func, Linear, VarBuilder};
use candle_transformers::models::resnet;
use hf_hub::{api::sync::Api, Repo, RepoType};
use leafguard_core::{Embedding, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Width of the ResNet-18 pooled feature vector
const BACKBONE_FEATURES: usize = 512;

/// Default projection size of the fine-tuned encoder
pub const DEFAULT_EMBEDDING_DIM: usize = 128;

/// Configuration for loading the encoder
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Source of the weights
    pub source: ModelSource,

    /// Device to run inference on
    pub device: DeviceType,

    /// Weights file format
    pub format: ModelFormat,

    /// Output dimension of the projection head
    pub embedding_dim: usize,
}

/// Source location for encoder weights
#[derive(Debug, Clone)]
pub enum ModelSource {
    /// Load from local file system
    LocalPath(PathBuf),

    /// Download from Hugging Face Hub
    HuggingFace {
        repo_id: String,
        revision: Option<String>,
        filename: String,
    },
}

/// Device type for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceType {
    /// CPU inference (always available)
    Cpu,
    /// CUDA GPU inference (if available)
    Cuda(usize), // GPU index
    /// Metal (Apple Silicon)
    Metal(usize),
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(idx) => write!(f, "cuda:{}", idx),
            Self::Metal(idx) => write!(f, "metal:{}", idx),
        }
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, index) = match s.split_once(':') {
            Some((kind, idx)) => {
                let idx = idx
                    .parse::<usize>()
                    .map_err(|_| Error::config(format!("invalid device index in '{}'", s)))?;
                (kind, idx)
            }
            None => (s, 0),
        };

        match kind.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(index)),
            "metal" | "mps" => Ok(Self::Metal(index)),
            other => Err(Error::config(format!("unknown device '{}'", other))),
        }
    }
}

impl TryFrom<String> for DeviceType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeviceType> for String {
    fn from(device: DeviceType) -> Self {
        device.to_string()
    }
}

/// Weights file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// SafeTensors format (recommended)
    SafeTensors,
    /// PyTorch state dict
    PyTorch,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            source: ModelSource::LocalPath(PathBuf::from("models/encoder.safetensors")),
            device: DeviceType::Cpu,
            format: ModelFormat::SafeTensors,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
        }
    }
}

impl EncoderConfig {
    /// Encoder weights from a local path
    pub fn from_local(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ModelSource::LocalPath(path.into()),
            ..Default::default()
        }
    }

    /// Encoder weights from Hugging Face
    pub fn from_hf(repo_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            source: ModelSource::HuggingFace {
                repo_id: repo_id.into(),
                revision: None,
                filename: filename.into(),
            },
            ..Default::default()
        }
    }

    /// Set device
    pub fn with_device(mut self, device: DeviceType) -> Self {
        self.device = device;
        self
    }

    /// Set weights format
    pub fn with_format(mut self, format: ModelFormat) -> Self {
        self.format = format;
        self
    }

    /// Set projection dimension
    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    /// Set Hugging Face revision
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        if let ModelSource::HuggingFace { repo_id, filename, .. } = self.source {
            self.source = ModelSource::HuggingFace {
                repo_id,
                revision: Some(revision.into()),
                filename,
            };
        }
        self
    }

    /// Resolve the weights file, downloading from the Hub when needed
    pub fn resolve_weights_path(&self) -> Result<PathBuf> {
        match &self.source {
            ModelSource::LocalPath(path) => {
                if !path.is_file() {
                    return Err(Error::data_not_found(format!(
                        "encoder weights not found at {}",
                        path.display()
                    )));
                }
                Ok(path.clone())
            }
            ModelSource::HuggingFace {
                repo_id,
                revision,
                filename,
            } => {
                let api = Api::new()
                    .map_err(|e| Error::config(format!("Failed to initialize HF API: {}", e)))?;

                let repo = api.repo(Repo::with_revision(
                    repo_id.clone(),
                    RepoType::Model,
                    revision.clone().unwrap_or_else(|| "main".to_string()),
                ));

                repo.get(filename).map_err(|e| {
                    Error::data_not_found(format!(
                        "failed to fetch {} from {}: {}",
                        filename, repo_id, e
                    ))
                })
            }
        }
    }
}

/// Create a Candle device, falling back to CPU when the accelerator is unavailable
pub fn create_device(device_type: DeviceType) -> Device {
    let attempt = match device_type {
        DeviceType::Cpu => return Device::Cpu,
        DeviceType::Cuda(idx) => Device::new_cuda(idx),
        DeviceType::Metal(idx) => Device::new_metal(idx),
    };

    match attempt {
        Ok(device) => device,
        Err(e) => {
            warn!("{} not available ({}), using CPU", device_type, e);
            Device::Cpu
        }
    }
}

/// ResNet-18 backbone with a linear projection head.
///
/// Expects tensors under `backbone.*` (torchvision ResNet-18 naming, final
/// `fc` layer absent) and `projection.{weight,bias}`.
pub struct ResNetEncoder {
    backbone: Func<'static>,
    projection: Linear,
    device: Device,
    embedding_dim: usize,
    weights_path: PathBuf,
}

impl ResNetEncoder {
    fn var_builder(path: &Path, format: ModelFormat, device: &Device) -> Result<VarBuilder<'static>> {
        match format {
            ModelFormat::SafeTensors => {
                // SAFETY: the weights file is treated as read-only for the lifetime of the mapping
                unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device) }
                    .map_err(|e| Error::encoder_load(format!("Failed to load SafeTensors: {}", e)))
            }
            ModelFormat::PyTorch => VarBuilder::from_pth(path, DType::F32, device)
                .map_err(|e| Error::encoder_load(format!("Failed to load PyTorch weights: {}", e))),
        }
    }

    /// Device the encoder runs on
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Output dimension
    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Weights file the encoder was loaded from
    pub fn weights_path(&self) -> &Path {
        &self.weights_path
    }

    fn forward(&self, batch: &Tensor) -> candle_core::Result<Tensor> {
        let features = self.backbone.forward(batch)?;
        self.projection.forward(&features)
    }
}

impl Embedder for ResNetEncoder {
    fn load(config: &EncoderConfig) -> Result<Self> {
        let weights_path = config.resolve_weights_path()?;
        let device = create_device(config.device);

        let vb = Self::var_builder(&weights_path, config.format, &device)?;

        let backbone = resnet::resnet18_no_final_layer(vb.pp("backbone"))
            .map_err(|e| Error::encoder_load(format!("backbone weights: {}", e)))?;
        let projection = candle_nn::linear(BACKBONE_FEATURES, config.embedding_dim, vb.pp("projection"))
            .map_err(|e| Error::encoder_load(format!("projection weights: {}", e)))?;

        info!(
            "Loaded encoder from {} on {} ({}-d embeddings)",
            weights_path.display(),
            config.device,
            config.embedding_dim
        );

        Ok(Self {
            backbone,
            projection,
            device,
            embedding_dim: config.embedding_dim,
            weights_path,
        })
    }

    fn embed_batch(&self, images: &[PreprocessedImage]) -> Result<Vec<Embedding>> {
        let Some(first) = images.first() else {
            return Ok(Vec::new());
        };
        let size = first.size() as usize;

        let mut data = Vec::with_capacity(images.len() * CHANNELS * size * size);
        for image in images {
            if image.size() as usize != size {
                return Err(Error::inference("batch mixes image sizes"));
            }
            data.extend_from_slice(image.as_slice());
        }

        debug!("Embedding batch of {} images", images.len());

        let batch = Tensor::from_vec(data, (images.len(), CHANNELS, size, size), &self.device)
            .map_err(|e| Error::inference(format!("Failed to build input tensor: {}", e)))?;

        let rows = self
            .forward(&batch)
            .and_then(|out| out.to_dtype(DType::F32))
            .and_then(|out| out.to_vec2::<f32>())
            .map_err(|e| Error::inference(format!("Encoder forward pass failed: {}", e)))?;

        Ok(rows.into_iter().map(Embedding::new).collect())
    }
}
