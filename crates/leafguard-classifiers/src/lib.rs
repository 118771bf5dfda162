//! LeafGuard Classifiers
//!
//! Open-set plant disease classification over a few labeled exemplars.
//!
//! Each disease class is represented by a prototype, the mean embedding of
//! its exemplar images. A query image is assigned to the most similar
//! prototype, or rejected as UNKNOWN when:
//! - its best cosine similarity falls below a calibrated threshold, or
//! - the top two classes score within [`AMBIGUITY_MARGIN`] of each other.
//!
//! [`ModelService`] owns the lifecycle: lazy initialization, cached access,
//! and hot retrain with an atomic swap.

pub mod calibration;
pub mod classifier;
pub mod config;
pub mod corpus;
pub mod embedder;
pub mod model_loader;
pub mod preprocess;
pub mod prototypes;
pub mod service;
pub mod similarity;

pub use calibration::{calibrate, calibrate_embedded, percentile_of, Calibration, DEFAULT_PERCENTILE};
pub use classifier::{Prediction, PrototypeClassifier, Rejection, AMBIGUITY_MARGIN};
pub use config::{CalibrationSpec, ClassifierConfig, EncoderSpec, ModelFormatSpec, ModelSourceSpec};
pub use corpus::{embed_corpus, EmbeddedCorpus, ExemplarClass, ExemplarCorpus, DEFAULT_BATCH_SIZE};
pub use embedder::Embedder;
pub use model_loader::{DeviceType, EncoderConfig, ModelFormat, ModelSource, ResNetEncoder};
pub use preprocess::{ImageInput, PreprocessedImage, Preprocessor};
pub use prototypes::{build_prototypes, Prototype, PrototypeSet};
pub use service::{ModelBundle, ModelService, ModelStatus};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classifier::{Prediction, PrototypeClassifier, Rejection};
    pub use crate::config::ClassifierConfig;
    pub use crate::embedder::Embedder;
    pub use crate::model_loader::{DeviceType, EncoderConfig, ResNetEncoder};
    pub use crate::preprocess::ImageInput;
    pub use crate::service::{ModelService, ModelStatus};
    pub use leafguard_core::{Error, Label, Result};
}
