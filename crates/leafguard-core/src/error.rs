//! Error types for LeafGuard

/// Result type alias using LeafGuard's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for LeafGuard operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Exemplar corpus or encoder weights missing at the configured location
    #[error("data not found: {0}")]
    DataNotFound(String),

    /// Encoder weights exist but do not deserialize into the encoder
    #[error("failed to load encoder: {0}")]
    EncoderLoad(String),

    /// Image could not be read or decoded
    #[error("failed to decode image: {0}")]
    ImageDecode(String),

    /// Prediction attempted against an engine with no prototypes
    #[error("model not loaded: {0}")]
    ModelNotLoaded(String),

    /// Model initialization failed; wraps the underlying cause
    #[error("model initialization failed: {0}")]
    Initialization(#[source] Box<Error>),

    /// Embedding or similarity computation errors
    #[error("inference error: {0}")]
    Inference(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new data-not-found error
    pub fn data_not_found(msg: impl Into<String>) -> Self {
        Self::DataNotFound(msg.into())
    }

    /// Create a new encoder load error
    pub fn encoder_load(msg: impl Into<String>) -> Self {
        Self::EncoderLoad(msg.into())
    }

    /// Create a new image decode error
    pub fn image_decode(msg: impl Into<String>) -> Self {
        Self::ImageDecode(msg.into())
    }

    /// Create a new model-not-loaded error
    pub fn model_not_loaded(msg: impl Into<String>) -> Self {
        Self::ModelNotLoaded(msg.into())
    }

    /// Wrap a failure raised while initializing the model
    pub fn initialization(cause: Error) -> Self {
        match cause {
            already @ Self::Initialization(_) => already,
            other => Self::Initialization(Box::new(other)),
        }
    }

    /// Create a new inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The innermost cause when this is an initialization failure
    pub fn root_cause(&self) -> &Error {
        match self {
            Self::Initialization(inner) => inner.root_cause(),
            other => other,
        }
    }
}
