//! Embedder trait: the only capability the engine needs from an encoder

use crate::model_loader::EncoderConfig;
use crate::preprocess::PreprocessedImage;
use leafguard_core::{Embedding, Error, Result};

/// An image encoder usable by the prototype engine.
///
/// Implementations must be deterministic: the same preprocessed image always
/// yields the same embedding (evaluation mode, no stochastic layers).
pub trait Embedder: Send + Sync + Sized {
    /// Load persisted weights and prepare the encoder for inference
    fn load(config: &EncoderConfig) -> Result<Self>;

    /// Embed a batch of preprocessed images, one embedding per image, in order
    fn embed_batch(&self, images: &[PreprocessedImage]) -> Result<Vec<Embedding>>;
}

/// Embed a batch and verify the encoder returned one embedding per image
pub fn embed_checked<E: Embedder>(
    embedder: &E,
    images: &[PreprocessedImage],
) -> Result<Vec<Embedding>> {
    let embeddings = embedder.embed_batch(images)?;
    if embeddings.len() != images.len() {
        return Err(Error::inference(format!(
            "encoder returned {} embeddings for {} images",
            embeddings.len(),
            images.len()
        )));
    }
    Ok(embeddings)
}

/// Embed a single image
pub fn embed_one<E: Embedder>(embedder: &E, image: PreprocessedImage) -> Result<Embedding> {
    embed_checked(embedder, std::slice::from_ref(&image))?
        .pop()
        .ok_or_else(|| Error::inference("encoder returned no embedding"))
}
