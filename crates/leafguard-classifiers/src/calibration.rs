//! Open-set threshold calibration
//!
//! The rejection threshold is a low percentile of how well in-distribution
//! exemplars match their *own* class prototype. Most genuine images of a
//! known class clear it; inputs whose best match is weaker get rejected.
//!
//! Note that inference gates on the best match across *all* prototypes,
//! which is a different statistic from the same-class fit measured here.

use crate::corpus::{embed_corpus, EmbeddedCorpus, ExemplarCorpus};
use crate::embedder::Embedder;
use crate::prototypes::PrototypeSet;
use crate::similarity::{dot, l2_normalize};
use leafguard_core::{Error, Result};
use std::path::Path;
use tracing::info;

/// Default calibration percentile
pub const DEFAULT_PERCENTILE: f32 = 15.0;

/// Result of a calibration run
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    /// Rejection floor in cosine-similarity units
    pub threshold: f32,

    /// Percentile the threshold was taken at
    pub percentile: f32,

    /// Number of exemplar scores in the distribution
    pub samples: usize,

    /// Smallest same-class similarity
    pub min: f32,

    /// Mean same-class similarity
    pub mean: f32,

    /// Largest same-class similarity
    pub max: f32,
}

/// Calibrate against a corpus directory, building prototypes along the way
pub fn calibrate<E: Embedder>(
    embedder: &E,
    corpus_root: impl AsRef<Path>,
    percentile: f32,
    batch_size: usize,
) -> Result<Calibration> {
    validate_percentile(percentile)?;
    let corpus = ExemplarCorpus::scan(corpus_root)?;
    let embedded = embed_corpus(embedder, &corpus, batch_size)?;
    let prototypes = PrototypeSet::from_embedded(&embedded)?;
    calibrate_embedded(&embedded, &prototypes, percentile)
}

/// Calibrate from already-embedded exemplars and their prototypes
pub fn calibrate_embedded(
    embedded: &EmbeddedCorpus,
    prototypes: &PrototypeSet,
    percentile: f32,
) -> Result<Calibration> {
    validate_percentile(percentile)?;

    let scores = same_class_scores(embedded, prototypes)?;
    if scores.is_empty() {
        return Err(Error::data_not_found("no exemplar scores to calibrate on"));
    }

    let threshold = percentile_of(&scores, percentile)?;
    let mean = (scores.iter().map(|s| f64::from(*s)).sum::<f64>() / scores.len() as f64) as f32;
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    info!(
        "Open-set threshold {:.3} at p{} over {} exemplars (min {:.3}, mean {:.3}, max {:.3})",
        threshold,
        percentile,
        scores.len(),
        min,
        mean,
        max
    );

    Ok(Calibration {
        threshold,
        percentile,
        samples: scores.len(),
        min,
        mean,
        max,
    })
}

/// Cosine similarity of every exemplar to its own class prototype
pub fn same_class_scores(embedded: &EmbeddedCorpus, prototypes: &PrototypeSet) -> Result<Vec<f32>> {
    let mut scores = Vec::with_capacity(embedded.embedding_count());

    for (class, embeddings) in embedded.classes() {
        let prototype = prototypes.get(class).ok_or_else(|| {
            Error::internal(format!("no prototype for calibrated class '{}'", class))
        })?;
        let unit_prototype = l2_normalize(prototype.vector.as_slice());

        for embedding in embeddings {
            scores.push(dot(&l2_normalize(embedding.as_slice()), &unit_prototype)?);
        }
    }

    Ok(scores)
}

/// Value at `percentile` (0-100) with linear interpolation between closest ranks
pub fn percentile_of(values: &[f32], percentile: f32) -> Result<f32> {
    validate_percentile(percentile)?;
    if values.is_empty() {
        return Err(Error::inference("percentile of an empty distribution"));
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);

    let rank = f64::from(percentile) / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;

    let low = f64::from(sorted[lower]);
    let high = f64::from(sorted[upper]);
    Ok((low + (high - low) * fraction) as f32)
}

fn validate_percentile(percentile: f32) -> Result<()> {
    if !(0.0..=100.0).contains(&percentile) {
        return Err(Error::config(format!(
            "calibration percentile must be within [0, 100], got {}",
            percentile
        )));
    }
    Ok(())
}
