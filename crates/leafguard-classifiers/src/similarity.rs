//! Vector math shared by calibration and inference.
//!
//! Calibration and prediction must agree bit-for-bit, so both go through
//! [`l2_normalize`] and [`dot`] here and nowhere else.

use leafguard_core::{Error, Result};

/// Norms below this are treated as this value, so zero vectors stay zero
const NORM_EPSILON: f32 = 1e-12;

/// L2 normalize a vector (unit length)
pub fn l2_normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt().max(NORM_EPSILON);
    vector.iter().map(|v| v / norm).collect()
}

/// Dot product of two equal-length vectors
pub fn dot(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::inference(format!(
            "dimension mismatch: expected {}, got {}",
            a.len(),
            b.len()
        )));
    }
    Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).sum())
}

/// Cosine similarity between two arbitrary (not necessarily unit) vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    dot(&l2_normalize(a), &l2_normalize(b))
}

/// Elementwise mean of equal-length vectors, accumulated in f64
pub fn elementwise_mean<V: AsRef<[f32]>>(vectors: &[V]) -> Result<Vec<f32>> {
    let first = vectors
        .first()
        .ok_or_else(|| Error::inference("cannot average zero vectors"))?;
    let dimension = first.as_ref().len();

    let mut sums = vec![0.0f64; dimension];
    for vector in vectors {
        let vector = vector.as_ref();
        if vector.len() != dimension {
            return Err(Error::inference(format!(
                "dimension mismatch: expected {}, got {}",
                dimension,
                vector.len()
            )));
        }
        for (sum, v) in sums.iter_mut().zip(vector) {
            *sum += f64::from(*v);
        }
    }

    let count = vectors.len() as f64;
    Ok(sums.into_iter().map(|s| (s / count) as f32).collect())
}
