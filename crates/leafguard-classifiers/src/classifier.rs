//! Open-set prototype classifier and prediction types

use crate::embedder::{embed_one, Embedder};
use crate::model_loader::DeviceType;
use crate::preprocess::{ImageInput, Preprocessor};
use crate::prototypes::PrototypeSet;
use crate::similarity::{dot, l2_normalize};
use leafguard_core::{Error, Label, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Minimum gap between the two best class scores for a confident decision
pub const AMBIGUITY_MARGIN: f32 = 0.01;

/// Why a prediction was rejected as UNKNOWN
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    /// Best similarity fell below the open-set threshold
    BelowThreshold { threshold: f32 },
    /// Top two classes were closer than [`AMBIGUITY_MARGIN`]
    Ambiguous { margin: f32 },
}

/// Result of classifying one image
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    /// Disease class or UNKNOWN
    pub label: Label,

    /// Best cosine similarity observed, even when rejected
    pub score: f32,

    /// Set when the label is UNKNOWN
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,

    /// Every class score, highest first
    pub ranked: Vec<(String, f32)>,

    /// Latency in microseconds
    pub latency_us: u64,
}

impl Prediction {
    pub fn is_unknown(&self) -> bool {
        self.label.is_unknown()
    }

    /// Runner-up class and score, if there is more than one class
    pub fn runner_up(&self) -> Option<(&str, f32)> {
        self.ranked.get(1).map(|(c, s)| (c.as_str(), *s))
    }
}

/// Prototype-based classifier with open-set rejection.
///
/// Immutable once built; a retrain produces a new instance.
pub struct PrototypeClassifier<E> {
    embedder: Arc<E>,
    prototypes: PrototypeSet,
    unit_prototypes: Vec<Vec<f32>>,
    class_names: Vec<String>,
    device: DeviceType,
    default_threshold: f32,
    preprocessor: Preprocessor,
}

impl<E: Embedder> PrototypeClassifier<E> {
    pub fn new(
        embedder: Arc<E>,
        prototypes: PrototypeSet,
        device: DeviceType,
        default_threshold: f32,
    ) -> Self {
        let unit_prototypes = prototypes
            .iter()
            .map(|p| l2_normalize(p.vector.as_slice()))
            .collect();
        let class_names = prototypes.class_names();

        Self {
            embedder,
            prototypes,
            unit_prototypes,
            class_names,
            device,
            default_threshold,
            preprocessor: Preprocessor::new(),
        }
    }

    /// Classify an image against the default threshold
    pub fn predict(&self, image: ImageInput<'_>) -> Result<Prediction> {
        self.predict_with_threshold(image, self.default_threshold)
    }

    /// Classify an image against an explicit threshold
    pub fn predict_with_threshold(&self, image: ImageInput<'_>, threshold: f32) -> Result<Prediction> {
        let start = Instant::now();
        self.ensure_loaded()?;

        let processed = self.preprocessor.preprocess(image)?;
        let embedding = embed_one(self.embedder.as_ref(), processed)?;

        let mut prediction = self.classify_embedding(embedding.as_slice(), threshold)?;
        prediction.latency_us = start.elapsed().as_micros() as u64;

        metrics::histogram!("leafguard_predict_latency_us").record(prediction.latency_us as f64);
        Ok(prediction)
    }

    /// Apply the open-set decision procedure to a raw query embedding
    pub fn classify_embedding(&self, embedding: &[f32], threshold: f32) -> Result<Prediction> {
        self.ensure_loaded()?;
        let start = Instant::now();

        if !threshold.is_finite() {
            return Err(Error::config(format!("threshold must be finite, got {}", threshold)));
        }

        let query = l2_normalize(embedding);
        let mut ranked = self
            .class_names
            .iter()
            .zip(&self.unit_prototypes)
            .map(|(class, prototype)| Ok((class.clone(), dot(&query, prototype)?)))
            .collect::<Result<Vec<_>>>()?;

        if let Some((class, score)) = ranked.iter().find(|(_, score)| !score.is_finite()) {
            return Err(Error::inference(format!(
                "non-finite similarity {} against class '{}'",
                score, class
            )));
        }

        // Stable sort keeps class order among equal scores, so ties go to the earlier class
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (best_class, best_score) = ranked[0].clone();

        let rejection = if best_score < threshold {
            Some(Rejection::BelowThreshold { threshold })
        } else {
            match ranked.get(1) {
                Some((_, second)) if best_score - second < AMBIGUITY_MARGIN => Some(Rejection::Ambiguous {
                    margin: best_score - second,
                }),
                _ => None,
            }
        };

        let (label, outcome) = match rejection {
            None => (Label::Known(best_class), "known"),
            Some(Rejection::BelowThreshold { .. }) => (Label::Unknown, "below_threshold"),
            Some(Rejection::Ambiguous { .. }) => (Label::Unknown, "ambiguous"),
        };
        metrics::counter!("leafguard_predictions_total", "outcome" => outcome).increment(1);

        Ok(Prediction {
            label,
            score: best_score,
            rejection,
            ranked,
            latency_us: start.elapsed().as_micros() as u64,
        })
    }

    fn ensure_loaded(&self) -> Result<()> {
        if self.unit_prototypes.is_empty() {
            return Err(Error::model_not_loaded("classifier has no class prototypes"));
        }
        Ok(())
    }

    /// Ordered class identifiers
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn prototypes(&self) -> &PrototypeSet {
        &self.prototypes
    }

    pub fn device(&self) -> DeviceType {
        self.device
    }

    pub fn default_threshold(&self) -> f32 {
        self.default_threshold
    }

    pub fn embedder(&self) -> &Arc<E> {
        &self.embedder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_loader::EncoderConfig;
    use crate::preprocess::PreprocessedImage;
    use leafguard_core::Embedding;

    /// Encoder that must never be reached by embedding-level tests
    struct NoEncoder;

    impl Embedder for NoEncoder {
        fn load(_config: &EncoderConfig) -> Result<Self> {
            Ok(Self)
        }

        fn embed_batch(&self, _images: &[PreprocessedImage]) -> Result<Vec<Embedding>> {
            Err(Error::internal("not used"))
        }
    }

    fn classifier(prototypes: PrototypeSet, threshold: f32) -> PrototypeClassifier<NoEncoder> {
        PrototypeClassifier::new(Arc::new(NoEncoder), prototypes, DeviceType::Cpu, threshold)
    }

    /// Unit vector in the plane at the given cosine from the x axis
    fn at_cosine(cos: f32) -> Vec<f32> {
        vec![cos, (1.0 - cos * cos).sqrt()]
    }

    #[test]
    fn test_confident_match() {
        let engine = classifier(
            PrototypeSet::from_vectors([("Potato_Rust", vec![0.0, 1.0]), ("Tomato_Blight", vec![2.0, 0.0])]),
            0.5,
        );

        let prediction = engine.classify_embedding(&[3.0, 0.1], 0.5).unwrap();
        assert_eq!(prediction.label, Label::Known("Tomato_Blight".to_string()));
        assert!(prediction.rejection.is_none());
        assert_eq!(prediction.ranked[0].0, "Tomato_Blight");
        assert_eq!(prediction.runner_up().map(|(c, _)| c), Some("Potato_Rust"));
    }

    #[test]
    fn test_rejects_just_below_threshold() {
        let engine = classifier(
            PrototypeSet::from_vectors([("a", vec![1.0, 0.0]), ("b", vec![-1.0, 0.0])]),
            0.5,
        );
        let query = at_cosine(0.8);
        let best = engine.classify_embedding(&query, 0.0).unwrap().score;

        let rejected = engine.classify_embedding(&query, best + 1e-4).unwrap();
        assert!(rejected.is_unknown());
        assert_eq!(rejected.score, best);
        assert!(matches!(rejected.rejection, Some(Rejection::BelowThreshold { .. })));

        let accepted = engine.classify_embedding(&query, best - 1e-4).unwrap();
        assert_eq!(accepted.label, Label::Known("a".to_string()));
        assert_eq!(accepted.score, best);
    }

    #[test]
    fn test_threshold_equal_to_score_passes() {
        let engine = classifier(PrototypeSet::from_vectors([("a", vec![1.0, 0.0])]), 0.0);
        let query = at_cosine(0.6);
        let best = engine.classify_embedding(&query, 0.0).unwrap().score;
        assert!(!engine.classify_embedding(&query, best).unwrap().is_unknown());
    }

    #[test]
    fn test_ambiguous_near_tie_is_unknown() {
        // Prototypes symmetric about the query up to a tiny skew
        let engine = classifier(
            PrototypeSet::from_vectors([("a", at_cosine(0.900)), ("b", at_cosine(0.905))]),
            0.0,
        );
        let prediction = engine.classify_embedding(&[1.0, 0.0], 0.5).unwrap();

        assert!(prediction.is_unknown());
        assert!(prediction.score > 0.5);
        match prediction.rejection {
            Some(Rejection::Ambiguous { margin }) => assert!(margin < AMBIGUITY_MARGIN),
            other => panic!("expected ambiguity rejection, got {:?}", other),
        }
        assert_eq!(prediction.ranked[0].0, "b");
    }

    #[test]
    fn test_weak_and_ambiguous_reports_below_threshold() {
        let engine = classifier(
            PrototypeSet::from_vectors([("a", at_cosine(0.300)), ("b", at_cosine(0.302))]),
            0.5,
        );
        let prediction = engine.classify_embedding(&[1.0, 0.0], 0.5).unwrap();

        assert!(prediction.is_unknown());
        assert!(prediction.score - prediction.ranked[1].1 < AMBIGUITY_MARGIN);
        assert!(matches!(
            prediction.rejection,
            Some(Rejection::BelowThreshold { threshold }) if threshold == 0.5
        ));
    }

    #[test]
    fn test_non_finite_embedding_is_inference_error() {
        let engine = classifier(
            PrototypeSet::from_vectors([("a", vec![1.0, 0.0]), ("b", vec![0.0, 1.0])]),
            0.5,
        );
        let err = engine.classify_embedding(&[f32::NAN, 0.0], 0.5).unwrap_err();
        assert!(matches!(err, Error::Inference(_)));

        let err = engine.classify_embedding(&[f32::INFINITY, 1.0], 0.5).unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
    }

    #[test]
    fn test_non_finite_threshold_is_config_error() {
        let engine = classifier(PrototypeSet::from_vectors([("a", vec![1.0, 0.0])]), 0.5);
        let err = engine.classify_embedding(&[1.0, 0.0], f32::NAN).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_single_class_has_no_margin_check() {
        let engine = classifier(PrototypeSet::from_vectors([("only", vec![1.0, 0.0])]), 0.0);
        let prediction = engine.classify_embedding(&[1.0, 0.0], 0.5).unwrap();
        assert_eq!(prediction.label, Label::Known("only".to_string()));
    }

    #[test]
    fn test_exact_tie_goes_to_first_class_but_is_ambiguous() {
        let engine = classifier(
            PrototypeSet::from_vectors([("first", vec![1.0, 1.0]), ("second", vec![1.0, 1.0])]),
            0.0,
        );
        let prediction = engine.classify_embedding(&[1.0, 1.0], 0.5).unwrap();
        assert_eq!(prediction.ranked[0].0, "first");
        assert!(matches!(prediction.rejection, Some(Rejection::Ambiguous { .. })));
    }

    #[test]
    fn test_prototypes_compared_after_normalization() {
        // Magnitude of the prototype must not influence the score
        let engine = classifier(PrototypeSet::from_vectors([("a", vec![10.0, 0.0])]), 0.0);
        let prediction = engine.classify_embedding(&[0.5, 0.0], 0.0).unwrap();
        assert!((prediction.score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_engine_refuses_to_run() {
        let engine = classifier(PrototypeSet::default(), 0.5);
        let err = engine.classify_embedding(&[1.0, 0.0], 0.5).unwrap_err();
        assert!(matches!(err, Error::ModelNotLoaded(_)));

        let err = engine
            .predict(ImageInput::Bytes(b"irrelevant"))
            .unwrap_err();
        assert!(matches!(err, Error::ModelNotLoaded(_)));
    }

    #[test]
    fn test_dimension_mismatch_is_inference_error() {
        let engine = classifier(PrototypeSet::from_vectors([("a", vec![1.0, 0.0])]), 0.0);
        let err = engine.classify_embedding(&[1.0, 0.0, 0.0], 0.0).unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
    }

    #[test]
    fn test_prediction_serializes_label_as_string() {
        let engine = classifier(PrototypeSet::from_vectors([("a", vec![1.0, 0.0])]), 0.9);
        let prediction = engine.classify_embedding(&[0.0, 1.0], 0.9).unwrap();
        let json = serde_json::to_value(&prediction).unwrap();
        assert_eq!(json["label"], "UNKNOWN");
        assert_eq!(json["rejection"]["reason"], "below_threshold");
    }
}
