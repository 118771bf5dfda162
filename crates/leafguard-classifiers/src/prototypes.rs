//! Class prototypes: the mean exemplar embedding of each class

use crate::corpus::{embed_corpus, EmbeddedCorpus, ExemplarCorpus};
use crate::embedder::Embedder;
use crate::similarity::elementwise_mean;
use leafguard_core::{Embedding, Result};
use std::path::Path;
use tracing::info;

/// Representative vector of one class
#[derive(Debug, Clone, PartialEq)]
pub struct Prototype {
    /// Class identifier (exemplar directory name)
    pub class: String,

    /// Elementwise mean of the class's exemplar embeddings, not renormalized
    pub vector: Embedding,

    /// Number of exemplars averaged
    pub exemplars: usize,
}

/// Prototypes for every class with at least one exemplar, in class order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrototypeSet {
    prototypes: Vec<Prototype>,
}

impl PrototypeSet {
    /// Reduce each class of an embedded corpus to its mean embedding
    pub fn from_embedded(embedded: &EmbeddedCorpus) -> Result<Self> {
        let prototypes = embedded
            .classes()
            .iter()
            .map(|(class, embeddings)| {
                Ok(Prototype {
                    class: class.clone(),
                    vector: Embedding::new(elementwise_mean(embeddings)?),
                    exemplars: embeddings.len(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { prototypes })
    }

    /// Build from explicit vectors, mostly useful for tests and tooling
    pub fn from_vectors<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        let prototypes = entries
            .into_iter()
            .map(|(class, vector)| Prototype {
                class: class.into(),
                vector: Embedding::new(vector),
                exemplars: 1,
            })
            .collect();
        Self { prototypes }
    }

    /// Prototype of a class
    pub fn get(&self, class: &str) -> Option<&Prototype> {
        self.prototypes.iter().find(|p| p.class == class)
    }

    /// Ordered class identifiers
    pub fn class_names(&self) -> Vec<String> {
        self.prototypes.iter().map(|p| p.class.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prototype> {
        self.prototypes.iter()
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }

    /// Embedding dimension, if any prototype exists
    pub fn dimension(&self) -> Option<usize> {
        self.prototypes.first().map(|p| p.vector.dimension())
    }
}

/// Build prototypes from a corpus directory.
///
/// Returns the prototypes together with the ordered class identifiers.
pub fn build_prototypes<E: Embedder>(
    embedder: &E,
    corpus_root: impl AsRef<Path>,
    batch_size: usize,
) -> Result<(PrototypeSet, Vec<String>)> {
    let corpus = ExemplarCorpus::scan(corpus_root)?;
    let embedded = embed_corpus(embedder, &corpus, batch_size)?;
    let prototypes = PrototypeSet::from_embedded(&embedded)?;
    let class_names = prototypes.class_names();

    info!("Computed prototypes for {} classes", class_names.len());

    Ok((prototypes, class_names))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prototype_is_elementwise_mean() {
        let embedded = EmbeddedCorpus::from_classes(vec![
            (
                "Tomato_Blight".to_string(),
                vec![Embedding::from(vec![1.0, 0.0]), Embedding::from(vec![0.0, 1.0])],
            ),
            ("Potato_Rust".to_string(), vec![Embedding::from(vec![0.0, 2.0])]),
        ]);

        let set = PrototypeSet::from_embedded(&embedded).unwrap();
        assert_eq!(set.len(), 2);

        let tomato = set.get("Tomato_Blight").unwrap();
        assert_eq!(tomato.vector.as_slice(), &[0.5, 0.5]);
        assert_eq!(tomato.exemplars, 2);

        // Not renormalized after averaging
        let potato = set.get("Potato_Rust").unwrap();
        assert_eq!(potato.vector.as_slice(), &[0.0, 2.0]);
    }

    #[test]
    fn test_class_order_follows_corpus() {
        let set = PrototypeSet::from_vectors([("b", vec![1.0]), ("a", vec![2.0])]);
        assert_eq!(set.class_names(), vec!["b".to_string(), "a".to_string()]);
        assert_eq!(set.dimension(), Some(1));
        assert!(set.get("c").is_none());
    }

    #[test]
    fn test_mismatched_dimensions_fail() {
        let embedded = EmbeddedCorpus::from_classes(vec![(
            "a".to_string(),
            vec![Embedding::from(vec![1.0, 0.0]), Embedding::from(vec![1.0])],
        )]);
        assert!(PrototypeSet::from_embedded(&embedded).is_err());
    }
}
