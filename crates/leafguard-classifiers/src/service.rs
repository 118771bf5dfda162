//! Model lifecycle: lazy initialization, cached access, and hot retrain
//!
//! A [`ModelService`] owns the active [`ModelBundle`]. Readers clone an
//! `Arc` to the bundle under a short read lock, so a retrain never blocks
//! an in-flight prediction and no caller can observe a half-built bundle.

use crate::calibration::{calibrate_embedded, Calibration};
use crate::classifier::{Prediction, PrototypeClassifier};
use crate::config::ClassifierConfig;
use crate::corpus::{embed_corpus, EmbeddedCorpus, ExemplarCorpus};
use crate::embedder::Embedder;
use crate::preprocess::ImageInput;
use crate::prototypes::PrototypeSet;
use leafguard_core::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a prediction needs, swapped as one unit
pub struct ModelBundle<E> {
    classifier: Arc<PrototypeClassifier<E>>,
    calibration: Calibration,
    generation: u64,
}

impl<E> ModelBundle<E> {
    pub fn classifier(&self) -> &Arc<PrototypeClassifier<E>> {
        &self.classifier
    }

    /// Calibration from the last full initialization
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn threshold(&self) -> f32 {
        self.calibration.threshold
    }

    /// 1 after the first initialization, incremented by every retrain
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Health of the service
#[derive(Debug, Clone, PartialEq)]
pub enum ModelStatus {
    Uninitialized,
    Ready {
        generation: u64,
        classes: usize,
        threshold: f32,
    },
}

impl ModelStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Owned container for the active classifier and its threshold
pub struct ModelService<E: Embedder> {
    config: ClassifierConfig,
    active: RwLock<Option<Arc<ModelBundle<E>>>>,
    // Serializes initialize and retrain so the encoder is loaded once per transition
    init_guard: Mutex<()>,
    generation: AtomicU64,
}

impl<E: Embedder> ModelService<E> {
    /// Create an uninitialized service. Nothing is loaded until first use.
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            active: RwLock::new(None),
            init_guard: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Load the encoder, calibrate, and build prototypes. No-op when ready.
    ///
    /// On failure the service stays uninitialized and the error is an
    /// [`Error::Initialization`] wrapping the cause.
    pub fn initialize(&self) -> Result<Arc<ModelBundle<E>>> {
        if let Some(bundle) = self.snapshot() {
            return Ok(bundle);
        }

        let _guard = self.init_guard.lock();

        // Another caller may have finished while we waited
        if let Some(bundle) = self.snapshot() {
            return Ok(bundle);
        }

        self.initialize_locked()
    }

    /// Active classifier, initializing on first access
    pub fn get_classifier(&self) -> Result<Arc<PrototypeClassifier<E>>> {
        Ok(Arc::clone(self.initialize()?.classifier()))
    }

    /// Active open-set threshold, initializing on first access
    pub fn get_threshold(&self) -> Result<f32> {
        Ok(self.initialize()?.threshold())
    }

    /// Classify with the active classifier and calibrated threshold
    pub fn predict(&self, image: ImageInput<'_>) -> Result<Prediction> {
        let bundle = self.initialize()?;
        bundle
            .classifier()
            .predict_with_threshold(image, bundle.threshold())
    }

    /// Reload the encoder and rebuild prototypes, keeping the current threshold.
    ///
    /// The new bundle replaces the old one in a single swap. If anything
    /// fails the previous bundle stays active. An uninitialized service is
    /// fully initialized instead.
    pub fn retrain(&self) -> Result<Arc<ModelBundle<E>>> {
        let _guard = self.init_guard.lock();

        let Some(current) = self.snapshot() else {
            info!("Retrain requested before initialization, running full initialization");
            return self.initialize_locked();
        };

        info!("Retraining prototypes (generation {})", current.generation());

        let rebuilt = self.load_embedded().and_then(|(embedder, embedded)| {
            let prototypes = PrototypeSet::from_embedded(&embedded)?;
            Ok((embedder, prototypes))
        });

        let (embedder, prototypes) = match rebuilt {
            Ok(parts) => parts,
            Err(e) => {
                warn!("Retrain failed, keeping generation {}: {}", current.generation(), e);
                return Err(e);
            }
        };

        let bundle = self.install(embedder, prototypes, current.calibration().clone());
        metrics::counter!("leafguard_retrains_total").increment(1);

        info!(
            "Retrain complete: generation {} with {} classes, threshold {:.3}",
            bundle.generation(),
            bundle.classifier().class_names().len(),
            bundle.threshold()
        );

        Ok(bundle)
    }

    /// Current health
    pub fn status(&self) -> ModelStatus {
        match self.snapshot() {
            None => ModelStatus::Uninitialized,
            Some(bundle) => ModelStatus::Ready {
                generation: bundle.generation(),
                classes: bundle.classifier().class_names().len(),
                threshold: bundle.threshold(),
            },
        }
    }

    /// Active bundle without triggering initialization
    pub fn snapshot(&self) -> Option<Arc<ModelBundle<E>>> {
        self.active.read().clone()
    }

    fn initialize_locked(&self) -> Result<Arc<ModelBundle<E>>> {
        info!(
            "Initializing model from {}",
            self.config.exemplar_dir.display()
        );

        let built = self.load_embedded().and_then(|(embedder, embedded)| {
            // Threshold and prototypes come from the same embedded corpus
            let prototypes = PrototypeSet::from_embedded(&embedded)?;
            let calibration =
                calibrate_embedded(&embedded, &prototypes, self.config.calibration.percentile)?;
            Ok((embedder, prototypes, calibration))
        });

        match built {
            Ok((embedder, prototypes, calibration)) => {
                let bundle = self.install(embedder, prototypes, calibration);
                info!(
                    "Model ready: {} classes, threshold {:.3}",
                    bundle.classifier().class_names().len(),
                    bundle.threshold()
                );
                Ok(bundle)
            }
            Err(e) => {
                warn!("Model initialization failed: {}", e);
                Err(Error::initialization(e))
            }
        }
    }

    fn load_embedded(&self) -> Result<(E, EmbeddedCorpus)> {
        self.config.validate()?;
        let embedder = E::load(&self.config.to_encoder_config())?;
        let corpus = ExemplarCorpus::scan(&self.config.exemplar_dir)?;
        let embedded = embed_corpus(&embedder, &corpus, self.config.batch_size)?;
        Ok((embedder, embedded))
    }

    fn install(
        &self,
        embedder: E,
        prototypes: PrototypeSet,
        calibration: Calibration,
    ) -> Arc<ModelBundle<E>> {
        let classifier = PrototypeClassifier::new(
            Arc::new(embedder),
            prototypes,
            self.config.device,
            calibration.threshold,
        );
        let bundle = Arc::new(ModelBundle {
            classifier: Arc::new(classifier),
            calibration,
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
        });

        *self.active.write() = Some(Arc::clone(&bundle));
        bundle
    }
}
