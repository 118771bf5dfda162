//! Exemplar corpus discovery and embedding
//!
//! A corpus is a directory whose immediate subdirectories are classes and
//! whose files are labeled exemplar images:
//!
//! ```text
//! train/
//!   Potato_Rust/
//!     c1.jpg
//!   Tomato_Blight/
//!     a1.jpg
//!     a2.png
//! ```

use crate::embedder::{embed_checked, Embedder};
use crate::preprocess::{ImageInput, Preprocessor};
use leafguard_core::{Embedding, Error, Result, UNKNOWN_LABEL};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File extensions accepted as exemplar images
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "ppm", "bmp", "pgm", "tif", "tiff", "webp"];

/// Default number of exemplars embedded per encoder call
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// One class directory and its exemplar files
#[derive(Debug, Clone)]
pub struct ExemplarClass {
    pub name: String,
    pub files: Vec<PathBuf>,
}

/// Labeled exemplar images found on disk
#[derive(Debug, Clone)]
pub struct ExemplarCorpus {
    root: PathBuf,
    classes: Vec<ExemplarClass>,
}

impl ExemplarCorpus {
    /// Scan a corpus directory. Classes and files are ordered by name.
    pub fn scan(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(Error::data_not_found(format!(
                "exemplar directory not found at {}",
                root.display()
            )));
        }

        let mut class_dirs = visible_entries(root)?
            .into_iter()
            .filter(|p| p.is_dir())
            .collect::<Vec<_>>();
        class_dirs.sort();

        let mut classes = Vec::with_capacity(class_dirs.len());
        for dir in class_dirs {
            let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                warn!("Skipping class directory with non UTF-8 name: {}", dir.display());
                continue;
            };
            if name == UNKNOWN_LABEL {
                warn!(
                    "Skipping class directory {}: '{}' is the rejection label",
                    dir.display(),
                    UNKNOWN_LABEL
                );
                continue;
            }

            let mut files = visible_entries(&dir)?
                .into_iter()
                .filter(|p| p.is_file() && has_image_extension(p))
                .collect::<Vec<_>>();
            files.sort();

            classes.push(ExemplarClass { name, files });
        }

        let corpus = Self {
            root: root.to_path_buf(),
            classes,
        };

        if corpus.exemplar_count() == 0 {
            return Err(Error::data_not_found(format!(
                "no exemplar images under {}",
                root.display()
            )));
        }

        debug!(
            "Scanned {} classes with {} exemplars under {}",
            corpus.classes.len(),
            corpus.exemplar_count(),
            root.display()
        );

        Ok(corpus)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Classes in enumeration order, including empty ones
    pub fn classes(&self) -> &[ExemplarClass] {
        &self.classes
    }

    /// Total exemplar files across all classes
    pub fn exemplar_count(&self) -> usize {
        self.classes.iter().map(|c| c.files.len()).sum()
    }
}

/// Exemplar embeddings grouped by class
#[derive(Debug, Clone, Default)]
pub struct EmbeddedCorpus {
    classes: Vec<(String, Vec<Embedding>)>,
    skipped: Vec<PathBuf>,
}

impl EmbeddedCorpus {
    /// Build directly from embeddings, in class order
    pub fn from_classes(classes: Vec<(String, Vec<Embedding>)>) -> Self {
        Self {
            classes: classes.into_iter().filter(|(_, e)| !e.is_empty()).collect(),
            skipped: Vec::new(),
        }
    }

    /// Classes with at least one embedded exemplar, in corpus order
    pub fn classes(&self) -> &[(String, Vec<Embedding>)] {
        &self.classes
    }

    /// Files that failed to decode and were left out
    pub fn skipped(&self) -> &[PathBuf] {
        &self.skipped
    }

    pub fn embedding_count(&self) -> usize {
        self.classes.iter().map(|(_, e)| e.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Preprocess and embed every exemplar of a corpus.
///
/// Undecodable files are skipped; a class that ends up empty is dropped.
pub fn embed_corpus<E: Embedder>(
    embedder: &E,
    corpus: &ExemplarCorpus,
    batch_size: usize,
) -> Result<EmbeddedCorpus> {
    let preprocessor = Preprocessor::new();
    let batch_size = batch_size.max(1);
    let mut embedded = EmbeddedCorpus::default();
    let mut dimension: Option<usize> = None;

    for class in corpus.classes() {
        let mut embeddings = Vec::with_capacity(class.files.len());

        for chunk in class.files.chunks(batch_size) {
            let mut batch = Vec::with_capacity(chunk.len());
            for file in chunk {
                match preprocessor.preprocess(ImageInput::Path(file)) {
                    Ok(image) => batch.push(image),
                    Err(e) => {
                        warn!("Skipping exemplar {}: {}", file.display(), e);
                        metrics::counter!("leafguard_exemplars_skipped_total").increment(1);
                        embedded.skipped.push(file.clone());
                    }
                }
            }
            if batch.is_empty() {
                continue;
            }

            for embedding in embed_checked(embedder, &batch)? {
                match dimension {
                    None => dimension = Some(embedding.dimension()),
                    Some(d) if d != embedding.dimension() => {
                        return Err(Error::inference(format!(
                            "encoder produced {}-d embedding after {}-d ones",
                            embedding.dimension(),
                            d
                        )));
                    }
                    Some(_) => {}
                }
                embeddings.push(embedding);
            }
        }

        if embeddings.is_empty() {
            warn!("Class '{}' has no usable exemplars, leaving it out", class.name);
            continue;
        }

        debug!("Embedded {} exemplars for class '{}'", embeddings.len(), class.name);
        embedded.classes.push((class.name.clone(), embeddings));
    }

    if embedded.is_empty() {
        return Err(Error::data_not_found(format!(
            "no decodable exemplar images under {}",
            corpus.root().display()
        )));
    }

    info!(
        "Embedded {} exemplars across {} classes ({} skipped)",
        embedded.embedding_count(),
        embedded.classes.len(),
        embedded.skipped.len()
    );

    Ok(embedded)
}

fn visible_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!("Skipping entry with non UTF-8 name: {}", path.display());
            continue;
        };
        if !name.starts_with('.') {
            entries.push(path);
        }
    }
    Ok(entries)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
