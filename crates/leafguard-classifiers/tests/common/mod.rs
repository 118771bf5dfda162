//! Shared fixtures for integration tests
//!
//! [`ChannelMeanEmbedder`] embeds an image as its mean RGB color, so solid
//! color exemplars give fully controllable embeddings: a pure red image is
//! `(1, 0, 0)`, a pure green one `(0, 1, 0)`, and so on.

#![allow(dead_code)]

use image::{Rgb, RgbImage};
use leafguard_classifiers::preprocess::{IMAGENET_MEAN, IMAGENET_STD};
use leafguard_classifiers::{ClassifierConfig, Embedder, EncoderConfig, PreprocessedImage};
use leafguard_core::{Embedding, Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Contents of a valid mock weights file
pub const MOCK_WEIGHTS: &[u8] = b"channel-mean-encoder";

pub const RED: [u8; 3] = [255, 0, 0];
pub const GREEN: [u8; 3] = [0, 255, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];

/// Encoder mock: mean RGB value of the image in `[0, 1]`
pub struct ChannelMeanEmbedder;

impl Embedder for ChannelMeanEmbedder {
    fn load(config: &EncoderConfig) -> Result<Self> {
        let path = config.resolve_weights_path()?;
        let bytes = fs::read(&path)?;
        if bytes != MOCK_WEIGHTS {
            return Err(Error::encoder_load(format!(
                "{} is not a channel-mean encoder",
                path.display()
            )));
        }
        Ok(Self)
    }

    fn embed_batch(&self, images: &[PreprocessedImage]) -> Result<Vec<Embedding>> {
        Ok(images
            .iter()
            .map(|image| {
                let rgb = (0..3)
                    .map(|c| {
                        let plane = image.channel(c);
                        let mean = plane.iter().sum::<f32>() / plane.len() as f32;
                        mean * IMAGENET_STD[c] + IMAGENET_MEAN[c]
                    })
                    .collect::<Vec<_>>();
                Embedding::new(rgb)
            })
            .collect())
    }
}

/// Write a solid color PNG
pub fn write_solid_png(path: &Path, rgb: [u8; 3]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    RgbImage::from_pixel(32, 24, Rgb(rgb)).save(path).unwrap();
}

/// Encoded PNG bytes of a solid color
pub fn solid_png_bytes(rgb: [u8; 3]) -> Vec<u8> {
    let mut bytes = std::io::Cursor::new(Vec::new());
    RgbImage::from_pixel(32, 24, Rgb(rgb))
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

/// On-disk exemplar corpus plus mock weights
pub struct Fixture {
    pub dir: TempDir,
}

/// Route library logs through the test harness so they show up on failure
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("leafguard=debug")
        .with_test_writer()
        .try_init();
}

impl Fixture {
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("encoder.safetensors"), MOCK_WEIGHTS).unwrap();
        fs::create_dir_all(dir.path().join("train")).unwrap();
        Self { dir }
    }

    pub fn weights_path(&self) -> PathBuf {
        self.dir.path().join("encoder.safetensors")
    }

    pub fn corpus_root(&self) -> PathBuf {
        self.dir.path().join("train")
    }

    /// Add a solid color exemplar to a class
    pub fn exemplar(self, class: &str, file: &str, rgb: [u8; 3]) -> Self {
        write_solid_png(&self.corpus_root().join(class).join(file), rgb);
        self
    }

    /// Add a file that is not a decodable image
    pub fn corrupt_exemplar(self, class: &str, file: &str) -> Self {
        let path = self.corpus_root().join(class).join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"definitely not an image").unwrap();
        self
    }

    pub fn config(&self) -> ClassifierConfig {
        ClassifierConfig::default()
            .with_encoder_path(self.weights_path())
            .with_exemplar_dir(self.corpus_root())
    }

    pub fn encoder_config(&self) -> EncoderConfig {
        self.config().to_encoder_config()
    }
}

/// Two classes whose prototypes are orthogonal: Potato_Rust is green, Tomato_Blight red
pub fn two_class_fixture() -> Fixture {
    Fixture::new()
        .exemplar("Tomato_Blight", "a1.png", RED)
        .exemplar("Tomato_Blight", "a2.png", RED)
        .exemplar("Potato_Rust", "c1.png", GREEN)
}

pub fn approx(a: f32, b: f32, tolerance: f32) -> bool {
    (a - b).abs() < tolerance
}
