//! Deterministic image preprocessing shared by exemplars and queries
//!
//! Mirrors the evaluation transform the encoder was trained against:
//! resize the shorter side to 256, center-crop 224, scale to `[0, 1]` and
//! normalize with ImageNet channel statistics. No augmentation is ever
//! applied, so the same file always yields the same tensor.

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, RgbImage};
use leafguard_core::{Error, Result};
use std::path::Path;

/// Target length of the shorter image side before cropping
pub const RESIZE_SHORTER_SIDE: u32 = 256;

/// Side length of the square center crop fed to the encoder
pub const CROP_SIZE: u32 = 224;

/// ImageNet per-channel mean (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet per-channel standard deviation (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Number of color channels in a preprocessed image
pub const CHANNELS: usize = 3;

/// Source of an image to classify
#[derive(Debug, Clone, Copy)]
pub enum ImageInput<'a> {
    /// Image file on disk
    Path(&'a Path),
    /// Encoded image bytes (JPEG, PNG, ...)
    Bytes(&'a [u8]),
}

impl<'a> From<&'a Path> for ImageInput<'a> {
    fn from(path: &'a Path) -> Self {
        Self::Path(path)
    }
}

impl<'a> From<&'a [u8]> for ImageInput<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::Bytes(bytes)
    }
}

/// Normalized CHW float tensor for one image
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedImage {
    data: Vec<f32>,
    size: u32,
}

impl PreprocessedImage {
    /// Build from a CHW buffer of `3 * size * size` values
    pub fn from_chw(data: Vec<f32>, size: u32) -> Result<Self> {
        let expected = CHANNELS * (size as usize) * (size as usize);
        if data.len() != expected {
            return Err(Error::inference(format!(
                "preprocessed buffer has {} values, expected {}",
                data.len(),
                expected
            )));
        }
        Ok(Self { data, size })
    }

    /// Side length in pixels
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Whole CHW buffer
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// One channel plane (0 = R, 1 = G, 2 = B)
    pub fn channel(&self, index: usize) -> &[f32] {
        let plane = (self.size as usize) * (self.size as usize);
        &self.data[index * plane..(index + 1) * plane]
    }
}

/// Evaluation-mode image transform
#[derive(Debug, Clone)]
pub struct Preprocessor {
    resize_shorter_side: u32,
    crop_size: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            resize_shorter_side: RESIZE_SHORTER_SIDE,
            crop_size: CROP_SIZE,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

impl Preprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Crop size of produced images
    pub fn crop_size(&self) -> u32 {
        self.crop_size
    }

    /// Decode an input into an image
    pub fn decode(&self, input: ImageInput<'_>) -> Result<DynamicImage> {
        match input {
            // Format comes from the file content; the extension may lie
            ImageInput::Path(path) => ImageReader::open(path)
                .and_then(|reader| reader.with_guessed_format())
                .map_err(|e| Error::image_decode(format!("{}: {}", path.display(), e)))?
                .decode()
                .map_err(|e| Error::image_decode(format!("{}: {}", path.display(), e))),
            ImageInput::Bytes(bytes) => image::load_from_memory(bytes)
                .map_err(|e| Error::image_decode(format!("in-memory image: {}", e))),
        }
    }

    /// Decode and transform an input
    pub fn preprocess(&self, input: ImageInput<'_>) -> Result<PreprocessedImage> {
        let decoded = self.decode(input)?;
        self.transform(&decoded)
    }

    /// Resize, crop and normalize an already decoded image
    pub fn transform(&self, image: &DynamicImage) -> Result<PreprocessedImage> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Err(Error::image_decode("image has zero width or height"));
        }

        let (resized_w, resized_h) = resized_dimensions(width, height, self.resize_shorter_side);
        let resized = imageops::resize(&rgb, resized_w, resized_h, FilterType::Triangle);
        let cropped = self.center_crop(&resized)?;

        Ok(self.normalize(&cropped))
    }

    fn center_crop(&self, image: &RgbImage) -> Result<RgbImage> {
        let (width, height) = image.dimensions();
        if width < self.crop_size || height < self.crop_size {
            return Err(Error::image_decode(format!(
                "resized image {}x{} is smaller than the {}px crop",
                width, height, self.crop_size
            )));
        }

        let left = center_offset(width, self.crop_size);
        let top = center_offset(height, self.crop_size);
        Ok(imageops::crop_imm(image, left, top, self.crop_size, self.crop_size).to_image())
    }

    fn normalize(&self, image: &RgbImage) -> PreprocessedImage {
        let size = self.crop_size;
        let plane = (size as usize) * (size as usize);
        let mut data = vec![0.0f32; CHANNELS * plane];

        for (x, y, pixel) in image.enumerate_pixels() {
            let offset = (y as usize) * (size as usize) + x as usize;
            for c in 0..CHANNELS {
                let scaled = f32::from(pixel[c]) / 255.0;
                data[c * plane + offset] = (scaled - self.mean[c]) / self.std[c];
            }
        }

        PreprocessedImage { data, size }
    }
}

/// Dimensions after scaling the shorter side to `shorter`, truncating the longer side
fn resized_dimensions(width: u32, height: u32, shorter: u32) -> (u32, u32) {
    if width <= height {
        let long = (u64::from(shorter) * u64::from(height) / u64::from(width)) as u32;
        (shorter, long)
    } else {
        let long = (u64::from(shorter) * u64::from(width) / u64::from(height)) as u32;
        (long, shorter)
    }
}

/// Offset of a centered crop; half-pixel offsets round half to even
fn center_offset(dimension: u32, crop: u32) -> u32 {
    let diff = dimension - crop;
    let half = diff / 2;
    if diff % 2 == 1 && half % 2 == 1 {
        half + 1
    } else {
        half
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_resized_dimensions_keeps_aspect() {
        assert_eq!(resized_dimensions(512, 512, 256), (256, 256));
        assert_eq!(resized_dimensions(300, 600, 256), (256, 512));
        assert_eq!(resized_dimensions(640, 480, 256), (341, 256));
    }

    #[test]
    fn test_center_offset_rounds_half_to_even() {
        assert_eq!(center_offset(256, 224), 16);
        assert_eq!(center_offset(285, 224), 30);
        assert_eq!(center_offset(287, 224), 32);
        assert_eq!(center_offset(224, 224), 0);
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let bytes = solid_png(64, 40, [255, 0, 0]);
        let processed = Preprocessor::new()
            .preprocess(ImageInput::Bytes(&bytes))
            .unwrap();

        assert_eq!(processed.size(), CROP_SIZE);
        assert_eq!(processed.as_slice().len(), 3 * 224 * 224);

        let red = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let green = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        assert!(processed.channel(0).iter().all(|v| (v - red).abs() < 1e-5));
        assert!(processed.channel(1).iter().all(|v| (v - green).abs() < 1e-5));
    }

    #[test]
    fn test_preprocess_is_deterministic() {
        let bytes = solid_png(300, 200, [10, 120, 30]);
        let preprocessor = Preprocessor::new();
        let a = preprocessor.preprocess(ImageInput::Bytes(&bytes)).unwrap();
        let b = preprocessor.preprocess(ImageInput::Bytes(&bytes)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_format_detected_from_content_not_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaf.jpg");
        std::fs::write(&path, solid_png(48, 48, [0, 255, 0])).unwrap();

        let processed = Preprocessor::new()
            .preprocess(ImageInput::Path(&path))
            .unwrap();

        let green = (1.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        assert!(processed.channel(1).iter().all(|v| (v - green).abs() < 1e-5));
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let err = Preprocessor::new()
            .preprocess(ImageInput::Bytes(b"definitely not an image"))
            .unwrap_err();
        assert!(matches!(err, Error::ImageDecode(_)));
    }

    #[test]
    fn test_missing_file_fails_to_decode() {
        let err = Preprocessor::new()
            .preprocess(ImageInput::Path(Path::new("/nonexistent/leaf.jpg")))
            .unwrap_err();
        assert!(matches!(err, Error::ImageDecode(_)));
    }

    #[test]
    fn test_from_chw_validates_length() {
        assert!(PreprocessedImage::from_chw(vec![0.0; 3 * 4 * 4], 4).is_ok());
        assert!(PreprocessedImage::from_chw(vec![0.0; 10], 4).is_err());
    }
}
