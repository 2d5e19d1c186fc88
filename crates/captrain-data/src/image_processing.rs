//! Image preprocessing for vision encoders.
//!
//! Converts arbitrary-aspect-ratio RGB images into fixed-size square
//! tensors using CLIP-style normalization. Non-square sources are either
//! stretched by the resize or, when square padding is enabled, placed on a
//! square canvas first so aspect ratio is preserved.

use candle_core::{DType, Device, Tensor};
use captrain_core::{CaptrainError, Result};
use image::{imageops, DynamicImage, Rgb, RgbImage};
use std::path::Path;

/// ImageNet channel means. Scaled to 0-255 they give the background color
/// for square padding.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Configuration for CLIP-style image processing.
#[derive(Debug, Clone)]
pub struct ClipImageProcessorConfig {
    /// Target image size (width, height). Must be square.
    pub size: (u32, u32),
    /// Normalization mean (RGB).
    pub mean: [f32; 3],
    /// Normalization standard deviation (RGB).
    pub std: [f32; 3],
    /// Rescaling factor (e.g., 1/255.0).
    pub rescale_factor: f32,
    /// Pad to a square canvas before resizing instead of stretching.
    pub pad_to_square: bool,
    /// Background color for square padding.
    pub background_color: [u8; 3],
}

impl Default for ClipImageProcessorConfig {
    fn default() -> Self {
        Self {
            size: (336, 336), // CLIP ViT-L/14-336
            // CLIP stats (canonical values from OpenAI CLIP)
            #[allow(clippy::excessive_precision)]
            mean: [0.48145466, 0.4578275, 0.40821073],
            #[allow(clippy::excessive_precision)]
            std: [0.26862954, 0.26130258, 0.27577711],
            rescale_factor: 1.0 / 255.0,
            pad_to_square: false,
            background_color: [
                (IMAGENET_MEAN[0] * 255.0) as u8,
                (IMAGENET_MEAN[1] * 255.0) as u8,
                (IMAGENET_MEAN[2] * 255.0) as u8,
            ],
        }
    }
}

/// Expand an image to a square canvas of the given background color.
///
/// The shorter dimension is padded symmetrically; square inputs are
/// returned unchanged. Content is never cropped.
pub fn expand_to_square(img: &RgbImage, background: Rgb<u8>) -> RgbImage {
    let (width, height) = img.dimensions();
    if width == height {
        return img.clone();
    }

    let side = width.max(height);
    let mut canvas = RgbImage::from_pixel(side, side, background);
    let (x, y) = if width > height {
        (0, (side - height) / 2)
    } else {
        ((side - width) / 2, 0)
    };
    imageops::replace(&mut canvas, img, i64::from(x), i64::from(y));
    canvas
}

/// CLIP-style image processor.
#[derive(Debug, Clone)]
pub struct ClipImageProcessor {
    config: ClipImageProcessorConfig,
    device: Device,
}

impl ClipImageProcessor {
    /// Create a new processor.
    ///
    /// Fails if the configured target size is not square.
    pub fn new(config: ClipImageProcessorConfig) -> Result<Self> {
        if config.size.0 != config.size.1 {
            return Err(CaptrainError::InvalidArgument(format!(
                "processor size must be square, got {}x{}",
                config.size.0, config.size.1
            )));
        }
        Ok(Self {
            config,
            device: Device::Cpu,
        })
    }

    /// Place output tensors on the given device.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Load and preprocess an image from file.
    ///
    /// Returns a tensor of shape `[3, H, W]` (CHW format).
    pub fn preprocess(&self, image_path: impl AsRef<Path>) -> Result<Tensor> {
        let path = image_path.as_ref();
        let img = image::open(path).map_err(|e| {
            CaptrainError::Image(format!("failed to open image {}: {}", path.display(), e))
        })?;
        self.process_image(&img)
    }

    /// Process a loaded image.
    ///
    /// 1. Optionally pads to a square canvas
    /// 2. Resizes to the target size with bicubic interpolation
    /// 3. Converts to CHW float32 layout with rescaling and normalization
    ///
    /// Returns a tensor of shape `[3, H, W]`.
    pub fn process_image(&self, img: &DynamicImage) -> Result<Tensor> {
        let mut rgb = img.to_rgb8();
        if self.config.pad_to_square {
            rgb = expand_to_square(&rgb, Rgb(self.config.background_color));
        }

        let resized = imageops::resize(
            &rgb,
            self.config.size.0,
            self.config.size.1,
            imageops::FilterType::CatmullRom,
        );

        let width = resized.width() as usize;
        let height = resized.height() as usize;
        let num_pixels = height * width;
        let pixels = resized.as_raw();

        // Deinterleave RGB into channel planes, normalizing in one pass.
        let mut data = Vec::with_capacity(3 * num_pixels);
        for c in 0..3 {
            let mean = self.config.mean[c];
            let std = self.config.std[c];
            let scale = self.config.rescale_factor;

            data.extend((0..num_pixels).map(|i| {
                let pixel_val = pixels[i * 3 + c] as f32;
                (pixel_val * scale - mean) / std
            }));
        }

        Tensor::from_vec(data, (3, height, width), &self.device)
            .map_err(|e| CaptrainError::Tensor(e.to_string()))
    }

    /// Process a batch of images.
    ///
    /// Returns a tensor of shape `[N, 3, H, W]`.
    pub fn process_batch(&self, images: &[DynamicImage]) -> Result<Tensor> {
        if images.is_empty() {
            return Err(CaptrainError::InvalidArgument(
                "empty image batch".to_string(),
            ));
        }

        let processed = images
            .iter()
            .map(|img| self.process_image(img))
            .collect::<Result<Vec<_>>>()?;

        Tensor::stack(&processed, 0).map_err(|e| CaptrainError::Tensor(e.to_string()))
    }

    /// A zero-filled pixel tensor of shape `[3, H, W]`.
    ///
    /// Stand-in for records that carry no image.
    pub fn zero_image(&self) -> Result<Tensor> {
        let (width, height) = self.config.size;
        Tensor::zeros(
            (3, height as usize, width as usize),
            DType::F32,
            &self.device,
        )
        .map_err(|e| CaptrainError::Tensor(e.to_string()))
    }

    /// Get the config.
    pub fn config(&self) -> &ClipImageProcessorConfig {
        &self.config
    }
}
