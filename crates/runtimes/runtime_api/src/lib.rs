//! zserve_runtime_api - Runtime API traits and types
//!
//! This crate defines the contract between the daemon and a loaded
//! diffusion model. The daemon only ever talks to a `DiffusionModel`, so
//! tests can swap in a fake without pulling in candle.

use anyhow::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Model host status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    Loading,
    Ready,
    Unavailable,
}

/// Image generation request
#[derive(Debug, Clone)]
pub struct ImageGenRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance_scale: f32,
    pub seed: u64,
    /// Source image for image-to-image generation
    pub init_image: Option<RgbImage>,
    /// How far to move away from `init_image` (0 keeps it, 1 ignores it)
    pub strength: f32,
}

impl Default for ImageGenRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: None,
            width: 1024,
            height: 1024,
            steps: 8,
            guidance_scale: 0.0,
            seed: 42,
            init_image: None,
            strength: 0.8,
        }
    }
}

/// Image generation response
#[derive(Debug, Clone)]
pub struct ImageGenResponse {
    /// Raw pixel data (RGB, u8, row-major)
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl ImageGenResponse {
    pub fn into_image(self) -> Result<RgbImage> {
        let (width, height) = (self.width, self.height);
        RgbImage::from_raw(width, height, self.pixels).ok_or_else(|| {
            anyhow::anyhow!(
                "Pixel buffer does not match a {}x{} RGB image",
                width,
                height
            )
        })
    }
}

impl From<RgbImage> for ImageGenResponse {
    fn from(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            pixels: image.into_raw(),
            width,
            height,
        }
    }
}

/// A loaded diffusion model, shared read-only across requests.
///
/// `generate` is blocking and compute-heavy; callers run it off the async
/// executor.
pub trait DiffusionModel: Send + Sync {
    /// Generate an image from a text prompt (and optional source image)
    fn generate(&self, request: &ImageGenRequest) -> Result<ImageGenResponse>;

    /// Get the model name
    fn name(&self) -> &str;

    /// Human-readable compute device, e.g. "cuda:0" or "cpu"
    fn device(&self) -> &str;
}
