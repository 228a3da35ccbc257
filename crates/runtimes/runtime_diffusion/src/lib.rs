//! zserve_runtime_diffusion - Diffusion model inference runtime
//!
//! This crate provides image generation using the Z-Image (S3-DiT)
//! architecture on top of candle.

mod attention;
mod device;
mod noise;
mod zimage;

use anyhow::Result;
use std::path::Path;
use zserve_runtime_api::DiffusionModel;

pub use attention::AttentionBackend;
pub use device::{device_label, select_device, select_dtype};
pub use noise::seeded_noise;
pub use zimage::{img2img_start_step, ZImagePipeline};

/// Options resolved from configuration before a load
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub use_gpu: bool,
    /// Attention backend name, e.g. from `ZIMAGE_ATTENTION`
    pub attention: String,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            use_gpu: true,
            attention: AttentionBackend::default().to_string(),
        }
    }
}

/// Load a Z-Image model from a local checkpoint directory.
///
/// Blocking: maps several gigabytes of weights onto the device.
pub fn load_model(model_path: &Path, options: &LoadOptions) -> Result<Box<dyn DiffusionModel>> {
    let attention: AttentionBackend = options.attention.parse()?;
    let device = select_device(options.use_gpu)?;
    let pipeline = ZImagePipeline::load(model_path, &device, attention)?;
    Ok(Box::new(pipeline))
}
