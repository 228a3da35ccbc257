//! Z-Image pipeline implementation
//!
//! Wraps candle-transformers' z_image module for text-to-image and
//! image-to-image generation.

use anyhow::Result;
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::z_image::{
    calculate_shift, postprocess_image, AutoEncoderKL, Config, FlowMatchEulerDiscreteScheduler,
    SchedulerConfig, TextEncoderConfig, VaeConfig, ZImageTextEncoder, ZImageTransformer2DModel,
};
use image::imageops::FilterType;
use image::RgbImage;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;
use zserve_core::ModelLayout;
use zserve_runtime_api::{DiffusionModel, ImageGenRequest, ImageGenResponse};

use crate::device::{device_label, select_dtype};
use crate::noise::seeded_noise;
use crate::AttentionBackend;

/// Z-Image scheduler constants
const BASE_IMAGE_SEQ_LEN: usize = 256;
const MAX_IMAGE_SEQ_LEN: usize = 4096;
const BASE_SHIFT: f64 = 0.5;
const MAX_SHIFT: f64 = 1.15;

const LATENT_CHANNELS: usize = 16;
const VAE_ALIGN: usize = 16;

/// Z-Image generation pipeline
pub struct ZImagePipeline {
    tokenizer: Tokenizer,
    text_encoder: ZImageTextEncoder,
    transformer: ZImageTransformer2DModel,
    vae: AutoEncoderKL,
    /// Template cloned by every generation; never stepped in place
    scheduler: FlowMatchEulerDiscreteScheduler,
    device: Device,
    dtype: DType,
}

impl ZImagePipeline {
    /// Load Z-Image pipeline from a model directory
    pub fn load(model_path: &Path, device: &Device, attention: AttentionBackend) -> Result<Self> {
        let layout = ModelLayout::new(model_path);
        check_checkpoint(&layout)?;

        let dtype = select_dtype(device);
        tracing::info!(
            "Loading Z-Image from {:?} on {} ({:?}, {} attention)",
            model_path,
            device_label(device),
            dtype,
            attention
        );

        let tokenizer_path = layout.tokenizer();
        if !tokenizer_path.exists() {
            anyhow::bail!("Tokenizer not found at {:?}", tokenizer_path);
        }
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;

        let text_encoder_cfg: TextEncoderConfig =
            read_config(&layout.text_encoder_config())?.unwrap_or_else(TextEncoderConfig::z_image);
        let files = existing(layout.text_encoder_shards(), "Text encoder", model_path)?;
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files, dtype, device)? };
        let text_encoder = ZImageTextEncoder::new(&text_encoder_cfg, vb)?;
        tracing::debug!("Text encoder loaded");

        let transformer_cfg: Config =
            read_config(&layout.transformer_config())?.unwrap_or_else(Config::z_image_turbo);
        let files = existing(layout.transformer_shards(), "Transformer", model_path)?;
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files, dtype, device)? };
        let transformer = ZImageTransformer2DModel::new(&transformer_cfg, vb)?;
        tracing::debug!("Transformer loaded");

        let vae_cfg: VaeConfig =
            read_config(&layout.vae_config())?.unwrap_or_else(VaeConfig::z_image);
        let files = existing(vec![layout.vae_weights()], "VAE", model_path)?;
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files, dtype, device)? };
        let vae = AutoEncoderKL::new(&vae_cfg, vb)?;
        tracing::debug!("VAE loaded");

        let scheduler = FlowMatchEulerDiscreteScheduler::new(SchedulerConfig::z_image_turbo());

        Ok(Self {
            tokenizer,
            text_encoder,
            transformer,
            vae,
            scheduler,
            device: device.clone(),
            dtype,
        })
    }

    /// Format prompt for Qwen3 chat template
    fn format_prompt(prompt: &str) -> String {
        format!(
            "<|im_start|>user\n{}<|im_end|>\n<|im_start|>assistant\n",
            prompt
        )
    }

    /// Encode a prompt into caption features and an all-ones mask
    fn encode_prompt(&self, prompt: &str) -> Result<(Tensor, Tensor)> {
        let formatted = Self::format_prompt(prompt);
        let tokens = self
            .tokenizer
            .encode(formatted.as_str(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?
            .get_ids()
            .to_vec();
        let len = tokens.len();

        let input_ids = Tensor::from_vec(tokens, (1, len), &self.device)?;
        let feats = self.text_encoder.forward(&input_ids)?;
        let mask = Tensor::ones((1, len), DType::U8, &self.device)?;
        Ok((feats, mask))
    }

    /// (1, 3, H, W) tensor in [-1, 1], resized to the requested dimensions
    fn image_to_tensor(&self, image: &RgbImage, width: u32, height: u32) -> Result<Tensor> {
        let resized;
        let image = if image.dimensions() == (width, height) {
            image
        } else {
            resized = image::imageops::resize(image, width, height, FilterType::Lanczos3);
            &resized
        };

        let pixels = image.as_raw().clone();
        let tensor = Tensor::from_vec(pixels, (height as usize, width as usize, 3), &Device::Cpu)?
            .permute((2, 0, 1))?
            .to_dtype(DType::F32)?;
        let tensor = ((tensor / 127.5)? - 1.0)?;
        Ok(tensor
            .unsqueeze(0)?
            .to_device(&self.device)?
            .to_dtype(self.dtype)?)
    }

    /// Generate image from request
    fn generate_internal(&self, request: &ImageGenRequest) -> Result<ImageGenResponse> {
        let plan = prepare_generation(&self.device, request)?;
        let num_steps = plan.num_steps;

        let (cap_feats, cap_mask) = self.encode_prompt(&request.prompt)?;

        // Unconditional branch for CFG
        let negative = if request.guidance_scale > 1.0 {
            let neg_prompt = request.negative_prompt.as_deref().unwrap_or("");
            Some(self.encode_prompt(neg_prompt)?)
        } else {
            None
        };

        let patch_size = self.transformer.config().all_patch_size[0];
        let image_seq_len = (plan.latent_h / patch_size) * (plan.latent_w / patch_size);
        let mu = calculate_shift(
            image_seq_len,
            BASE_IMAGE_SEQ_LEN,
            MAX_IMAGE_SEQ_LEN,
            BASE_SHIFT,
            MAX_SHIFT,
        );

        let mut scheduler = self.scheduler.clone();
        scheduler.set_timesteps(num_steps, Some(mu));

        let noise = seeded_noise(request.seed, plan.latent_shape(), &self.device)?
            .to_dtype(self.dtype)?;

        let latents = match &request.init_image {
            None => noise,
            Some(init_image) => {
                let start = img2img_start_step(num_steps, request.strength)?;
                skip_steps(&mut scheduler, start);

                let pixels = self.image_to_tensor(init_image, request.width, request.height)?;
                let image_latents = self.vae.encode(&pixels)?;
                let sigma = scheduler.current_sigma();
                tracing::debug!(
                    "img2img: strength {}, starting at step {} (sigma {:.4})",
                    request.strength,
                    start,
                    sigma
                );
                ((noise * sigma)? + (image_latents * (1.0 - sigma))?)?
            }
        };

        // Add frame dimension
        let mut latents = latents.unsqueeze(2)?;

        // Denoising loop
        while !scheduler.is_complete() {
            let t = scheduler.current_timestep_normalized();
            let t_tensor =
                Tensor::from_vec(vec![t as f32], (1,), &self.device)?.to_dtype(self.dtype)?;

            let noise_pred = self
                .transformer
                .forward(&latents, &t_tensor, &cap_feats, &cap_mask)?;

            let noise_pred = match &negative {
                Some((neg_feats, neg_mask)) => {
                    let neg_pred = self
                        .transformer
                        .forward(&latents, &t_tensor, neg_feats, neg_mask)?;
                    let diff = (&noise_pred - &neg_pred)?;
                    (&neg_pred + (diff * request.guidance_scale as f64)?)?
                }
                None => noise_pred,
            };

            // Negate prediction (Z-Image specific)
            let noise_pred = noise_pred.neg()?;

            let prev_latents = scheduler.step(&noise_pred.squeeze(2)?, &latents.squeeze(2)?)?;
            latents = prev_latents.unsqueeze(2)?;
            tracing::trace!("Step {}/{}", scheduler.step_index(), scheduler.num_inference_steps());
        }

        // VAE decode
        let latents = latents.squeeze(2)?;
        let image = self.vae.decode(&latents)?;

        // Post-process, drop the batch dimension, CHW -> HWC
        let image = postprocess_image(&image)?.i(0)?;
        let (channels, h, w) = image.dims3()?;
        if channels != 3 {
            anyhow::bail!("Expected 3 channels from the VAE, got {}", channels);
        }
        let pixels: Vec<u8> = image.permute((1, 2, 0))?.flatten_all()?.to_vec1()?;

        Ok(ImageGenResponse {
            pixels,
            width: w as u32,
            height: h as u32,
        })
    }
}

impl DiffusionModel for ZImagePipeline {
    fn generate(&self, request: &ImageGenRequest) -> Result<ImageGenResponse> {
        self.generate_internal(request)
    }

    fn name(&self) -> &str {
        "Z-Image-Turbo"
    }

    fn device(&self) -> &str {
        device_label(&self.device)
    }
}

/// Step count and latent geometry of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GenerationPlan {
    num_steps: usize,
    latent_h: usize,
    latent_w: usize,
}

impl GenerationPlan {
    fn latent_shape(&self) -> (usize, usize, usize, usize) {
        (1, LATENT_CHANNELS, self.latent_h, self.latent_w)
    }
}

/// Validate a request and seed the device before any model work.
///
/// Initial noise never comes from the device generator. Only the VAE
/// posterior sample of image-to-image does, and candle's CPU backend
/// cannot be reseeded, so it is left alone there.
fn prepare_generation(device: &Device, request: &ImageGenRequest) -> Result<GenerationPlan> {
    let num_steps = request.steps as usize;
    if num_steps == 0 {
        anyhow::bail!("steps must be at least 1");
    }

    let height = request.height as usize;
    let width = request.width as usize;
    if height == 0 || width == 0 || height % VAE_ALIGN != 0 || width % VAE_ALIGN != 0 {
        anyhow::bail!(
            "Image dimensions must be positive and divisible by {}. Got {}x{}",
            VAE_ALIGN,
            width,
            height
        );
    }

    if request.init_image.is_some() && !device.is_cpu() {
        device.set_seed(request.seed)?;
    }

    Ok(GenerationPlan {
        num_steps,
        latent_h: 2 * (height / VAE_ALIGN),
        latent_w: 2 * (width / VAE_ALIGN),
    })
}

/// First scheduler step for image-to-image: `strength` of the schedule is
/// run, the leading remainder skipped.
pub fn img2img_start_step(num_steps: usize, strength: f32) -> Result<usize> {
    let strength = strength.clamp(0.0, 1.0);
    let init_steps = ((num_steps as f32 * strength) as usize).min(num_steps);
    if init_steps == 0 {
        anyhow::bail!(
            "strength {} with {} steps leaves no denoising steps",
            strength,
            num_steps
        );
    }
    Ok(num_steps - init_steps)
}

fn skip_steps(scheduler: &mut FlowMatchEulerDiscreteScheduler, start: usize) {
    scheduler.timesteps = scheduler.timesteps.split_off(start);
    scheduler.sigmas = scheduler.sigmas.split_off(start);
    scheduler.reset();
}

/// Reject directories that hold some other diffusers pipeline
fn check_checkpoint(layout: &ModelLayout) -> Result<()> {
    let config_path = layout.transformer_config();
    if config_path.exists() {
        let config_str = std::fs::read_to_string(&config_path)?;
        if !(config_str.contains("ZImage") || config_str.contains("z_image")) {
            anyhow::bail!(
                "{:?} does not describe a Z-Image transformer",
                config_path
            );
        }
    }
    Ok(())
}

fn read_config<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = std::fs::File::open(path)?;
    let cfg = serde_json::from_reader(file)
        .map_err(|e| anyhow::anyhow!("Invalid config {:?}: {}", path, e))?;
    Ok(Some(cfg))
}

fn existing(files: Vec<PathBuf>, what: &str, model_path: &Path) -> Result<Vec<PathBuf>> {
    let files: Vec<PathBuf> = files.into_iter().filter(|p| p.exists()).collect();
    if files.is_empty() {
        anyhow::bail!("{} weights not found in {:?}", what, model_path);
    }
    Ok(files)
}
