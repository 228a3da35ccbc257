use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use base64::{prelude::BASE64_STANDARD, Engine};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;
use zserve_runtime_api::{ImageGenRequest, ImageGenResponse};

use crate::error::ApiError;
use crate::state::AppState;

const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default = "default_dimension")]
    pub height: i64,
    #[serde(default = "default_dimension")]
    pub width: i64,
    #[serde(default = "default_steps")]
    pub steps: i64,
    #[serde(default)]
    pub guidance_scale: f32,
    #[serde(default = "default_seed")]
    pub seed: i64,
    /// Base64 payload or data URI of a source image
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default = "default_strength")]
    pub strength: f32,
    #[serde(default)]
    pub negative_prompt: Option<String>,
}

fn default_dimension() -> i64 {
    1024
}

fn default_steps() -> i64 {
    8
}

fn default_seed() -> i64 {
    42
}

fn default_strength() -> f32 {
    0.8
}

impl GenerateRequest {
    fn into_gen_request(self, init_image: Option<RgbImage>) -> anyhow::Result<ImageGenRequest> {
        Ok(ImageGenRequest {
            width: to_u32("width", self.width)?,
            height: to_u32("height", self.height)?,
            steps: to_u32("steps", self.steps)?,
            prompt: self.prompt,
            negative_prompt: self.negative_prompt,
            guidance_scale: self.guidance_scale,
            seed: self.seed as u64,
            init_image,
            strength: self.strength,
        })
    }
}

fn to_u32(field: &str, value: i64) -> anyhow::Result<u32> {
    u32::try_from(value)
        .map_err(|_| anyhow::anyhow!("{} is out of range for the generator: {}", field, value))
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub image: String,
}

pub async fn generate_image(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let Json(request) = payload?;
    let model = state.ready_model().await?;

    tracing::info!(
        "Generating image for prompt: {} ({}x{}, {} steps, seed {})",
        request.prompt,
        request.width,
        request.height,
        request.steps,
        request.seed
    );

    let init_image = match request.image.as_deref().filter(|s| !s.is_empty()) {
        Some(data) => Some(decode_input_image(data)?),
        None => None,
    };

    let gen_request = request.into_gen_request(init_image)?;
    let permit = state.acquire_generation_slot().await?;
    let start = Instant::now();

    let response = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        model.generate(&gen_request)
    })
    .await
    .map_err(|e| ApiError::Generation(format!("Generation task failed: {}", e)))?
    .map_err(|e| {
        tracing::error!("Generation error: {:#}", e);
        ApiError::from(e)
    })?;

    tracing::info!(
        "Generation completed in {:.2}s",
        start.elapsed().as_secs_f64()
    );

    let image = encode_png_data_uri(response)?;
    Ok(Json(GenerateResponse { image }))
}

/// Decode a raw base64 string or a data URI (`data:<mime>;base64,<payload>`)
/// into an RGB image.
pub fn decode_input_image(data: &str) -> Result<RgbImage, ApiError> {
    let payload = if data.contains(',') {
        data.split(',').nth(1).unwrap_or_default()
    } else {
        data
    };
    let payload: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = BASE64_STANDARD.decode(payload.as_bytes()).map_err(|e| {
        tracing::warn!("Error decoding image: {}", e);
        ApiError::InvalidImage
    })?;
    let image = image::load_from_memory(&bytes).map_err(|e| {
        tracing::warn!("Error decoding image: {}", e);
        ApiError::InvalidImage
    })?;
    Ok(image.to_rgb8())
}

/// PNG-encode a generated image as a `data:image/png;base64,` URI
pub fn encode_png_data_uri(response: ImageGenResponse) -> anyhow::Result<String> {
    let image = response.into_image()?;
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(format!(
        "{}{}",
        PNG_DATA_URI_PREFIX,
        BASE64_STANDARD.encode(&bytes)
    ))
}
