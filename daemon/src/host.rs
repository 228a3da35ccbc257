//! Model host startup

use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use zserve_core::config::ModelConfig;
use zserve_core::ensure_model_weights;
use zserve_runtime_api::DiffusionModel;
use zserve_runtime_diffusion::{load_model, LoadOptions};

use crate::state::AppState;

/// Fetch weights if needed and load the model described by `config`.
///
/// Never fails: a load error leaves the host `Unavailable` and the server
/// keeps running.
pub async fn initialize(state: Arc<AppState>, config: ModelConfig) {
    initialize_with(state, move || {
        let path = ensure_model_weights(
            &config.path,
            &config.repo_id,
            config.verify,
            config.hf_token.clone(),
        )?;
        let options = LoadOptions {
            use_gpu: config.use_gpu,
            attention: config.attention.clone(),
        };
        load_model(&path, &options)
    })
    .await
}

/// Run `loader` on the blocking pool and publish its outcome to `state`
pub async fn initialize_with<F>(state: Arc<AppState>, loader: F)
where
    F: FnOnce() -> Result<Box<dyn DiffusionModel>> + Send + 'static,
{
    tracing::info!("Initializing Z-Image model...");
    let start = Instant::now();

    match tokio::task::spawn_blocking(loader).await {
        Ok(Ok(model)) => {
            tracing::info!(
                "Model {} loaded on {} in {:.1}s",
                model.name(),
                model.device(),
                start.elapsed().as_secs_f64()
            );
            state.set_ready(Arc::from(model)).await;
        }
        Ok(Err(e)) => {
            tracing::error!("Error loading model: {:#}", e);
            state.set_unavailable(format!("{:#}", e)).await;
        }
        Err(e) => {
            tracing::error!("Model loading task failed: {}", e);
            state
                .set_unavailable(format!("Model loading task failed: {}", e))
                .await;
        }
    }
}
