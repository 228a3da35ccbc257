use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use zserve_core::config::GenerationConfig;
use zserve_runtime_api::{DiffusionModel, RuntimeStatus};

use crate::error::ApiError;

/// Lifecycle of the model host
#[derive(Clone)]
pub enum ModelState {
    Loading,
    Ready {
        model: Arc<dyn DiffusionModel>,
        loaded_at: DateTime<Utc>,
    },
    Unavailable {
        error: String,
    },
}

impl ModelState {
    pub fn status(&self) -> RuntimeStatus {
        match self {
            ModelState::Loading => RuntimeStatus::Loading,
            ModelState::Ready { .. } => RuntimeStatus::Ready,
            ModelState::Unavailable { .. } => RuntimeStatus::Unavailable,
        }
    }
}

pub struct AppState {
    model: RwLock<ModelState>,
    generation_slots: Arc<Semaphore>,
    queue_timeout: Duration,
}

impl AppState {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            model: RwLock::new(ModelState::Loading),
            generation_slots: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            queue_timeout: Duration::from_secs(config.queue_timeout_secs),
        }
    }

    /// State with a model already loaded
    pub fn with_model(config: &GenerationConfig, model: Arc<dyn DiffusionModel>) -> Self {
        Self {
            model: RwLock::new(ModelState::Ready {
                model,
                loaded_at: Utc::now(),
            }),
            ..Self::new(config)
        }
    }

    pub async fn model_state(&self) -> ModelState {
        self.model.read().await.clone()
    }

    pub async fn status(&self) -> RuntimeStatus {
        self.model.read().await.status()
    }

    /// The loaded model, or `ModelNotReady` while loading or after a failed load
    pub async fn ready_model(&self) -> Result<Arc<dyn DiffusionModel>, ApiError> {
        match &*self.model.read().await {
            ModelState::Ready { model, .. } => Ok(model.clone()),
            _ => Err(ApiError::ModelNotReady),
        }
    }

    pub async fn set_ready(&self, model: Arc<dyn DiffusionModel>) {
        let mut state = self.model.write().await;
        *state = ModelState::Ready {
            model,
            loaded_at: Utc::now(),
        };
    }

    pub async fn set_unavailable(&self, error: String) {
        let mut state = self.model.write().await;
        *state = ModelState::Unavailable { error };
    }

    /// Wait for a free generation slot, at most the configured queue timeout.
    ///
    /// The permit is owned so it can travel into the blocking task and stay
    /// held until the generation finishes, even if the client goes away.
    pub async fn acquire_generation_slot(&self) -> Result<OwnedSemaphorePermit, ApiError> {
        let slots = self.generation_slots.clone();
        if self.queue_timeout.is_zero() {
            return slots.try_acquire_owned().map_err(|_| ApiError::Busy);
        }

        match tokio::time::timeout(self.queue_timeout, slots.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_closed)) => Err(ApiError::Busy),
            Err(_elapsed) => {
                tracing::warn!(
                    "No generation slot freed up within {:?}, rejecting request",
                    self.queue_timeout
                );
                Err(ApiError::Busy)
            }
        }
    }
}
