use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use zserve_runtime_api::RuntimeStatus;

use crate::state::{AppState, ModelState};

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: RuntimeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness: the listener is up
pub async fn health() -> &'static str {
    "ok"
}

/// Readiness: 200 only once the model is loaded
pub async fn ready(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ReadyResponse>) {
    let model_state = state.model_state().await;
    let mut body = ReadyResponse {
        status: model_state.status(),
        model: None,
        device: None,
        loaded_at: None,
        error: None,
    };

    let code = match model_state {
        ModelState::Ready { model, loaded_at } => {
            body.model = Some(model.name().to_string());
            body.device = Some(model.device().to_string());
            body.loaded_at = Some(loaded_at);
            StatusCode::OK
        }
        ModelState::Loading => StatusCode::SERVICE_UNAVAILABLE,
        ModelState::Unavailable { error } => {
            body.error = Some(error);
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    (code, Json(body))
}
