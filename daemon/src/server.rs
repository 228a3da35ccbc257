use anyhow::Result;
use axum::{extract::DefaultBodyLimit, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use zserve_core::config::DaemonConfig;
use zserve_core::Config;

use crate::api;
use crate::host;
use crate::state::AppState;

/// Router with middleware, shared by `run_server` and the integration tests
pub fn build_router(state: Arc<AppState>, config: &DaemonConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    api::routes(state, &config.static_dir)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn run_server(config: Config) -> Result<()> {
    let static_dir = &config.daemon.static_dir;
    if !static_dir.exists() {
        tracing::info!("Creating static directory {:?}", static_dir);
        tokio::fs::create_dir_all(static_dir).await?;
    }

    let state = Arc::new(AppState::new(&config.generation));

    // Load in the background; until it finishes /api/generate answers 503
    tokio::spawn(host::initialize(state.clone(), config.model.clone()));

    let app = build_router(state, &config.daemon);

    let listener =
        tokio::net::TcpListener::bind((config.daemon.host.as_str(), config.daemon.port)).await?;
    tracing::info!("Starting daemon on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
