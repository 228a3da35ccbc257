pub mod generate;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};

use crate::state::AppState;

pub fn routes(state: Arc<AppState>, static_dir: &Path) -> Router {
    // Unknown paths fall back to the SPA entry point
    let static_files = ServeDir::new(static_dir)
        .append_index_html_on_directories(true)
        .fallback(ServeFile::new(static_dir.join("index.html")));

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/api/generate", post(generate::generate_image))
        .fallback_service(static_files)
        .with_state(state)
}
