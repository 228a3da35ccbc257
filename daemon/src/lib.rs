//! zserve_daemon - HTTP server for Z-Image generation
//!
//! This crate provides the daemon server that:
//! - Loads the model once at startup, in the background
//! - Serves `POST /api/generate` plus liveness and readiness probes
//! - Hosts the static web frontend

pub mod api;
pub mod error;
pub mod host;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::{build_router, run_server};
pub use state::AppState;
