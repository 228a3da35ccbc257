//! zserve_core - Core library shared by the daemon and the CLI
//!
//! This crate provides:
//! - Configuration loading (`~/.config/zserve/config.toml`)
//! - Model weight resolution and download from HuggingFace

pub mod config;
pub mod weights;

pub use config::Config;
pub use weights::{ensure_model_weights, ModelLayout};
