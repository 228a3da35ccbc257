pub mod config;
pub mod pull;
pub mod serve;

use anyhow::Result;
use std::path::Path;
use zserve_core::config::ATTENTION_ENV;
use zserve_core::Config;

/// Load the config file (explicit or default) and apply environment overrides
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            let mut config = Config::load_from(path)?;
            config.apply_env(std::env::var(ATTENTION_ENV).ok());
            Ok(config)
        }
        None => Config::load(),
    }
}
