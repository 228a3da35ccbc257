use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable selecting the attention backend at load time
pub const ATTENTION_ENV: &str = "ZIMAGE_ATTENTION";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Model settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Generation dispatch settings
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Directory served as the static frontend (created if missing)
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Maximum accepted request body, in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// HuggingFace repository the weights are fetched from
    #[serde(default = "default_repo_id")]
    pub repo_id: String,

    /// Local directory holding (or receiving) the weights
    #[serde(default = "default_model_path")]
    pub path: PathBuf,

    /// Check file sizes and safetensors headers before loading
    #[serde(default)]
    pub verify: bool,

    /// Use GPU acceleration (Metal on macOS, CUDA on Linux)
    #[serde(default = "default_use_gpu")]
    pub use_gpu: bool,

    /// Attention backend name, overridden by `ZIMAGE_ATTENTION`
    #[serde(default = "default_attention")]
    pub attention: String,

    /// HuggingFace token for gated repositories
    #[serde(default)]
    pub hf_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Generations allowed to run at once on the device
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Seconds a request may wait for a free generation slot
    #[serde(default = "default_queue_timeout_secs")]
    pub queue_timeout_secs: u64,
}

fn default_port() -> u16 {
    8000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("web_app")
}

fn default_max_body_bytes() -> usize {
    32 * 1024 * 1024
}

fn default_repo_id() -> String {
    "Tongyi-MAI/Z-Image-Turbo".to_string()
}

fn default_model_path() -> PathBuf {
    PathBuf::from("ckpts/Z-Image-Turbo")
}

fn default_use_gpu() -> bool {
    true
}

fn default_attention() -> String {
    "native".to_string()
}

fn default_max_concurrent() -> usize {
    1
}

fn default_queue_timeout_secs() -> u64 {
    300
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            static_dir: default_static_dir(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            repo_id: default_repo_id(),
            path: default_model_path(),
            verify: false,
            use_gpu: default_use_gpu(),
            attention: default_attention(),
            hf_token: None,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_timeout_secs: default_queue_timeout_secs(),
        }
    }
}

impl Config {
    /// Get the base directory: ~/.config/zserve/
    pub fn base_dir() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .or_else(|_| std::env::var("USERPROFILE").map(PathBuf::from))
            .map_err(|_| anyhow::anyhow!("Could not determine home directory"))?;
        Ok(home.join(".config").join("zserve"))
    }

    /// Get the config file path: ~/.config/zserve/config.toml
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.toml"))
    }

    /// Load config from default location, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env(std::env::var(ATTENTION_ENV).ok());
        Ok(config)
    }

    /// Load config from an explicit file; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Invalid config file {:?}: {}", path, e))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Apply the value of `ZIMAGE_ATTENTION`, if set and non-empty
    pub fn apply_env(&mut self, attention: Option<String>) {
        if let Some(name) = attention.filter(|s| !s.trim().is_empty()) {
            self.model.attention = name.trim().to_string();
        }
    }

    /// Look up a single dotted key for `zserve config <key>`
    pub fn get(&self, key: &str) -> Result<String> {
        let value = match key {
            "daemon.host" => self.daemon.host.clone(),
            "daemon.port" => self.daemon.port.to_string(),
            "daemon.static_dir" => self.daemon.static_dir.display().to_string(),
            "daemon.max_body_bytes" => self.daemon.max_body_bytes.to_string(),
            "model.repo_id" => self.model.repo_id.clone(),
            "model.path" => self.model.path.display().to_string(),
            "model.verify" => self.model.verify.to_string(),
            "model.use_gpu" => self.model.use_gpu.to_string(),
            "model.attention" => self.model.attention.clone(),
            "model.hf_token" => self
                .model
                .hf_token
                .as_ref()
                .map(|_| "***".to_string())
                .unwrap_or_default(),
            "generation.max_concurrent" => self.generation.max_concurrent.to_string(),
            "generation.queue_timeout_secs" => self.generation.queue_timeout_secs.to_string(),
            _ => anyhow::bail!("Unknown config key: {}", key),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_serve_on_port_8000() {
        let config = Config::default();
        assert_eq!(config.daemon.port, 8000);
        assert_eq!(config.daemon.host, "0.0.0.0");
        assert_eq!(config.daemon.static_dir, PathBuf::from("web_app"));
        assert_eq!(config.model.path, PathBuf::from("ckpts/Z-Image-Turbo"));
        assert_eq!(config.model.attention, "native");
        assert!(!config.model.verify);
        assert_eq!(config.generation.max_concurrent, 1);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.daemon.port, 8000);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[daemon]\nport = 9100\n\n[generation]\nmax_concurrent = 2\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.daemon.port, 9100);
        assert_eq!(config.daemon.host, "0.0.0.0");
        assert_eq!(config.generation.max_concurrent, 2);
        assert_eq!(config.generation.queue_timeout_secs, 300);
        assert_eq!(config.model.repo_id, "Tongyi-MAI/Z-Image-Turbo");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[daemon\nport = ").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn attention_env_overrides_file() {
        let mut config = Config::default();
        config.apply_env(Some("flash".to_string()));
        assert_eq!(config.model.attention, "flash");

        config.apply_env(Some("   ".to_string()));
        assert_eq!(config.model.attention, "flash");

        config.apply_env(None);
        assert_eq!(config.model.attention, "flash");
    }

    #[test]
    fn get_masks_token_and_rejects_unknown_keys() {
        let mut config = Config::default();
        config.model.hf_token = Some("hf_secret".to_string());
        assert_eq!(config.get("model.hf_token").unwrap(), "***");
        assert_eq!(config.get("daemon.port").unwrap(), "8000");
        assert!(config.get("daemon.nope").is_err());
    }
}
