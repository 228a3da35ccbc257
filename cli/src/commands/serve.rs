use anyhow::Result;
use std::path::PathBuf;
use zserve_core::Config;

/// Command-line values that take precedence over the config file
#[derive(Debug, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub static_dir: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub cpu: bool,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.daemon.host = host;
        }
        if let Some(port) = self.port {
            config.daemon.port = port;
        }
        if let Some(static_dir) = self.static_dir {
            config.daemon.static_dir = static_dir;
        }
        if let Some(model_path) = self.model_path {
            config.model.path = model_path;
        }
        if self.cpu {
            config.model.use_gpu = false;
        }
    }
}

pub async fn execute(mut config: Config, overrides: Overrides) -> Result<()> {
    overrides.apply(&mut config);

    println!("Starting zserve...");
    println!(
        "Listening on http://{}:{}",
        config.daemon.host, config.daemon.port
    );
    println!("Model: {} ({:?})", config.model.repo_id, config.model.path);
    println!("\nAPI endpoints:");
    println!("  POST /api/generate - Generate an image");
    println!("  GET  /health       - Liveness check");
    println!("  GET  /ready        - Model readiness");
    println!("  GET  /*            - Static files from {:?}", config.daemon.static_dir);
    println!("\nPress Ctrl+C to stop.\n");

    zserve_daemon::run_server(config).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_values() {
        let mut config = Config::default();
        Overrides {
            port: Some(9000),
            model_path: Some(PathBuf::from("/data/z")),
            cpu: true,
            ..Overrides::default()
        }
        .apply(&mut config);

        assert_eq!(config.daemon.port, 9000);
        assert_eq!(config.daemon.host, "0.0.0.0");
        assert_eq!(config.model.path, PathBuf::from("/data/z"));
        assert!(!config.model.use_gpu);
    }

    #[test]
    fn no_flags_change_nothing() {
        let mut config = Config::default();
        Overrides::default().apply(&mut config);
        assert!(config.model.use_gpu);
        assert_eq!(config.daemon.port, 8000);
    }
}
