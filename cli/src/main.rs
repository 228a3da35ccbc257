mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "zserve")]
#[command(author, version, about = "Serve Z-Image text-to-image generation over HTTP", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/zserve/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the generation server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory served as the web frontend
        #[arg(long)]
        static_dir: Option<PathBuf>,

        /// Local checkpoint directory
        #[arg(long)]
        model_path: Option<PathBuf>,

        /// Run on CPU instead of GPU
        #[arg(long)]
        cpu: bool,
    },

    /// Download model weights without starting the server
    Pull {
        /// HuggingFace repository (e.g., "Tongyi-MAI/Z-Image-Turbo")
        #[arg(long)]
        repo: Option<String>,

        /// Local checkpoint directory
        #[arg(long)]
        model_path: Option<PathBuf>,

        /// Check file sizes and safetensors headers after download
        #[arg(long)]
        verify: bool,
    },

    /// Show configuration
    Config {
        /// Config key (e.g., "daemon.port", "model.attention")
        key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            static_dir,
            model_path,
            cpu,
        } => {
            let overrides = commands::serve::Overrides {
                host,
                port,
                static_dir,
                model_path,
                cpu,
            };
            commands::serve::execute(config, overrides).await?;
        }
        Commands::Pull {
            repo,
            model_path,
            verify,
        } => {
            commands::pull::execute(config, repo, model_path, verify).await?;
        }
        Commands::Config { key } => {
            commands::config::execute(&config, cli.config.as_deref(), key.as_deref())?;
        }
    }

    Ok(())
}
