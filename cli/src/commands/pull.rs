use anyhow::Result;
use std::path::PathBuf;
use zserve_core::{ensure_model_weights, Config};

pub async fn execute(
    config: Config,
    repo: Option<String>,
    model_path: Option<PathBuf>,
    verify: bool,
) -> Result<()> {
    let repo_id = repo.unwrap_or(config.model.repo_id);
    let path = model_path.unwrap_or(config.model.path);
    let verify = verify || config.model.verify;
    let token = config.model.hf_token;

    println!("Pulling model: {}", repo_id);

    let resolved = tokio::task::spawn_blocking(move || {
        ensure_model_weights(&path, &repo_id, verify, token)
    })
    .await??;

    println!("\nModel weights ready at {:?}", resolved);
    Ok(())
}
