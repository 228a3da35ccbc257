//! Model weight resolution
//!
//! A Z-Image checkpoint directory uses the diffusers layout:
//!
//! ```text
//! tokenizer/tokenizer.json
//! text_encoder/{config.json, model-0000N-of-00003.safetensors}
//! transformer/{config.json, diffusion_pytorch_model-0000N-of-00003.safetensors}
//! vae/{config.json, diffusion_pytorch_model.safetensors}
//! ```
//!
//! Missing files are fetched from HuggingFace with `hf-hub` and moved into
//! the checkpoint directory, so the loader only ever reads a flat layout.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

const SHARD_COUNT: usize = 3;

/// Upper bound for a safetensors JSON header
const MAX_HEADER_BYTES: u64 = 100 * 1024 * 1024;

/// Download staging area inside the checkpoint directory
const STAGING_DIR: &str = ".hf-cache";

/// File locations inside a Z-Image checkpoint directory
#[derive(Debug, Clone)]
pub struct ModelLayout {
    root: PathBuf,
}

impl ModelLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tokenizer(&self) -> PathBuf {
        self.root.join("tokenizer").join("tokenizer.json")
    }

    pub fn text_encoder_config(&self) -> PathBuf {
        self.root.join("text_encoder").join("config.json")
    }

    pub fn text_encoder_shards(&self) -> Vec<PathBuf> {
        (1..=SHARD_COUNT)
            .map(|i| {
                self.root
                    .join("text_encoder")
                    .join(format!("model-{:05}-of-{:05}.safetensors", i, SHARD_COUNT))
            })
            .collect()
    }

    pub fn transformer_config(&self) -> PathBuf {
        self.root.join("transformer").join("config.json")
    }

    pub fn transformer_shards(&self) -> Vec<PathBuf> {
        (1..=SHARD_COUNT)
            .map(|i| {
                self.root.join("transformer").join(format!(
                    "diffusion_pytorch_model-{:05}-of-{:05}.safetensors",
                    i, SHARD_COUNT
                ))
            })
            .collect()
    }

    pub fn vae_config(&self) -> PathBuf {
        self.root.join("vae").join("config.json")
    }

    pub fn vae_weights(&self) -> PathBuf {
        self.root
            .join("vae")
            .join("diffusion_pytorch_model.safetensors")
    }

    /// Files the pipeline cannot load without
    pub fn required_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.tokenizer()];
        files.extend(self.text_encoder_shards());
        files.extend(self.transformer_shards());
        files.push(self.vae_weights());
        files
    }

    /// Config files; the pipeline falls back to built-in defaults without them
    pub fn optional_files(&self) -> Vec<PathBuf> {
        vec![
            self.text_encoder_config(),
            self.transformer_config(),
            self.vae_config(),
        ]
    }

    pub fn missing_files(&self) -> Vec<PathBuf> {
        self.required_files()
            .into_iter()
            .filter(|p| !p.exists())
            .collect()
    }

    fn relative(&self, path: &Path) -> Result<String> {
        let rel = path
            .strip_prefix(&self.root)
            .with_context(|| format!("{:?} is outside {:?}", path, self.root))?;
        Ok(rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }
}

/// Make sure the weights for `repo_id` are present under `path` and return
/// the directory to load from.
///
/// Blocking: performs filesystem and network I/O.
pub fn ensure_model_weights(
    path: &Path,
    repo_id: &str,
    verify: bool,
    hf_token: Option<String>,
) -> Result<PathBuf> {
    let layout = ModelLayout::new(path);
    let missing = layout.missing_files();

    if missing.is_empty() {
        tracing::info!("Model weights found at {:?}", path);
    } else {
        tracing::info!(
            "{} weight file(s) missing under {:?}, downloading from HuggingFace: {}",
            missing.len(),
            path,
            repo_id
        );
        download(&layout, repo_id, hf_token)?;
    }

    if verify {
        verify_weights(&layout)?;
        tracing::info!("Model weights verified");
    }

    Ok(layout.root().to_path_buf())
}

fn download(layout: &ModelLayout, repo_id: &str, hf_token: Option<String>) -> Result<()> {
    fs::create_dir_all(layout.root())?;
    let staging = layout.root().join(STAGING_DIR);

    let api = hf_hub::api::sync::ApiBuilder::new()
        .with_cache_dir(staging.clone())
        .with_token(hf_token)
        .build()
        .context("Failed to create HuggingFace client")?;
    let repo = api.model(repo_id.to_string());

    for file in layout.missing_files() {
        let name = layout.relative(&file)?;
        tracing::info!("Downloading {}", name);
        let cached = repo
            .get(&name)
            .with_context(|| format!("Failed to download {} from {}", name, repo_id))?;
        place(&cached, &file)?;
    }

    for file in layout.optional_files() {
        if file.exists() {
            continue;
        }
        let name = layout.relative(&file)?;
        match repo.get(&name) {
            Ok(cached) => place(&cached, &file)?,
            Err(e) => tracing::warn!("Could not download {}: {}", name, e),
        }
    }

    if let Err(e) = fs::remove_dir_all(&staging) {
        tracing::warn!("Could not remove download cache {:?}: {}", staging, e);
    }
    Ok(())
}

/// Move a cached file (a snapshot symlink into the blob store) to `dest`
fn place(cached: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let blob = fs::canonicalize(cached)?;
    if fs::rename(&blob, dest).is_err() {
        fs::copy(&blob, dest)
            .with_context(|| format!("Failed to copy {:?} to {:?}", blob, dest))?;
    }
    Ok(())
}

/// Check every required file is non-empty and every safetensors file has a
/// readable header.
pub fn verify_weights(layout: &ModelLayout) -> Result<()> {
    let missing = layout.missing_files();
    if !missing.is_empty() {
        anyhow::bail!("Missing weight files: {:?}", missing);
    }

    for file in layout.required_files() {
        let len = fs::metadata(&file)?.len();
        if len == 0 {
            anyhow::bail!("Weight file {:?} is empty", file);
        }
        if file.extension().and_then(|e| e.to_str()) == Some("safetensors") {
            check_safetensors_header(&file, len)?;
        }
    }
    Ok(())
}

fn check_safetensors_header(path: &Path, file_len: u64) -> Result<()> {
    let mut file = File::open(path)?;
    let mut len_bytes = [0u8; 8];
    file.read_exact(&mut len_bytes)
        .with_context(|| format!("{:?} is too short for a safetensors header", path))?;

    let header_len = u64::from_le_bytes(len_bytes);
    if header_len > MAX_HEADER_BYTES || header_len + 8 > file_len {
        anyhow::bail!("{:?} has an invalid header length {}", path, header_len);
    }

    let mut header = vec![0u8; header_len as usize];
    file.read_exact(&mut header)?;
    let value: serde_json::Value = serde_json::from_slice(&header)
        .with_context(|| format!("{:?} has a corrupt safetensors header", path))?;
    if !value.is_object() {
        anyhow::bail!("{:?} header is not a JSON object", path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_safetensors(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let header = br#"{"__metadata__":{"format":"pt"}}"#;
        let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(header);
        fs::write(path, bytes).unwrap();
    }

    fn populate(layout: &ModelLayout) {
        fs::create_dir_all(layout.tokenizer().parent().unwrap()).unwrap();
        fs::write(layout.tokenizer(), "{}").unwrap();
        for shard in layout
            .text_encoder_shards()
            .into_iter()
            .chain(layout.transformer_shards())
        {
            write_safetensors(&shard);
        }
        write_safetensors(&layout.vae_weights());
    }

    #[test]
    fn layout_lists_diffusers_paths() {
        let layout = ModelLayout::new("/models/z");
        assert_eq!(
            layout.transformer_shards()[2],
            PathBuf::from("/models/z/transformer/diffusion_pytorch_model-00003-of-00003.safetensors")
        );
        assert_eq!(
            layout.text_encoder_shards()[0],
            PathBuf::from("/models/z/text_encoder/model-00001-of-00003.safetensors")
        );
        assert_eq!(layout.required_files().len(), 8);
        assert_eq!(
            layout.relative(&layout.vae_weights()).unwrap(),
            "vae/diffusion_pytorch_model.safetensors"
        );
    }

    #[test]
    fn complete_directory_is_returned_without_download() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ModelLayout::new(dir.path());
        populate(&layout);

        let resolved = ensure_model_weights(dir.path(), "unused/repo", true, None).unwrap();
        assert_eq!(resolved, dir.path());
    }

    #[test]
    fn verify_rejects_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ModelLayout::new(dir.path());
        populate(&layout);
        fs::write(layout.vae_weights(), b"").unwrap();

        let err = verify_weights(&layout).unwrap_err();
        assert!(err.to_string().contains("is empty"));
    }

    #[test]
    fn verify_rejects_corrupt_header() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ModelLayout::new(dir.path());
        populate(&layout);

        let shard = &layout.transformer_shards()[1];
        let mut bytes = 4u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"nope");
        fs::write(shard, bytes).unwrap();

        assert!(verify_weights(&layout).is_err());
    }

    #[test]
    fn verify_rejects_oversized_header_length() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ModelLayout::new(dir.path());
        populate(&layout);

        let mut bytes = 4096u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{}");
        fs::write(layout.vae_weights(), bytes).unwrap();

        let err = verify_weights(&layout).unwrap_err();
        assert!(err.to_string().contains("invalid header length"));
    }

    #[test]
    fn missing_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ModelLayout::new(dir.path());
        populate(&layout);
        fs::remove_file(layout.tokenizer()).unwrap();

        assert_eq!(layout.missing_files(), vec![layout.tokenizer()]);
        assert!(verify_weights(&layout).is_err());
    }
}
