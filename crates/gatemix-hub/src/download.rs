//! Tokenizer downloading from HuggingFace Hub.

use gatemix_core::{GatemixError, Result};
use hf_hub::api::tokio::{Api, ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use std::path::{Path, PathBuf};

/// File name of a serialized tokenizer.
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Build API with optional token authentication.
fn build_api(token: Option<&str>) -> Result<Api> {
    let mut builder = ApiBuilder::new();

    if let Some(token) = token {
        builder = builder.with_token(Some(token.to_string()));
    }

    builder.build().map_err(|e| GatemixError::Hub(e.to_string()))
}

fn model_repo(api: &Api, repo_id: &str, revision: Option<&str>) -> ApiRepo {
    match revision {
        Some(rev) => api.repo(Repo::with_revision(
            repo_id.to_string(),
            RepoType::Model,
            rev.to_string(),
        )),
        None => api.model(repo_id.to_string()),
    }
}

/// Download `tokenizer.json` from a model repository.
///
/// # Arguments
/// * `repo_id` - Repository identifier (e.g., "meta-llama/Llama-2-7b-hf")
/// * `revision` - Optional revision/branch (e.g., "main")
/// * `token` - Optional authentication token
pub async fn download_tokenizer(
    repo_id: &str,
    revision: Option<&str>,
    token: Option<&str>,
) -> Result<PathBuf> {
    download_file(repo_id, TOKENIZER_FILE, revision, token).await
}

/// Download a specific file from a model repository.
pub async fn download_file(
    repo_id: &str,
    filename: &str,
    revision: Option<&str>,
    token: Option<&str>,
) -> Result<PathBuf> {
    let api = build_api(token)?;
    let repo = model_repo(&api, repo_id, revision);

    tracing::info!("Downloading {} from {}...", filename, repo_id);
    repo.get(filename)
        .await
        .map_err(|e| GatemixError::Hub(format!("{repo_id}/{filename}: {e}")))
}

/// Find a tokenizer file at a local path.
///
/// A file is returned as is; a directory must contain `tokenizer.json`.
/// Returns `Ok(None)` when nothing exists at `path`.
pub fn local_tokenizer(path: &Path) -> Result<Option<PathBuf>> {
    if path.is_file() {
        return Ok(Some(path.to_path_buf()));
    }
    if path.is_dir() {
        let file = path.join(TOKENIZER_FILE);
        if file.is_file() {
            return Ok(Some(file));
        }
        return Err(GatemixError::Config(format!(
            "Directory {} has no {}",
            path.display(),
            TOKENIZER_FILE
        )));
    }
    Ok(None)
}

/// Resolve a tokenizer argument to a local `tokenizer.json`.
///
/// Local files and directories take precedence; anything else is treated
/// as a Hub repository id and downloaded into the Hub cache.
pub async fn resolve_tokenizer(
    id_or_path: &str,
    revision: Option<&str>,
    token: Option<&str>,
) -> Result<PathBuf> {
    if let Some(path) = local_tokenizer(Path::new(id_or_path))? {
        tracing::debug!(path = %path.display(), "Using local tokenizer");
        return Ok(path);
    }
    download_tokenizer(id_or_path, revision, token).await
}
