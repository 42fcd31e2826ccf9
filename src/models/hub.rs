//! Model artifact resolution
//!
//! A model identifier is either a local path (a `.gguf` file, or a directory
//! containing one) or a HuggingFace Hub repository id. Hub artifacts are
//! fetched through `hf-hub` into the standard hub cache layout:
//!
//! ```text
//! ~/.cache/huggingface/hub/
//! ├── models--TheBloke--TinyLlama-1.1B-Chat-v1.0-GGUF/
//! │   ├── snapshots/
//! │   │   └── {revision}/
//! │   │       ├── tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf
//! │   │       └── tokenizer.json
//! │   └── refs/
//! │       └── main
//! └── ...
//! ```
//!
//! In offline mode only already-cached snapshots are eligible.

use crate::error::{EngineError, EngineResult};
use hf_hub::api::tokio::ApiBuilder;
use std::path::{Path, PathBuf};

use super::loader::CAP_HUB_API;

pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Files a generation run needs on local disk
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    pub weights: PathBuf,
    pub tokenizer: PathBuf,
}

/// Resolve the artifact cache directory.
///
/// Checks in order: the configured override, `$HF_HOME/hub`,
/// `$XDG_CACHE_HOME/huggingface/hub`, `~/.cache/huggingface/hub`.
pub fn cache_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }

    if let Ok(hf_home) = std::env::var("HF_HOME") {
        return PathBuf::from(hf_home).join("hub");
    }

    if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
        return PathBuf::from(xdg_cache).join("huggingface/hub");
    }

    dirs::home_dir()
        .map(|h| h.join(".cache/huggingface/hub"))
        .unwrap_or_else(|| PathBuf::from("/tmp/huggingface/hub"))
}

/// Resolve a model identifier into local weight and tokenizer files
pub async fn resolve_artifacts(
    model_id: &str,
    cache_dir: &Path,
    offline: bool,
) -> EngineResult<ModelArtifacts> {
    let local = Path::new(model_id);
    if local.exists() {
        return resolve_local(model_id, local);
    }

    if offline {
        return resolve_cached(model_id, cache_dir);
    }

    resolve_remote(model_id, cache_dir).await
}

/// Pick a weight file from a list of artifact names.
///
/// Prefers 4-bit quantizations (`Q4_K_M` first, then any `Q4`), falling back
/// to the lexicographically first `.gguf`.
pub(crate) fn select_gguf<'a, I>(names: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut gguf: Vec<&str> = names
        .into_iter()
        .filter(|n| n.to_ascii_lowercase().ends_with(".gguf"))
        .collect();
    gguf.sort_unstable();

    gguf.iter()
        .find(|n| n.to_ascii_lowercase().contains("q4_k_m"))
        .or_else(|| gguf.iter().find(|n| n.to_ascii_lowercase().contains("q4")))
        .or_else(|| gguf.first())
        .map(|n| n.to_string())
}

fn resolve_local(model_id: &str, path: &Path) -> EngineResult<ModelArtifacts> {
    if path.is_file() {
        if !path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("gguf"))
        {
            return Err(EngineError::LoadFailure {
                model_id: model_id.to_string(),
                reason: format!("local file {:?} is not a GGUF artifact", path),
            });
        }
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tokenizer = dir.join(TOKENIZER_FILE);
        if !tokenizer.exists() {
            return Err(EngineError::LoadFailure {
                model_id: model_id.to_string(),
                reason: format!("{TOKENIZER_FILE} not found next to weight file in {:?}", dir),
            });
        }
        return Ok(ModelArtifacts {
            weights: path.to_path_buf(),
            tokenizer,
        });
    }

    // Directory: pick a GGUF file inside it
    let names = list_file_names(path);
    let weight_name = select_gguf(names.iter().map(String::as_str))
        .ok_or_else(|| EngineError::ModelNotFound(model_id.to_string()))?;
    let tokenizer = path.join(TOKENIZER_FILE);
    if !tokenizer.exists() {
        return Err(EngineError::LoadFailure {
            model_id: model_id.to_string(),
            reason: format!("{TOKENIZER_FILE} not found in {:?}", path),
        });
    }

    Ok(ModelArtifacts {
        weights: path.join(weight_name),
        tokenizer,
    })
}

/// Offline resolution: only an already-cached snapshot qualifies
fn resolve_cached(model_id: &str, cache_dir: &Path) -> EngineResult<ModelArtifacts> {
    let miss = |reason: String| EngineError::MissingDependency {
        capability: CAP_HUB_API.to_string(),
        reason,
    };

    let snapshot = cached_snapshot(model_id, cache_dir).ok_or_else(|| {
        miss(format!(
            "offline mode is enabled and '{model_id}' is not in the local cache"
        ))
    })?;

    let names = list_file_names(&snapshot);
    let weight_name = select_gguf(names.iter().map(String::as_str)).ok_or_else(|| {
        miss(format!(
            "offline mode is enabled and the cached snapshot of '{model_id}' has no GGUF artifact"
        ))
    })?;

    let tokenizer = snapshot.join(TOKENIZER_FILE);
    if !tokenizer.exists() {
        return Err(miss(format!(
            "offline mode is enabled and the cached snapshot of '{model_id}' is missing {TOKENIZER_FILE}"
        )));
    }

    Ok(ModelArtifacts {
        weights: snapshot.join(weight_name),
        tokenizer,
    })
}

async fn resolve_remote(model_id: &str, cache_dir: &Path) -> EngineResult<ModelArtifacts> {
    let api = ApiBuilder::new()
        .with_cache_dir(cache_dir.to_path_buf())
        .build()
        .map_err(|e| EngineError::LoadFailure {
            model_id: model_id.to_string(),
            reason: format!("failed to create hub client: {e}"),
        })?;

    let repo = api.model(model_id.to_string());

    let info = repo
        .info()
        .await
        .map_err(|e| classify_hub_error(model_id, &e))?;

    let names: Vec<String> = info.siblings.iter().map(|s| s.rfilename.clone()).collect();
    let weight_name =
        select_gguf(names.iter().map(String::as_str)).ok_or_else(|| EngineError::LoadFailure {
            model_id: model_id.to_string(),
            reason: "repository publishes no GGUF artifact".to_string(),
        })?;

    tracing::info!(model_id = %model_id, file = %weight_name, "Fetching model artifacts from hub");

    let weights = repo
        .get(&weight_name)
        .await
        .map_err(|e| classify_hub_error(model_id, &e))?;

    let tokenizer = repo
        .get(TOKENIZER_FILE)
        .await
        .map_err(|e| EngineError::LoadFailure {
            model_id: model_id.to_string(),
            reason: format!("failed to fetch {TOKENIZER_FILE}: {e}"),
        })?;

    Ok(ModelArtifacts { weights, tokenizer })
}

fn classify_hub_error(model_id: &str, err: &hf_hub::api::tokio::ApiError) -> EngineError {
    let text = err.to_string();
    if text.contains("404") || text.to_ascii_lowercase().contains("not found") {
        EngineError::ModelNotFound(model_id.to_string())
    } else {
        EngineError::LoadFailure {
            model_id: model_id.to_string(),
            reason: text,
        }
    }
}

/// Convert a model id to its hub cache directory name
/// (`org/name` -> `models--org--name`)
fn model_id_to_cache_name(model_id: &str) -> String {
    format!("models--{}", model_id.replace('/', "--"))
}

/// Locate the cached snapshot directory for a model, if one exists.
///
/// Resolves via `refs/main` first, falling back to the first snapshot that
/// contains a GGUF artifact.
fn cached_snapshot(model_id: &str, cache_dir: &Path) -> Option<PathBuf> {
    let model_dir = cache_dir.join(model_id_to_cache_name(model_id));

    let refs_main = model_dir.join("refs/main");
    if refs_main.exists()
        && let Ok(revision) = std::fs::read_to_string(&refs_main)
    {
        let snapshot = model_dir.join("snapshots").join(revision.trim());
        if snapshot.exists() {
            return Some(snapshot);
        }
    }

    let snapshots_dir = model_dir.join("snapshots");
    if let Ok(entries) = std::fs::read_dir(&snapshots_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let names = list_file_names(&path);
            if select_gguf(names.iter().map(String::as_str)).is_some() {
                return Some(path);
            }
        }
    }

    None
}

fn list_file_names(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
    }
    names
}
