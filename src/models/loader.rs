//! Loader seam: the traits the cache drives on a miss, plus the production
//! GGUF loader.
//!
//! `ModelLoader` resolves a model identifier and declared kind into a loaded
//! [`ModelRuntime`]. The production implementation checks its external
//! capabilities before any network or disk I/O so a broken environment fails
//! fast and with a classified error.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::generation::params::EffectiveParams;
use crate::registry::ModelKind;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::gguf::GgufRuntime;
use super::{hub, metadata};

pub const CAP_GGUF_BACKEND: &str = "gguf-backend";
pub const CAP_TOKENIZERS: &str = "tokenizers";
pub const CAP_MODEL_CACHE: &str = "model-cache";
pub const CAP_HUB_API: &str = "hub-api";
pub const CAP_CUDA: &str = "cuda";

/// One external capability the loader depends on
#[derive(Debug, Clone, Serialize)]
pub struct Capability {
    pub name: String,
    pub present: bool,
    /// Loads cannot proceed while a required capability is absent
    pub required: bool,
    pub detail: String,
}

/// Result of a dependency check. Produced without side effects.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityReport {
    pub capabilities: Vec<Capability>,
}

impl CapabilityReport {
    pub fn is_present(&self, name: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.name == name && c.present)
    }

    pub fn missing_required(&self) -> Vec<&Capability> {
        self.capabilities
            .iter()
            .filter(|c| c.required && !c.present)
            .collect()
    }

    /// Capability name -> presence, the wire shape of dependency-check
    pub fn as_map(&self) -> BTreeMap<String, bool> {
        self.capabilities
            .iter()
            .map(|c| (c.name.clone(), c.present))
            .collect()
    }
}

/// Approximate resource footprint of a loaded model, for cache accounting
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeFootprint {
    pub approx_bytes: u64,
    /// Device placement label, e.g. "cpu" or "cuda:0"
    pub device: String,
}

/// A loaded, generation-capable model.
///
/// Implementations report whether concurrent `generate` calls are safe;
/// unless they are, the cache serializes generations per model.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Run one generation. The error side carries the backend cause as text;
    /// classification happens at the dispatcher boundary.
    async fn generate(&self, prompt: &str, params: &EffectiveParams) -> Result<String, String>;

    /// Whether this runtime tolerates concurrent `generate` calls
    fn concurrent_safe(&self) -> bool {
        false
    }

    fn footprint(&self) -> RuntimeFootprint;
}

impl std::fmt::Debug for dyn ModelRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRuntime")
            .field("footprint", &self.footprint())
            .field("concurrent_safe", &self.concurrent_safe())
            .finish()
    }
}

/// Resolves a model identifier into a loaded runtime
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Report the presence of each external capability, without side effects
    async fn check_capabilities(&self) -> CapabilityReport;

    /// Load a model. Fails with `MissingDependency` before any I/O when a
    /// required capability is absent, `ModelNotFound` when the identifier
    /// does not resolve, `IncompatibleKind` when the artifact cannot serve
    /// the declared kind, and `LoadFailure` for everything else.
    async fn load(
        &self,
        model_id: &str,
        model_kind: ModelKind,
    ) -> EngineResult<Arc<dyn ModelRuntime>>;
}

/// Production loader: GGUF artifacts executed by the quantized candle backend
pub struct GgufLoader {
    cache_dir: PathBuf,
    offline: bool,
}

impl GgufLoader {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            cache_dir: hub::cache_dir(config.model_cache_dir.as_deref()),
            offline: config.offline,
        }
    }
}

/// Whether the cache directory exists, or could be created under its nearest
/// existing ancestor. Deliberately probes nothing on disk.
fn cache_dir_usable(path: &Path) -> bool {
    let mut probe = path;
    loop {
        if probe.exists() {
            return !std::fs::metadata(probe)
                .map(|m| m.permissions().readonly())
                .unwrap_or(true);
        }
        match probe.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => probe = parent,
            _ => return false,
        }
    }
}

#[async_trait]
impl ModelLoader for GgufLoader {
    async fn check_capabilities(&self) -> CapabilityReport {
        let cuda = candle_core::utils::cuda_is_available();
        let cache_usable = cache_dir_usable(&self.cache_dir);

        CapabilityReport {
            capabilities: vec![
                Capability {
                    name: CAP_GGUF_BACKEND.to_string(),
                    present: true,
                    required: true,
                    detail: "quantized candle backend compiled in".to_string(),
                },
                Capability {
                    name: CAP_TOKENIZERS.to_string(),
                    present: true,
                    required: true,
                    detail: "in-process tokenizer support compiled in".to_string(),
                },
                Capability {
                    name: CAP_MODEL_CACHE.to_string(),
                    present: cache_usable,
                    required: true,
                    detail: if cache_usable {
                        format!("artifact cache at {:?}", self.cache_dir)
                    } else {
                        format!("artifact cache {:?} is not writable", self.cache_dir)
                    },
                },
                Capability {
                    name: CAP_HUB_API.to_string(),
                    present: !self.offline,
                    required: false,
                    detail: if self.offline {
                        "offline mode: only cached artifacts are served".to_string()
                    } else {
                        "hub downloads enabled".to_string()
                    },
                },
                Capability {
                    name: CAP_CUDA.to_string(),
                    present: cuda,
                    required: false,
                    detail: if cuda {
                        "CUDA device available".to_string()
                    } else {
                        "no CUDA device, inference runs on CPU".to_string()
                    },
                },
            ],
        }
    }

    async fn load(
        &self,
        model_id: &str,
        model_kind: ModelKind,
    ) -> EngineResult<Arc<dyn ModelRuntime>> {
        let report = self.check_capabilities().await;
        if let Some(cap) = report.missing_required().first() {
            return Err(EngineError::MissingDependency {
                capability: cap.name.clone(),
                reason: cap.detail.clone(),
            });
        }

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| EngineError::MissingDependency {
                capability: CAP_MODEL_CACHE.to_string(),
                reason: format!("cannot create artifact cache {:?}: {e}", self.cache_dir),
            })?;

        let artifacts = hub::resolve_artifacts(model_id, &self.cache_dir, self.offline).await?;

        let weights = artifacts.weights.clone();
        let meta = tokio::task::spawn_blocking(move || metadata::inspect(&weights))
            .await
            .map_err(|e| EngineError::LoadFailure {
                model_id: model_id.to_string(),
                reason: format!("inspection task panicked: {e}"),
            })?
            .map_err(|e| EngineError::LoadFailure {
                model_id: model_id.to_string(),
                reason: format!("{e:#}"),
            })?;

        metadata::check_kind(model_id, model_kind, &meta)?;

        let runtime = GgufRuntime::load(model_id, &artifacts, &meta).await?;
        Ok(Arc::new(runtime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn loader(cache_dir: &Path, offline: bool) -> GgufLoader {
        GgufLoader {
            cache_dir: cache_dir.to_path_buf(),
            offline,
        }
    }

    #[tokio::test]
    async fn test_capability_report_online() {
        let dir = TempDir::new().unwrap();
        let report = loader(dir.path(), false).check_capabilities().await;

        assert!(report.is_present(CAP_GGUF_BACKEND));
        assert!(report.is_present(CAP_TOKENIZERS));
        assert!(report.is_present(CAP_MODEL_CACHE));
        assert!(report.is_present(CAP_HUB_API));
        assert!(report.missing_required().is_empty());
    }

    #[tokio::test]
    async fn test_capability_report_offline_marks_hub_absent() {
        let dir = TempDir::new().unwrap();
        let report = loader(dir.path(), true).check_capabilities().await;

        assert!(!report.is_present(CAP_HUB_API));
        // Offline mode is degraded, not broken
        assert!(report.missing_required().is_empty());

        let map = report.as_map();
        assert_eq!(map.get(CAP_HUB_API), Some(&false));
        assert_eq!(map.get(CAP_GGUF_BACKEND), Some(&true));
    }

    #[tokio::test]
    async fn test_capability_check_has_no_side_effects() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("never/created");
        let report = loader(&cache_dir, false).check_capabilities().await;

        assert!(report.is_present(CAP_MODEL_CACHE));
        assert!(!cache_dir.exists());
    }

    #[tokio::test]
    async fn test_offline_uncached_load_is_missing_dependency() {
        let dir = TempDir::new().unwrap();
        let err = loader(dir.path(), true)
            .load("some-org/uncached-model", ModelKind::Causal)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::MissingDependency { ref capability, .. } if capability == CAP_HUB_API
        ));
    }

    #[test]
    fn test_cache_dir_usable_walks_to_existing_ancestor() {
        let dir = TempDir::new().unwrap();
        assert!(cache_dir_usable(&dir.path().join("a/b/c")));
        assert!(cache_dir_usable(dir.path()));
    }
}
