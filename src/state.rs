//! Registry persistence: atomic JSON document storage

use crate::registry::ModelRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

// ============================================================================
// Trait Definitions
// ============================================================================

/// Trait for storage backend operations
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Save content to a file path atomically
    async fn save(&self, path: &Path, content: &str) -> Result<()>;

    /// Load content from a file path
    /// Returns None if file doesn't exist
    async fn load(&self, path: &Path) -> Result<Option<String>>;

    /// Check if a file exists
    fn exists(&self, path: &Path) -> bool;
}

// ============================================================================
// Production Implementation
// ============================================================================

/// Production storage backend using tokio::fs
pub struct FileSystemStorage;

impl FileSystemStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileSystemStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for FileSystemStorage {
    async fn save(&self, path: &Path, content: &str) -> Result<()> {
        // Atomic write: write to temp file, then rename
        let temp_file = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_file)
            .await
            .context("Failed to create temp registry file")?;
        file.write_all(content.as_bytes())
            .await
            .context("Failed to write registry file")?;
        file.sync_all()
            .await
            .context("Failed to sync registry file")?;

        fs::rename(&temp_file, path)
            .await
            .context("Failed to rename temp registry file")?;

        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<Option<String>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read registry file: {:?}", path))?;

        Ok(Some(content))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

// ============================================================================
// Registry Document
// ============================================================================

/// On-disk shape of the registry: the record array plus bookkeeping fields
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistryDocument {
    pub models: Vec<ModelRecord>,
    pub count: usize,
    pub last_updated: DateTime<Utc>,
}

/// Persists the registry document, rewriting the whole file atomically on
/// every mutation so a crash never leaves a partially written registry.
pub struct RegistryPersistence {
    path: PathBuf,
    storage: Arc<dyn StorageBackend>,
}

impl RegistryPersistence {
    /// Create a persistence handle with the default filesystem storage
    pub fn new(path: PathBuf) -> Self {
        Self::with_storage(path, Arc::new(FileSystemStorage::new()))
    }

    /// Create a persistence handle with a custom storage backend
    pub fn with_storage(path: PathBuf, storage: Arc<dyn StorageBackend>) -> Self {
        Self { path, storage }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the registry document to disk atomically
    pub async fn save(&self, models: &[ModelRecord]) -> Result<()> {
        let document = RegistryDocument {
            models: models.to_vec(),
            count: models.len(),
            last_updated: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&document)
            .context("Failed to serialize registry to JSON")?;

        self.storage.save(&self.path, &content).await?;

        tracing::debug!(path = ?self.path, models = document.count, "Registry saved");

        Ok(())
    }

    /// Load records from disk.
    /// FAILS HARD if the document is corrupted - user must fix or delete.
    pub async fn load(&self) -> Result<Option<Vec<ModelRecord>>> {
        let content = match self.storage.load(&self.path).await? {
            Some(c) => c,
            None => {
                tracing::info!(path = ?self.path, "No registry file found, starting fresh");
                return Ok(None);
            }
        };

        let document: RegistryDocument = serde_json::from_str(&content).with_context(|| {
            format!(
                "Failed to parse registry file: {:?}. File may be corrupted. \
                Please delete or fix the file manually.",
                self.path
            )
        })?;

        tracing::info!(
            models = document.count,
            last_updated = %document.last_updated,
            "Registry loaded from disk"
        );

        Ok(Some(document.models))
    }
}
