//! Model registry: the durable source of truth for known models

use crate::error::{EngineError, EngineResult};
use crate::generation::params::GenerationParams;
use crate::state::RegistryPersistence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Generation modality a registered model supports. Determines which
/// generation strategies are legal for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    #[serde(rename = "causal")]
    Causal,
    #[serde(rename = "seq2seq")]
    Seq2Seq,
    #[serde(rename = "conversational")]
    Conversational,
    #[serde(rename = "fill-mask")]
    FillMask,
    #[serde(rename = "summarization")]
    Summarization,
    #[serde(rename = "translation")]
    Translation,
    #[serde(rename = "question-answering")]
    QuestionAnswering,
}

impl ModelKind {
    pub const ALL: [ModelKind; 7] = [
        Self::Causal,
        Self::Seq2Seq,
        Self::Conversational,
        Self::FillMask,
        Self::Summarization,
        Self::Translation,
        Self::QuestionAnswering,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Causal => "causal",
            Self::Seq2Seq => "seq2seq",
            Self::Conversational => "conversational",
            Self::FillMask => "fill-mask",
            Self::Summarization => "summarization",
            Self::Translation => "translation",
            Self::QuestionAnswering => "question-answering",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
                EngineError::InvalidParameters(format!(
                    "unknown model_kind '{s}' (expected one of: {})",
                    known.join(", ")
                ))
            })
    }
}

/// Lifecycle status of a registered model.
///
/// `Loaded` reflects cache residency and is recomputed on read; `Error` is
/// persisted to record a previous load failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    #[default]
    Registered,
    Loaded,
    Error,
    Unavailable,
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registered => write!(f, "registered"),
            Self::Loaded => write!(f, "loaded"),
            Self::Error => write!(f, "error"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// One registry entry per registered model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Unique identifier; doubles as the load handle (hub repo id or local path)
    pub model_id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub model_kind: ModelKind,
    /// Generation-time defaults, overridable per request
    #[serde(default)]
    pub parameters: GenerationParams,
    pub added_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub status: ModelStatus,
}

impl ModelRecord {
    pub fn new(
        model_id: String,
        display_name: String,
        description: String,
        model_kind: ModelKind,
        parameters: GenerationParams,
    ) -> Self {
        Self {
            model_id,
            display_name,
            description,
            model_kind,
            parameters,
            added_at: Utc::now(),
            last_used_at: None,
            usage_count: 0,
            status: ModelStatus::Registered,
        }
    }
}

/// Partial update for a registry entry. Only mutable fields are present;
/// `model_id`, `added_at` and the usage counters cannot be patched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelPatch {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub parameters: Option<GenerationParams>,
    pub status: Option<ModelStatus>,
}

/// Thread-safe, insertion-ordered store of model records.
///
/// Records are kept in a vector so `list()` preserves registration order,
/// matching the persisted JSON array. Every mutation is persisted while the
/// write lock is held, so concurrent readers never observe a half-applied
/// update and the on-disk document never diverges from memory mid-mutation.
pub struct RegistryStore {
    records: RwLock<Vec<ModelRecord>>,
    persistence: RegistryPersistence,
}

impl RegistryStore {
    /// Open the store, restoring any previously persisted records
    pub async fn open(persistence: RegistryPersistence) -> anyhow::Result<Self> {
        let records = persistence.load().await?.unwrap_or_default();

        if !records.is_empty() {
            tracing::info!(models = records.len(), "Registry restored from disk");
        }

        Ok(Self {
            records: RwLock::new(records),
            persistence,
        })
    }

    /// Register a new model. Fails with `DuplicateModel` if the id is taken,
    /// leaving the existing record unmodified.
    pub async fn register(&self, record: ModelRecord) -> EngineResult<ModelRecord> {
        let mut records = self.records.write().await;

        if records.iter().any(|r| r.model_id == record.model_id) {
            return Err(EngineError::DuplicateModel(record.model_id));
        }

        records.push(record.clone());
        self.persist(&records).await?;

        tracing::info!(
            model_id = %record.model_id,
            model_kind = %record.model_kind,
            total_models = records.len(),
            "Model registered"
        );

        Ok(record)
    }

    /// Get a record by id
    pub async fn get(&self, model_id: &str) -> EngineResult<ModelRecord> {
        let records = self.records.read().await;
        records
            .iter()
            .find(|r| r.model_id == model_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(model_id.to_string()))
    }

    /// Apply a partial update to the mutable fields of a record
    pub async fn update(&self, model_id: &str, patch: ModelPatch) -> EngineResult<ModelRecord> {
        let mut records = self.records.write().await;

        let record = records
            .iter_mut()
            .find(|r| r.model_id == model_id)
            .ok_or_else(|| EngineError::NotFound(model_id.to_string()))?;

        if let Some(display_name) = patch.display_name {
            record.display_name = display_name;
        }
        if let Some(description) = patch.description {
            record.description = description;
        }
        if let Some(parameters) = patch.parameters {
            record.parameters = parameters;
        }
        if let Some(status) = patch.status {
            record.status = status;
        }

        let updated = record.clone();
        self.persist(&records).await?;

        Ok(updated)
    }

    /// Remove a record. Cache eviction is the facade's responsibility.
    pub async fn remove(&self, model_id: &str) -> EngineResult<ModelRecord> {
        let mut records = self.records.write().await;

        let index = records
            .iter()
            .position(|r| r.model_id == model_id)
            .ok_or_else(|| EngineError::NotFound(model_id.to_string()))?;

        let removed = records.remove(index);
        self.persist(&records).await?;

        tracing::info!(model_id = %model_id, "Model removed from registry");

        Ok(removed)
    }

    /// Snapshot of all records in insertion order
    pub async fn list(&self) -> Vec<ModelRecord> {
        let records = self.records.read().await;
        records.clone()
    }

    pub async fn count(&self) -> usize {
        let records = self.records.read().await;
        records.len()
    }

    /// Record a successful generation: increment the usage counter and
    /// advance the last-used timestamp (never backwards).
    pub async fn record_use(
        &self,
        model_id: &str,
        timestamp: DateTime<Utc>,
    ) -> EngineResult<ModelRecord> {
        let mut records = self.records.write().await;

        let record = records
            .iter_mut()
            .find(|r| r.model_id == model_id)
            .ok_or_else(|| EngineError::NotFound(model_id.to_string()))?;

        record.usage_count += 1;
        record.last_used_at = Some(match record.last_used_at {
            Some(previous) if previous > timestamp => previous,
            _ => timestamp,
        });

        let updated = record.clone();
        self.persist(&records).await?;

        Ok(updated)
    }

    /// Set the persisted status flag (used to record load failures)
    pub async fn set_status(&self, model_id: &str, status: ModelStatus) -> EngineResult<()> {
        let mut records = self.records.write().await;

        let record = records
            .iter_mut()
            .find(|r| r.model_id == model_id)
            .ok_or_else(|| EngineError::NotFound(model_id.to_string()))?;

        if record.status == status {
            return Ok(());
        }
        record.status = status;

        self.persist(&records).await
    }

    /// Persist the current snapshot unconditionally (shutdown path)
    pub async fn flush(&self) -> EngineResult<()> {
        let records = self.records.read().await;
        self.persist(&records).await
    }

    /// Persist the full document; called with the write lock held
    async fn persist(&self, records: &[ModelRecord]) -> EngineResult<()> {
        self.persistence
            .save(records)
            .await
            .map_err(|e| EngineError::Storage(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> RegistryStore {
        let persistence = RegistryPersistence::new(dir.path().join("models.json"));
        RegistryStore::open(persistence).await.unwrap()
    }

    fn record(model_id: &str, kind: ModelKind) -> ModelRecord {
        ModelRecord::new(
            model_id.to_string(),
            model_id.to_string(),
            String::new(),
            kind,
            GenerationParams::default(),
        )
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let registered = store.register(record("gpt2", ModelKind::Causal)).await.unwrap();
        assert_eq!(registered.usage_count, 0);
        assert!(registered.last_used_at.is_none());

        let fetched = store.get("gpt2").await.unwrap();
        assert_eq!(fetched, registered);
    }

    #[tokio::test]
    async fn test_duplicate_rejection_leaves_original_unmodified() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let original = store.register(record("gpt2", ModelKind::Causal)).await.unwrap();

        let mut dup = record("gpt2", ModelKind::Summarization);
        dup.description = "a different record".to_string();
        let err = store.register(dup).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateModel(_)));

        let fetched = store.get("gpt2").await.unwrap();
        assert_eq!(fetched, original);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let err = store.get("not-a-model").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_mutable_fields_only() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let original = store.register(record("gpt2", ModelKind::Causal)).await.unwrap();

        let patch = ModelPatch {
            display_name: Some("GPT-2".to_string()),
            description: Some("small causal model".to_string()),
            parameters: Some(GenerationParams {
                temperature: Some(0.2),
                ..Default::default()
            }),
            status: None,
        };
        let updated = store.update("gpt2", patch).await.unwrap();

        assert_eq!(updated.display_name, "GPT-2");
        assert_eq!(updated.description, "small causal model");
        assert_eq!(updated.parameters.temperature, Some(0.2));
        // Immutable fields untouched
        assert_eq!(updated.model_id, original.model_id);
        assert_eq!(updated.added_at, original.added_at);
        assert_eq!(updated.usage_count, 0);
    }

    #[tokio::test]
    async fn test_update_missing() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let err = store
            .update("nope", ModelPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_then_get_fails() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store.register(record("gpt2", ModelKind::Causal)).await.unwrap();
        store.remove("gpt2").await.unwrap();

        let err = store.get("gpt2").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_list_preserves_insertion_order() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store.register(record("zeta/model", ModelKind::Causal)).await.unwrap();
        store.register(record("alpha/model", ModelKind::Causal)).await.unwrap();
        store.register(record("mid/model", ModelKind::Causal)).await.unwrap();

        let ids: Vec<String> = store.list().await.into_iter().map(|r| r.model_id).collect();
        assert_eq!(ids, vec!["zeta/model", "alpha/model", "mid/model"]);

        // Restartable: a second listing yields the same sequence
        let again: Vec<String> = store.list().await.into_iter().map(|r| r.model_id).collect();
        assert_eq!(ids, again);
    }

    #[tokio::test]
    async fn test_record_use_monotonic() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.register(record("gpt2", ModelKind::Causal)).await.unwrap();

        let t1 = Utc::now();
        let after_first = store.record_use("gpt2", t1).await.unwrap();
        assert_eq!(after_first.usage_count, 1);
        assert_eq!(after_first.last_used_at, Some(t1));

        let t2 = t1 + chrono::Duration::seconds(5);
        let after_second = store.record_use("gpt2", t2).await.unwrap();
        assert_eq!(after_second.usage_count, 2);
        assert_eq!(after_second.last_used_at, Some(t2));

        // An out-of-order timestamp still increments the counter but never
        // moves last_used_at backwards
        let stale = t1 - chrono::Duration::seconds(30);
        let after_third = store.record_use("gpt2", stale).await.unwrap();
        assert_eq!(after_third.usage_count, 3);
        assert_eq!(after_third.last_used_at, Some(t2));
    }

    #[tokio::test]
    async fn test_record_use_missing() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let err = store.record_use("nope", Utc::now()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_status_persists_error_flag() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.register(record("gpt2", ModelKind::Causal)).await.unwrap();

        store.set_status("gpt2", ModelStatus::Error).await.unwrap();
        assert_eq!(store.get("gpt2").await.unwrap().status, ModelStatus::Error);

        // Reopen from the same file: the error flag survives
        drop(store);
        let persistence = RegistryPersistence::new(dir.path().join("models.json"));
        let reopened = RegistryStore::open(persistence).await.unwrap();
        assert_eq!(reopened.get("gpt2").await.unwrap().status, ModelStatus::Error);
    }

    #[tokio::test]
    async fn test_reopen_restores_records() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir).await;
            store.register(record("a/one", ModelKind::Causal)).await.unwrap();
            store.register(record("b/two", ModelKind::Translation)).await.unwrap();
        }

        let store = open_store(&dir).await;
        assert_eq!(store.count().await, 2);
        let ids: Vec<String> = store.list().await.into_iter().map(|r| r.model_id).collect();
        assert_eq!(ids, vec!["a/one", "b/two"]);
    }

    #[test]
    fn test_model_kind_parse() {
        assert_eq!("causal".parse::<ModelKind>().unwrap(), ModelKind::Causal);
        assert_eq!(
            "question-answering".parse::<ModelKind>().unwrap(),
            ModelKind::QuestionAnswering
        );
        let err = "embedding".parse::<ModelKind>().unwrap_err();
        assert!(err.to_string().contains("unknown model_kind"));
    }

    #[test]
    fn test_model_kind_serde_names() {
        for kind in ModelKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            let parsed: ModelKind = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_model_status_display() {
        assert_eq!(ModelStatus::Registered.to_string(), "registered");
        assert_eq!(ModelStatus::Loaded.to_string(), "loaded");
        assert_eq!(ModelStatus::Error.to_string(), "error");
        assert_eq!(ModelStatus::Unavailable.to_string(), "unavailable");
    }
}
