//! Engine facade
//!
//! Composes the registry store, model cache, loader, dispatcher and usage
//! tracker into the operations an external caller needs. Engines are
//! explicitly constructed and carry no process-global state, so tests can run
//! any number of isolated instances side by side.

use crate::cache::{CacheEntryInfo, CachedModel, ModelCache};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::generation::dispatcher::{Dispatcher, GenerationOutcome, GenerationRequest};
use crate::generation::params::{EffectiveParams, GenerationParams};
use crate::generation::pipeline::{self, PipelineRequest};
use crate::metrics;
use crate::models::{CapabilityReport, GgufLoader, ModelLoader};
use crate::registry::{ModelKind, ModelPatch, ModelRecord, ModelStatus, RegistryStore};
use crate::state::RegistryPersistence;
use crate::usage::{UsageStatistics, UsageTracker};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a caller supplies to register a model
#[derive(Debug, Clone)]
pub struct RegisterModel {
    pub model_id: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub model_kind: ModelKind,
    pub parameters: GenerationParams,
}

/// The model lifecycle and generation dispatch engine
pub struct Engine {
    config: EngineConfig,
    registry: Arc<RegistryStore>,
    cache: Arc<ModelCache>,
    loader: Arc<dyn ModelLoader>,
    dispatcher: Dispatcher,
    usage: UsageTracker,
    /// Required loader capabilities that were absent at construction; while
    /// non-empty, idle models read as `unavailable`
    missing_required: Vec<String>,
}

impl Engine {
    /// Construct an engine with the production GGUF loader
    pub async fn new(config: EngineConfig) -> anyhow::Result<Self> {
        let loader = Arc::new(GgufLoader::new(&config));
        Self::with_loader(config, loader).await
    }

    /// Construct an engine around an injected loader (the test seam)
    pub async fn with_loader(
        config: EngineConfig,
        loader: Arc<dyn ModelLoader>,
    ) -> anyhow::Result<Self> {
        let persistence = RegistryPersistence::new(config.registry_file.clone());
        let registry = Arc::new(RegistryStore::open(persistence).await?);
        let cache = Arc::new(ModelCache::new(config.max_resident_bytes));
        let dispatcher = Dispatcher::new(&config);
        let usage = UsageTracker::new(registry.clone());

        let report = loader.check_capabilities().await;
        let missing_required: Vec<String> = report
            .missing_required()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        if !missing_required.is_empty() {
            tracing::warn!(
                missing = ?missing_required,
                "Required loader capabilities are absent; models cannot be loaded"
            );
        }

        metrics::update_model_count(registry.count().await);

        Ok(Self {
            config,
            registry,
            cache,
            loader,
            dispatcher,
            usage,
            missing_required,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a new model. The identifier must be unique; the declared
    /// per-model parameter defaults are validated here so a broken default
    /// set is rejected at registration rather than at first generation.
    pub async fn register(&self, spec: RegisterModel) -> EngineResult<ModelRecord> {
        if spec.model_id.trim().is_empty() {
            return Err(EngineError::InvalidParameters(
                "model_id must not be empty".to_string(),
            ));
        }

        EffectiveParams::resolve(
            &GenerationParams::default(),
            &spec.parameters,
            &self.config.generation_defaults,
        )?;

        let display_name = spec
            .display_name
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| spec.model_id.clone());
        let record = ModelRecord::new(
            spec.model_id,
            display_name,
            spec.description.unwrap_or_default(),
            spec.model_kind,
            spec.parameters,
        );

        let record = self.registry.register(record).await?;
        metrics::record_model_registered(&record.model_id, record.model_kind.as_str());
        metrics::update_model_count(self.registry.count().await);

        Ok(self.overlay(record).await)
    }

    /// All records in registration order, with cache-derived status
    pub async fn list(&self) -> Vec<ModelRecord> {
        let mut records = Vec::new();
        for record in self.registry.list().await {
            records.push(self.overlay(record).await);
        }
        records
    }

    pub async fn get(&self, model_id: &str) -> EngineResult<ModelRecord> {
        let record = self.registry.get(model_id).await?;
        Ok(self.overlay(record).await)
    }

    /// Apply a partial update to the mutable fields of a record
    pub async fn update(&self, model_id: &str, patch: ModelPatch) -> EngineResult<ModelRecord> {
        if let Some(parameters) = &patch.parameters {
            EffectiveParams::resolve(
                &GenerationParams::default(),
                parameters,
                &self.config.generation_defaults,
            )?;
        }
        let record = self.registry.update(model_id, patch).await?;
        Ok(self.overlay(record).await)
    }

    /// Remove a model from the registry and evict any cached runtime, so a
    /// later generation against the id cannot hit a stale entry.
    pub async fn remove(&self, model_id: &str) -> EngineResult<ModelRecord> {
        let removed = self.registry.remove(model_id).await?;

        if self.cache.evict(model_id).await {
            tracing::info!(model_id = %model_id, "Evicted cached model on removal");
        }

        metrics::record_model_removed(model_id);
        metrics::update_model_count(self.registry.count().await);
        metrics::update_cache_occupancy(
            self.cache.len().await,
            self.cache.resident_bytes().await,
        );

        Ok(removed)
    }

    /// Explicitly load a model into the cache without generating
    pub async fn load(&self, model_id: &str) -> EngineResult<ModelRecord> {
        let record = self.registry.get(model_id).await?;
        self.ensure_loaded(&record).await?;
        self.get(model_id).await
    }

    /// Direct generation: a single continuation call against the model
    pub async fn generate(&self, request: GenerationRequest) -> EngineResult<GenerationOutcome> {
        let record = self.registry.get(&request.model_id).await?;
        let params = self.dispatcher.validate_direct(&record, &request)?;

        let started = Instant::now();
        let (model, remaining_ms) = self
            .load_with_deadline(&record, started, request.timeout_ms)
            .await?;
        let result = self
            .dispatcher
            .run(&model, "direct", &request.prompt, &params, remaining_ms)
            .await;

        self.finish_generation("direct", result).await
    }

    /// Pipeline generation: task-oriented pre/post-processing around the
    /// model call
    pub async fn pipeline_generate(
        &self,
        request: PipelineRequest,
    ) -> EngineResult<GenerationOutcome> {
        let record = self.registry.get(&request.model_id).await?;
        let (prompt, params) = self.dispatcher.validate_pipeline(&record, &request)?;
        let strategy = format!("pipeline:{}", request.task);

        let started = Instant::now();
        let (model, remaining_ms) = self
            .load_with_deadline(&record, started, request.timeout_ms)
            .await?;
        let result = self
            .dispatcher
            .run(&model, &strategy, &prompt, &params, remaining_ms)
            .await
            .map(|mut outcome| {
                outcome.generated_text =
                    pipeline::post_process(request.task, &outcome.generated_text);
                outcome
            });

        self.finish_generation(&strategy, result).await
    }

    /// Resident cache entries, without triggering any load
    pub async fn cache_info(&self) -> Vec<CacheEntryInfo> {
        self.cache.info().await
    }

    /// Evict all cached runtimes. Idempotent; returns the evicted count.
    pub async fn cache_clear(&self) -> usize {
        let evicted = self.cache.clear().await;
        metrics::update_cache_occupancy(0, 0);
        evicted
    }

    /// Aggregate usage numbers across all registered models
    pub async fn usage_statistics(&self) -> UsageStatistics {
        self.usage.statistics().await
    }

    /// Report external capability presence, without side effects
    pub async fn dependency_check(&self) -> CapabilityReport {
        self.loader.check_capabilities().await
    }

    /// Teardown: persist the registry and release every cached runtime
    pub async fn shutdown(&self) {
        if let Err(e) = self.registry.flush().await {
            tracing::error!(error = %e, "Failed to persist registry during shutdown");
        }
        let evicted = self.cache.clear().await;
        tracing::info!(evicted, "Engine shut down");
    }

    /// A caller-supplied deadline covers the load as well as the generation.
    /// Exceeding it during the load classifies as `Timeout`; whatever budget
    /// is left flows into the dispatcher. The abandoned load itself keeps
    /// running on its detached task and leaves the cache consistent.
    async fn load_with_deadline(
        &self,
        record: &ModelRecord,
        started: Instant,
        timeout_ms: Option<u64>,
    ) -> EngineResult<(Arc<CachedModel>, Option<u64>)> {
        match timeout_ms.map(Duration::from_millis) {
            Some(limit) => {
                let model = tokio::time::timeout(limit, self.ensure_loaded(record))
                    .await
                    .map_err(|_| EngineError::Timeout {
                        model_id: record.model_id.clone(),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    })??;
                let remaining = limit.saturating_sub(started.elapsed());
                Ok((model, Some(remaining.as_millis() as u64)))
            }
            None => Ok((self.ensure_loaded(record).await?, None)),
        }
    }

    /// Get the cached runtime for a record, loading it on a miss. Load
    /// outcomes are mirrored into the persisted status flag: a failure marks
    /// the record `error`, a later success clears that mark.
    async fn ensure_loaded(&self, record: &ModelRecord) -> EngineResult<Arc<CachedModel>> {
        let was_cached = self.cache.contains(&record.model_id).await;

        match self
            .cache
            .get_or_load(&record.model_id, record.model_kind, self.loader.clone())
            .await
        {
            Ok(model) => {
                if !was_cached {
                    metrics::record_model_load(&record.model_id, true);
                    metrics::update_cache_occupancy(
                        self.cache.len().await,
                        self.cache.resident_bytes().await,
                    );
                }
                if record.status == ModelStatus::Error
                    && let Err(e) = self
                        .registry
                        .set_status(&record.model_id, ModelStatus::Registered)
                        .await
                {
                    tracing::warn!(
                        model_id = %record.model_id,
                        error = %e,
                        "Failed to clear error status after successful load"
                    );
                }
                Ok(model)
            }
            Err(e) => {
                metrics::record_model_load(&record.model_id, false);
                if let Err(se) = self
                    .registry
                    .set_status(&record.model_id, ModelStatus::Error)
                    .await
                {
                    tracing::warn!(
                        model_id = %record.model_id,
                        error = %se,
                        "Failed to persist error status after failed load"
                    );
                }
                Err(e)
            }
        }
    }

    /// Common completion path: successful generations update usage, failures
    /// never do.
    async fn finish_generation(
        &self,
        strategy: &str,
        result: EngineResult<GenerationOutcome>,
    ) -> EngineResult<GenerationOutcome> {
        match result {
            Ok(outcome) => {
                self.usage.record_use(&outcome.model_id).await;
                metrics::record_generation(&outcome.model_id, strategy, "ok");
                metrics::record_generation_duration(&outcome.model_id, outcome.duration_ms);
                Ok(outcome)
            }
            Err(e) => {
                if let EngineError::GenerationError { model_id, .. }
                | EngineError::Timeout { model_id, .. } = &e
                {
                    metrics::record_generation(model_id, strategy, e.label());
                }
                Err(e)
            }
        }
    }

    /// Recompute the cache-derived status on a record as read
    async fn overlay(&self, mut record: ModelRecord) -> ModelRecord {
        if self.cache.contains(&record.model_id).await {
            record.status = ModelStatus::Loaded;
        } else {
            // Residency from a previous run is stale, not authoritative
            if record.status == ModelStatus::Loaded {
                record.status = ModelStatus::Registered;
            }
            if record.status == ModelStatus::Registered && !self.missing_required.is_empty() {
                record.status = ModelStatus::Unavailable;
            }
        }
        record
    }
}
