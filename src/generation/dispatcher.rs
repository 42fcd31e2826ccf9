//! Generation dispatch
//!
//! Takes a request through `validated -> dispatched -> completed | failed`:
//! validation happens before any model access, strategy selection is keyed by
//! the model's kind plus the caller's explicit direct/pipeline choice, and
//! every failure surfaces as a classified taxonomy member.

use crate::cache::CachedModel;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::registry::{ModelKind, ModelRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

use super::params::{EffectiveParams, GenerationParams};
use super::pipeline::{self, PipelineRequest};

/// A direct (raw continuation) generation request
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model_id: String,
    pub prompt: String,
    pub params: GenerationParams,
    /// Caller-supplied deadline; falls back to the configured default
    pub timeout_ms: Option<u64>,
}

impl GenerationRequest {
    pub fn new(model_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            prompt: prompt.into(),
            params: GenerationParams::default(),
            timeout_ms: None,
        }
    }
}

/// A completed generation: text plus timing and the effective parameter set
/// actually used, for observability.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub model_id: String,
    /// "direct" or "pipeline:<task>"
    pub strategy: String,
    pub generated_text: String,
    pub duration_ms: u64,
    pub parameters: EffectiveParams,
    pub completed_at: DateTime<Utc>,
}

/// Selects a generation strategy and drives it with timeout propagation
pub struct Dispatcher {
    engine_defaults: GenerationParams,
    default_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            engine_defaults: config.generation_defaults.clone(),
            default_timeout: config.generation_timeout_secs.map(Duration::from_secs),
        }
    }

    /// Validate a direct request against a registry record. Runs before any
    /// model access: a rejected request triggers no load and no backend call.
    pub fn validate_direct(
        &self,
        record: &ModelRecord,
        request: &GenerationRequest,
    ) -> EngineResult<EffectiveParams> {
        if request.prompt.trim().is_empty() {
            return Err(EngineError::InvalidParameters(
                "prompt must not be empty".to_string(),
            ));
        }

        let params =
            EffectiveParams::resolve(&request.params, &record.parameters, &self.engine_defaults)?;

        if record.model_kind == ModelKind::FillMask {
            return Err(EngineError::IncompatibleKind {
                model_id: record.model_id.clone(),
                requested: "direct generation".to_string(),
                reason: "mask-filling models have no generation head".to_string(),
            });
        }

        Ok(params)
    }

    /// Validate a pipeline request and shape its backend prompt
    pub fn validate_pipeline(
        &self,
        record: &ModelRecord,
        request: &PipelineRequest,
    ) -> EngineResult<(String, EffectiveParams)> {
        if request.input.trim().is_empty() {
            return Err(EngineError::InvalidParameters(
                "input must not be empty".to_string(),
            ));
        }

        let mut overrides = request.params.clone();
        if let Some(limit) = request.max_target_tokens {
            overrides.max_new_tokens = Some(limit);
        }
        let params =
            EffectiveParams::resolve(&overrides, &record.parameters, &self.engine_defaults)?;

        if !request.task.compatible_with(record.model_kind) {
            return Err(EngineError::IncompatibleKind {
                model_id: record.model_id.clone(),
                requested: format!("pipeline task '{}'", request.task),
                reason: request.task.incompatibility_reason(record.model_kind),
            });
        }

        let prompt = pipeline::build_prompt(request)?;
        Ok((prompt, params))
    }

    /// Run a validated request against a loaded model.
    ///
    /// The caller's timeout (or the configured default) propagates down to
    /// the backend call; exceeding it classifies as `Timeout` and any backend
    /// error classifies as `GenerationError`, both without usage updates.
    pub async fn run(
        &self,
        model: &CachedModel,
        strategy: &str,
        prompt: &str,
        params: &EffectiveParams,
        timeout_ms: Option<u64>,
    ) -> EngineResult<GenerationOutcome> {
        let model_id = model.model_id().to_string();
        let started = Instant::now();
        let deadline = timeout_ms.map(Duration::from_millis).or(self.default_timeout);

        tracing::info!(model_id = %model_id, strategy, "Dispatching generation");

        let generation = model.generate(prompt, params);
        let result = match deadline {
            Some(limit) => match tokio::time::timeout(limit, generation).await {
                Ok(result) => result,
                Err(_) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    tracing::warn!(model_id = %model_id, elapsed_ms, "Generation timed out");
                    return Err(EngineError::Timeout {
                        model_id,
                        elapsed_ms,
                    });
                }
            },
            None => generation.await,
        };

        let generated_text = result.map_err(|reason| EngineError::GenerationError {
            model_id: model_id.clone(),
            reason,
        })?;

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            model_id = %model_id,
            strategy,
            duration_ms,
            chars = generated_text.len(),
            "Generation completed"
        );

        Ok(GenerationOutcome {
            model_id,
            strategy: strategy.to_string(),
            generated_text,
            duration_ms,
            parameters: params.clone(),
            completed_at: Utc::now(),
        })
    }
}
