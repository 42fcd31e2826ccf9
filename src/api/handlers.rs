//! API request handlers
//!
//! Thin adapters: decode the request, call the engine facade, wrap the
//! result in the response envelope. No engine logic lives here.

use super::models::{
    ApiResponse, CacheClearResponse, CacheInfoResponse, DependencyCheckResponse, GenerateRequest,
    HealthResponse, ListModelsResponse, PipelineGenerateRequest, RegisterModelRequest,
};
use super::routes::AppState;
use crate::engine::RegisterModel;
use crate::error::{EngineError, EngineResult};
use crate::generation::dispatcher::{GenerationOutcome, GenerationRequest};
use crate::generation::pipeline::{PipelineRequest, PipelineTask};
use crate::registry::{ModelKind, ModelPatch, ModelRecord};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

fn required(field: Option<String>, name: &str) -> EngineResult<String> {
    field
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| EngineError::InvalidParameters(format!("{name} is required")))
}

/// GET /health - Service health check
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

/// POST /models - Register a model
pub async fn register_model(
    State(state): State<AppState>,
    Json(req): Json<RegisterModelRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ModelRecord>>), EngineError> {
    let model_id = required(req.model_id, "model_id")?;
    let model_kind: ModelKind = required(req.model_kind, "model_kind")?.parse()?;

    let record = state
        .engine
        .register(RegisterModel {
            model_id,
            display_name: req.display_name,
            description: req.description,
            model_kind,
            parameters: req.parameters,
        })
        .await?;

    Ok((StatusCode::CREATED, ApiResponse::ok(record)))
}

/// GET /models - List all registered models
pub async fn list_models(
    State(state): State<AppState>,
) -> Json<ApiResponse<ListModelsResponse>> {
    let models = state.engine.list().await;
    let count = models.len();
    ApiResponse::ok(ListModelsResponse { models, count })
}

/// GET /models/{model_id} - Get one model
///
/// Model ids contain slashes, so path segments arrive percent-encoded and
/// axum decodes them.
pub async fn get_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Result<Json<ApiResponse<ModelRecord>>, EngineError> {
    let record = state.engine.get(&model_id).await?;
    Ok(ApiResponse::ok(record))
}

/// PATCH /models/{model_id} - Update mutable fields
pub async fn update_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
    Json(patch): Json<ModelPatch>,
) -> Result<Json<ApiResponse<ModelRecord>>, EngineError> {
    let record = state.engine.update(&model_id, patch).await?;
    Ok(ApiResponse::ok(record))
}

/// DELETE /models/{model_id} - Remove a model and evict its cache entry
pub async fn remove_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Result<Json<ApiResponse<ModelRecord>>, EngineError> {
    let removed = state.engine.remove(&model_id).await?;
    Ok(ApiResponse::ok(removed))
}

/// POST /models/{model_id}/load - Explicitly load a model into the cache
pub async fn load_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> Result<Json<ApiResponse<ModelRecord>>, EngineError> {
    let record = state.engine.load(&model_id).await?;
    Ok(ApiResponse::ok(record))
}

/// POST /generate - Direct generation
pub async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<ApiResponse<GenerationOutcome>>, EngineError> {
    let model_id = required(req.model_id, "model_id")?;
    let prompt = req
        .prompt
        .ok_or_else(|| EngineError::InvalidParameters("prompt is required".to_string()))?;

    let outcome = state
        .engine
        .generate(GenerationRequest {
            model_id,
            prompt,
            params: req.parameters,
            timeout_ms: req.timeout_ms,
        })
        .await?;

    Ok(ApiResponse::ok(outcome))
}

/// POST /pipeline - Task-oriented pipeline generation
pub async fn pipeline_generate(
    State(state): State<AppState>,
    Json(req): Json<PipelineGenerateRequest>,
) -> Result<Json<ApiResponse<GenerationOutcome>>, EngineError> {
    let model_id = required(req.model_id, "model_id")?;
    let task: PipelineTask = required(req.task, "task")?.parse()?;
    let input = req
        .input
        .ok_or_else(|| EngineError::InvalidParameters("input is required".to_string()))?;

    let outcome = state
        .engine
        .pipeline_generate(PipelineRequest {
            model_id,
            task,
            input,
            params: req.parameters,
            source_lang: req.source_lang,
            target_lang: req.target_lang,
            context: req.context,
            history: req.history,
            max_input_chars: req.max_input_chars,
            max_target_tokens: req.max_target_tokens,
            timeout_ms: req.timeout_ms,
        })
        .await?;

    Ok(ApiResponse::ok(outcome))
}

/// GET /cache - Describe resident cache entries
pub async fn cache_info(State(state): State<AppState>) -> Json<ApiResponse<CacheInfoResponse>> {
    let entries = state.engine.cache_info().await;
    let total_cached = entries.len();
    ApiResponse::ok(CacheInfoResponse {
        entries,
        total_cached,
    })
}

/// DELETE /cache - Evict all cached models
pub async fn cache_clear(State(state): State<AppState>) -> Json<ApiResponse<CacheClearResponse>> {
    let evicted = state.engine.cache_clear().await;
    ApiResponse::ok(CacheClearResponse { evicted })
}

/// GET /stats - Aggregate usage statistics
pub async fn usage_statistics(
    State(state): State<AppState>,
) -> Json<ApiResponse<crate::usage::UsageStatistics>> {
    ApiResponse::ok(state.engine.usage_statistics().await)
}

/// GET /dependencies - Report external capability presence
pub async fn dependency_check(
    State(state): State<AppState>,
) -> Json<ApiResponse<DependencyCheckResponse>> {
    let report = state.engine.dependency_check().await;
    ApiResponse::ok(DependencyCheckResponse {
        capabilities: report.as_map(),
        details: report.capabilities,
    })
}
