//! API request and response models

use crate::cache::CacheEntryInfo;
use crate::generation::params::GenerationParams;
use crate::generation::pipeline::ChatTurn;
use crate::models::Capability;
use crate::registry::ModelRecord;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Success envelope: `success` plus a payload and timestamp. The failure
/// side is produced by the error type's `IntoResponse`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
            timestamp: chrono::Utc::now(),
        })
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Request to register a model.
///
/// Required fields are optional here and validated by hand so a missing
/// field produces the classified 400 envelope rather than a bare decode
/// rejection.
#[derive(Debug, Deserialize)]
pub struct RegisterModelRequest {
    #[serde(default)]
    pub model_id: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub model_kind: Option<String>,

    #[serde(default)]
    pub parameters: GenerationParams,
}

/// Direct generation request. Generation parameters sit at the top level of
/// the JSON body alongside the prompt.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub model_id: Option<String>,

    #[serde(default)]
    pub prompt: Option<String>,

    #[serde(flatten)]
    pub parameters: GenerationParams,

    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Pipeline generation request
#[derive(Debug, Deserialize)]
pub struct PipelineGenerateRequest {
    #[serde(default)]
    pub model_id: Option<String>,

    #[serde(default)]
    pub task: Option<String>,

    #[serde(default, alias = "inputs")]
    pub input: Option<String>,

    #[serde(default)]
    pub source_lang: Option<String>,

    #[serde(default)]
    pub target_lang: Option<String>,

    #[serde(default)]
    pub context: Option<String>,

    #[serde(default)]
    pub history: Vec<ChatTurn>,

    #[serde(default)]
    pub max_input_chars: Option<usize>,

    #[serde(default)]
    pub max_target_tokens: Option<i64>,

    #[serde(flatten)]
    pub parameters: GenerationParams,

    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Model listing response
#[derive(Debug, Serialize)]
pub struct ListModelsResponse {
    pub models: Vec<ModelRecord>,
    pub count: usize,
}

/// Cache inspection response
#[derive(Debug, Serialize)]
pub struct CacheInfoResponse {
    pub entries: Vec<CacheEntryInfo>,
    pub total_cached: usize,
}

/// Cache clear response
#[derive(Debug, Serialize)]
pub struct CacheClearResponse {
    pub evicted: usize,
}

/// Dependency check response: the capability -> presence map plus details
#[derive(Debug, Serialize)]
pub struct DependencyCheckResponse {
    pub capabilities: BTreeMap<String, bool>,
    pub details: Vec<Capability>,
}
