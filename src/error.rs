//! Engine error taxonomy and HTTP mapping

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the engine facade.
///
/// Variants carry their upstream cause as text so the enum stays `Clone`;
/// concurrent callers joined on a single in-flight load all receive the same
/// classified failure.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("model '{0}' is already registered")]
    DuplicateModel(String),

    #[error("model '{0}' is not registered")]
    NotFound(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("missing required capability '{capability}': {reason}")]
    MissingDependency { capability: String, reason: String },

    #[error("model '{0}' does not resolve to a loadable artifact")]
    ModelNotFound(String),

    #[error("model '{model_id}' cannot serve {requested}: {reason}")]
    IncompatibleKind {
        model_id: String,
        requested: String,
        reason: String,
    },

    #[error("failed to load model '{model_id}': {reason}")]
    LoadFailure { model_id: String, reason: String },

    #[error("generation failed for model '{model_id}': {reason}")]
    GenerationError { model_id: String, reason: String },

    #[error("generation timed out after {elapsed_ms} ms for model '{model_id}'")]
    Timeout { model_id: String, elapsed_ms: u64 },

    #[error("registry storage error: {0}")]
    Storage(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// HTTP status for this error: 400 for validation failures, 404 when the
    /// identifier does not resolve, 500 for resource/backend errors.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DuplicateModel(_) | Self::InvalidParameters(_) | Self::IncompatibleKind { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) | Self::ModelNotFound(_) => StatusCode::NOT_FOUND,
            Self::MissingDependency { .. }
            | Self::LoadFailure { .. }
            | Self::GenerationError { .. }
            | Self::Timeout { .. }
            | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short taxonomy label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::DuplicateModel(_) => "duplicate_model",
            Self::NotFound(_) => "not_found",
            Self::InvalidParameters(_) => "invalid_parameters",
            Self::MissingDependency { .. } => "missing_dependency",
            Self::ModelNotFound(_) => "model_not_found",
            Self::IncompatibleKind { .. } => "incompatible_kind",
            Self::LoadFailure { .. } => "load_failure",
            Self::GenerationError { .. } => "generation_error",
            Self::Timeout { .. } => "timeout",
            Self::Storage(_) => "storage",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, kind = self.label(), "Request failed");
        }

        let body = Json(ErrorResponse {
            success: false,
            error: self.to_string(),
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}
