//! API route definitions

use crate::engine::Engine;
use axum::{
    Router,
    routing::{delete, get, patch, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health and observability
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // Model registry
        .route("/models", get(handlers::list_models))
        .route("/models", post(handlers::register_model))
        .route("/models/{model_id}", get(handlers::get_model))
        .route("/models/{model_id}", patch(handlers::update_model))
        .route("/models/{model_id}", delete(handlers::remove_model))
        .route("/models/{model_id}/load", post(handlers::load_model))
        // Generation
        .route("/generate", post(handlers::generate))
        .route("/pipeline", post(handlers::pipeline_generate))
        // Cache and statistics
        .route("/cache", get(handlers::cache_info))
        .route("/cache", delete(handlers::cache_clear))
        .route("/stats", get(handlers::usage_statistics))
        .route("/dependencies", get(handlers::dependency_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
