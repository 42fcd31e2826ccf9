//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record model registration
pub fn record_model_registered(model_id: &str, model_kind: &str) {
    metrics::counter!("lmserve_models_registered_total",
        "model" => model_id.to_string(),
        "kind" => model_kind.to_string()
    )
    .increment(1);
}

/// Record model removal
pub fn record_model_removed(model_id: &str) {
    metrics::counter!("lmserve_models_removed_total",
        "model" => model_id.to_string()
    )
    .increment(1);
}

/// Record a model load attempt
pub fn record_model_load(model_id: &str, success: bool) {
    metrics::counter!("lmserve_model_loads_total",
        "model" => model_id.to_string(),
        "outcome" => if success { "ok" } else { "error" }
    )
    .increment(1);
}

/// Record a generation attempt with its classified outcome
pub fn record_generation(model_id: &str, strategy: &str, outcome: &str) {
    metrics::counter!("lmserve_generations_total",
        "model" => model_id.to_string(),
        "strategy" => strategy.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record the wall-clock duration of a completed generation
pub fn record_generation_duration(model_id: &str, duration_ms: u64) {
    metrics::histogram!("lmserve_generation_duration_ms",
        "model" => model_id.to_string()
    )
    .record(duration_ms as f64);
}

/// Update total registered model count gauge
pub fn update_model_count(count: usize) {
    metrics::gauge!("lmserve_models_count").set(count as f64);
}

/// Update cache occupancy gauges
pub fn update_cache_occupancy(models: usize, bytes: u64) {
    metrics::gauge!("lmserve_cache_models").set(models as f64);
    metrics::gauge!("lmserve_cache_bytes").set(bytes as f64);
}
