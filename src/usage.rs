//! Usage tracking and aggregation
//!
//! Records successful generations against the registry and aggregates the
//! numbers behind the usage-statistics operation. A statistics write that
//! fails must never invalidate the generation it was bookkeeping for, so
//! storage errors on this path are logged and dropped.

use crate::registry::RegistryStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Aggregate usage numbers across all registered models
#[derive(Debug, Clone, Serialize)]
pub struct UsageStatistics {
    pub total_models: usize,
    pub total_usage: u64,
    /// Registered model count per kind
    pub model_kinds: BTreeMap<String, usize>,
    pub most_used: Option<MostUsedModel>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MostUsedModel {
    pub model_id: String,
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
}

pub struct UsageTracker {
    registry: Arc<RegistryStore>,
}

impl UsageTracker {
    pub fn new(registry: Arc<RegistryStore>) -> Self {
        Self { registry }
    }

    /// Record one successful generation: increments the usage counter and
    /// advances the last-used timestamp. Never fails the parent request; a
    /// storage error here is logged and dropped (the in-memory counters have
    /// already advanced, preserving monotonicity).
    pub async fn record_use(&self, model_id: &str) {
        let timestamp = Utc::now();
        match self.registry.record_use(model_id, timestamp).await {
            Ok(record) => {
                tracing::debug!(
                    model_id = %model_id,
                    usage_count = record.usage_count,
                    "Usage recorded"
                );
            }
            Err(e) => {
                tracing::warn!(
                    model_id = %model_id,
                    error = %e,
                    "Failed to update usage statistics"
                );
            }
        }
    }

    /// Aggregate across all records: totals, per-kind counts and the
    /// most-used model.
    pub async fn statistics(&self) -> UsageStatistics {
        let records = self.registry.list().await;

        let total_usage = records.iter().map(|r| r.usage_count).sum();

        let mut model_kinds: BTreeMap<String, usize> = BTreeMap::new();
        for record in &records {
            *model_kinds
                .entry(record.model_kind.as_str().to_string())
                .or_insert(0) += 1;
        }

        let most_used = records
            .iter()
            .max_by_key(|r| r.usage_count)
            .map(|r| MostUsedModel {
                model_id: r.model_id.clone(),
                usage_count: r.usage_count,
                last_used_at: r.last_used_at,
            });

        UsageStatistics {
            total_models: records.len(),
            total_usage,
            model_kinds,
            most_used,
        }
    }
}
