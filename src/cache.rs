//! In-memory model cache
//!
//! Maps model identifiers to loaded runtimes. Concurrent callers for the same
//! uncached id collapse into a single in-flight load (single-flight): the
//! first caller puts a loading marker in the slot and spawns the load, late
//! arrivals subscribe to the marker's channel and share the result. Failed
//! loads are never cached, so the next caller retries.
//!
//! Loads run on detached tasks, so a caller abandoning the operation (timeout
//! or drop) never orphans other waiters and never leaves a half-inserted
//! entry. An epoch token per loading slot keeps a completing load from
//! resurrecting an entry that was evicted or cleared mid-flight.

use crate::error::{EngineError, EngineResult};
use crate::models::{ModelLoader, ModelRuntime, RuntimeFootprint};
use crate::registry::ModelKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, broadcast};

/// A loaded, generation-ready model owned by the cache.
///
/// The runtime object never escapes: callers run generations through
/// [`CachedModel::generate`] and receive text, not the backend handle.
#[derive(Debug)]
pub struct CachedModel {
    model_id: String,
    runtime: Arc<dyn ModelRuntime>,
    loaded_at: DateTime<Utc>,
    footprint: RuntimeFootprint,
    /// Serializes generations unless the runtime declares itself reentrant
    generation_lock: Mutex<()>,
    in_flight: AtomicUsize,
    /// Millisecond timestamp of the most recent activity, for LRU eviction
    last_activity_ms: AtomicI64,
}

impl CachedModel {
    fn new(model_id: String, runtime: Arc<dyn ModelRuntime>) -> Self {
        let footprint = runtime.footprint();
        let now = Utc::now();
        Self {
            model_id,
            runtime,
            loaded_at: now,
            footprint,
            generation_lock: Mutex::new(()),
            in_flight: AtomicUsize::new(0),
            last_activity_ms: AtomicI64::new(now.timestamp_millis()),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn footprint(&self) -> &RuntimeFootprint {
        &self.footprint
    }

    /// No generation is currently running against this entry
    pub fn idle(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) == 0
    }

    fn touch(&self) {
        self.last_activity_ms
            .fetch_max(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    fn last_activity_ms(&self) -> i64 {
        self.last_activity_ms.load(Ordering::SeqCst)
    }

    /// Run one generation against the owned runtime.
    ///
    /// Generations are serialized per model unless the runtime declares
    /// concurrent calls safe. The in-flight marker is guard-based, so a
    /// caller dropping this future (timeout) releases it immediately.
    pub async fn generate(
        &self,
        prompt: &str,
        params: &crate::generation::params::EffectiveParams,
    ) -> Result<String, String> {
        let _flight = FlightGuard::enter(self);
        if self.runtime.concurrent_safe() {
            self.runtime.generate(prompt, params).await
        } else {
            let _serial = self.generation_lock.lock().await;
            self.runtime.generate(prompt, params).await
        }
    }
}

/// Marks an entry busy for the lifetime of one generation
struct FlightGuard<'a> {
    entry: &'a CachedModel,
}

impl<'a> FlightGuard<'a> {
    fn enter(entry: &'a CachedModel) -> Self {
        entry.in_flight.fetch_add(1, Ordering::SeqCst);
        entry.touch();
        Self { entry }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.entry.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.entry.touch();
    }
}

/// What `info()` reports for one resident entry
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryInfo {
    pub model_id: String,
    pub loaded_at: DateTime<Utc>,
    pub approx_bytes: u64,
    pub device: String,
    pub in_flight: usize,
}

enum Slot {
    Ready(Arc<CachedModel>),
    Loading {
        epoch: u64,
        notify: broadcast::Sender<EngineResult<Arc<CachedModel>>>,
    },
}

/// Bounded-lifetime cache of loaded models with single-flight loading and an
/// optional footprint-bound LRU eviction policy.
pub struct ModelCache {
    slots: Mutex<HashMap<String, Slot>>,
    /// Resource ceiling in bytes; `None` disables automatic eviction
    max_resident_bytes: Option<u64>,
    epoch: AtomicU64,
}

impl ModelCache {
    pub fn new(max_resident_bytes: Option<u64>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            max_resident_bytes,
            epoch: AtomicU64::new(0),
        }
    }

    /// Return the cached runtime handle, loading it on a miss.
    ///
    /// A hit returns immediately with no I/O. On a miss the loader is
    /// invoked exactly once per id regardless of how many callers arrive
    /// concurrently; they all block on the one load and share its result.
    pub async fn get_or_load(
        self: &Arc<Self>,
        model_id: &str,
        model_kind: ModelKind,
        loader: Arc<dyn ModelLoader>,
    ) -> EngineResult<Arc<CachedModel>> {
        let mut rx = {
            let mut slots = self.slots.lock().await;
            match slots.get(model_id) {
                Some(Slot::Ready(model)) => {
                    model.touch();
                    return Ok(model.clone());
                }
                Some(Slot::Loading { notify, .. }) => notify.subscribe(),
                None => {
                    let (tx, rx) = broadcast::channel(1);
                    let epoch = self.epoch.fetch_add(1, Ordering::Relaxed);
                    slots.insert(
                        model_id.to_string(),
                        Slot::Loading {
                            epoch,
                            notify: tx.clone(),
                        },
                    );
                    self.spawn_load(model_id.to_string(), model_kind, loader, epoch, tx);
                    rx
                }
            }
        };

        match rx.recv().await {
            Ok(result) => result,
            // The load task always publishes before finishing; a closed
            // channel means it was torn down without a result.
            Err(_) => Err(EngineError::LoadFailure {
                model_id: model_id.to_string(),
                reason: "load task terminated without a result".to_string(),
            }),
        }
    }

    fn spawn_load(
        self: &Arc<Self>,
        model_id: String,
        model_kind: ModelKind,
        loader: Arc<dyn ModelLoader>,
        epoch: u64,
        tx: broadcast::Sender<EngineResult<Arc<CachedModel>>>,
    ) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let result = loader
                .load(&model_id, model_kind)
                .await
                .map(|runtime| Arc::new(CachedModel::new(model_id.clone(), runtime)));

            let mut slots = cache.slots.lock().await;
            let still_current = matches!(
                slots.get(&model_id),
                Some(Slot::Loading { epoch: e, .. }) if *e == epoch
            );

            match &result {
                Ok(model) if still_current => {
                    cache.enforce_budget(&mut slots, model.footprint.approx_bytes);
                    slots.insert(model_id.clone(), Slot::Ready(model.clone()));
                    tracing::info!(
                        model_id = %model_id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        approx_bytes = model.footprint.approx_bytes,
                        "Model loaded into cache"
                    );
                }
                Ok(_) => {
                    // Evicted or cleared while loading; waiters still get the
                    // handle, but the entry is not resurrected.
                    tracing::debug!(
                        model_id = %model_id,
                        "Completed load discarded: entry evicted mid-flight"
                    );
                }
                Err(e) if still_current => {
                    slots.remove(&model_id);
                    tracing::warn!(model_id = %model_id, error = %e, "Model load failed");
                }
                Err(_) => {}
            }
            drop(slots);

            // Slot state is settled before waiters observe the result
            let _ = tx.send(result);
        });
    }

    /// Evict idle least-recently-used entries until the incoming load fits
    /// under the configured ceiling. Entries with in-flight generations are
    /// never evicted; if every entry is busy the ceiling may be temporarily
    /// exceeded.
    fn enforce_budget(&self, slots: &mut HashMap<String, Slot>, incoming_bytes: u64) {
        let Some(ceiling) = self.max_resident_bytes else {
            return;
        };

        loop {
            let resident: u64 = slots
                .values()
                .filter_map(|slot| match slot {
                    Slot::Ready(m) => Some(m.footprint.approx_bytes),
                    Slot::Loading { .. } => None,
                })
                .sum();
            if resident + incoming_bytes <= ceiling {
                return;
            }

            let victim = slots
                .iter()
                .filter_map(|(id, slot)| match slot {
                    Slot::Ready(m) if m.idle() => Some((id.clone(), m.last_activity_ms())),
                    _ => None,
                })
                .min_by_key(|(_, at)| *at)
                .map(|(id, _)| id);

            match victim {
                Some(id) => {
                    slots.remove(&id);
                    tracing::info!(
                        model_id = %id,
                        ceiling_bytes = ceiling,
                        "Evicted least-recently-used idle model to honor resource ceiling"
                    );
                }
                None => {
                    tracing::warn!(
                        ceiling_bytes = ceiling,
                        incoming_bytes,
                        "Resource ceiling exceeded but every resident model is busy; not evicting"
                    );
                    return;
                }
            }
        }
    }

    /// Peek at a resident entry without triggering a load
    pub async fn get(&self, model_id: &str) -> Option<Arc<CachedModel>> {
        let slots = self.slots.lock().await;
        match slots.get(model_id) {
            Some(Slot::Ready(model)) => Some(model.clone()),
            _ => None,
        }
    }

    pub async fn contains(&self, model_id: &str) -> bool {
        self.get(model_id).await.is_some()
    }

    /// Remove an entry and release its resources. Returns whether anything
    /// was removed. Removing a loading slot abandons the in-flight load:
    /// its waiters still receive the handle, but it is not cached.
    pub async fn evict(&self, model_id: &str) -> bool {
        let mut slots = self.slots.lock().await;
        match slots.remove(model_id) {
            Some(Slot::Ready(_)) => {
                tracing::info!(model_id = %model_id, "Evicted model from cache");
                true
            }
            Some(Slot::Loading { .. }) => {
                tracing::info!(model_id = %model_id, "Dropped in-flight load from cache");
                true
            }
            None => false,
        }
    }

    /// Evict everything. Idempotent: a second call is a no-op.
    pub async fn clear(&self) -> usize {
        let mut slots = self.slots.lock().await;
        let evicted = slots.len();
        slots.clear();
        if evicted > 0 {
            tracing::info!(evicted, "Cleared model cache");
        }
        evicted
    }

    /// Describe each resident entry without triggering any load
    pub async fn info(&self) -> Vec<CacheEntryInfo> {
        let slots = self.slots.lock().await;
        let mut entries: Vec<CacheEntryInfo> = slots
            .values()
            .filter_map(|slot| match slot {
                Slot::Ready(m) => Some(CacheEntryInfo {
                    model_id: m.model_id.clone(),
                    loaded_at: m.loaded_at,
                    approx_bytes: m.footprint.approx_bytes,
                    device: m.footprint.device.clone(),
                    in_flight: m.in_flight.load(Ordering::SeqCst),
                }),
                Slot::Loading { .. } => None,
            })
            .collect();
        entries.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        entries
    }

    pub async fn len(&self) -> usize {
        let slots = self.slots.lock().await;
        slots
            .values()
            .filter(|s| matches!(s, Slot::Ready(_)))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Total approximate bytes of resident entries
    pub async fn resident_bytes(&self) -> u64 {
        let slots = self.slots.lock().await;
        slots
            .values()
            .filter_map(|slot| match slot {
                Slot::Ready(m) => Some(m.footprint.approx_bytes),
                Slot::Loading { .. } => None,
            })
            .sum()
    }
}
