#![allow(dead_code)]

//! Shared test doubles: an in-memory loader and runtime standing in for the
//! GGUF backend, plus engine construction helpers.

use async_trait::async_trait;
use lmserve::{
    Capability, CapabilityReport, EffectiveParams, Engine, EngineConfig, EngineError,
    EngineResult, GenerationParams, ModelKind, ModelLoader, ModelRuntime, RegisterModel,
    RuntimeFootprint,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const STUB_BACKEND: &str = "stub-backend";

/// Deterministic in-memory runtime. Tracks concurrency so tests can assert
/// per-model serialization.
pub struct StubRuntime {
    pub bytes: u64,
    pub delay: Option<Duration>,
    pub fail_with: Option<String>,
    pub concurrent_safe: bool,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl StubRuntime {
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelRuntime for StubRuntime {
    async fn generate(&self, prompt: &str, params: &EffectiveParams) -> Result<String, String> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(reason) = &self.fail_with {
            return Err(reason.clone());
        }

        // Output is a deterministic function of (prompt, params)
        Ok(format!(
            "{prompt} continued for {} tokens at temperature {}",
            params.max_new_tokens, params.temperature
        ))
    }

    fn concurrent_safe(&self) -> bool {
        self.concurrent_safe
    }

    fn footprint(&self) -> RuntimeFootprint {
        RuntimeFootprint {
            approx_bytes: self.bytes,
            device: "cpu".to_string(),
        }
    }
}

/// Scriptable loader. Counts invocations, can fail per model id, can report
/// its required backend capability as absent.
pub struct StubLoader {
    pub loads: AtomicUsize,
    pub load_delay: Option<Duration>,
    pub backend_available: AtomicBool,
    pub fail: Mutex<HashMap<String, EngineError>>,
    pub runtime_bytes: u64,
    pub runtime_delay: Option<Duration>,
    pub runtime_fail: Option<String>,
    pub concurrent_safe: bool,
    pub runtimes: Mutex<Vec<Arc<StubRuntime>>>,
}

impl Default for StubLoader {
    fn default() -> Self {
        Self {
            loads: AtomicUsize::new(0),
            load_delay: None,
            backend_available: AtomicBool::new(true),
            fail: Mutex::new(HashMap::new()),
            runtime_bytes: 1_000_000,
            runtime_delay: None,
            runtime_fail: None,
            concurrent_safe: false,
            runtimes: Mutex::new(Vec::new()),
        }
    }
}

impl StubLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn fail_model(&self, model_id: &str, error: EngineError) {
        self.fail
            .lock()
            .unwrap()
            .insert(model_id.to_string(), error);
    }

    pub fn clear_failures(&self) {
        self.fail.lock().unwrap().clear();
    }

    /// Handle to the most recently created runtime
    pub fn last_runtime(&self) -> Arc<StubRuntime> {
        self.runtimes.lock().unwrap().last().unwrap().clone()
    }
}

#[async_trait]
impl ModelLoader for StubLoader {
    async fn check_capabilities(&self) -> CapabilityReport {
        let present = self.backend_available.load(Ordering::SeqCst);
        CapabilityReport {
            capabilities: vec![
                Capability {
                    name: STUB_BACKEND.to_string(),
                    present,
                    required: true,
                    detail: if present {
                        "in-memory stub backend".to_string()
                    } else {
                        "stub backend disabled for this test".to_string()
                    },
                },
                Capability {
                    name: "hub-api".to_string(),
                    present: true,
                    required: false,
                    detail: "stub hub".to_string(),
                },
            ],
        }
    }

    async fn load(
        &self,
        model_id: &str,
        _model_kind: ModelKind,
    ) -> EngineResult<Arc<dyn ModelRuntime>> {
        if !self.backend_available.load(Ordering::SeqCst) {
            return Err(EngineError::MissingDependency {
                capability: STUB_BACKEND.to_string(),
                reason: "stub backend disabled for this test".to_string(),
            });
        }

        self.loads.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.fail.lock().unwrap().get(model_id) {
            return Err(error.clone());
        }

        let runtime = Arc::new(StubRuntime {
            bytes: self.runtime_bytes,
            delay: self.runtime_delay,
            fail_with: self.runtime_fail.clone(),
            concurrent_safe: self.concurrent_safe,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        self.runtimes.lock().unwrap().push(runtime.clone());
        Ok(runtime)
    }
}

/// Engine over a temp-dir registry and the given stub loader
pub async fn test_engine(dir: &TempDir, loader: Arc<StubLoader>) -> Engine {
    test_engine_with(dir, loader, |_| {}).await
}

pub async fn test_engine_with(
    dir: &TempDir,
    loader: Arc<StubLoader>,
    tweak: impl FnOnce(&mut EngineConfig),
) -> Engine {
    let mut config = EngineConfig {
        registry_file: dir.path().join("models.json"),
        ..Default::default()
    };
    tweak(&mut config);
    Engine::with_loader(config, loader).await.unwrap()
}

pub fn register_spec(model_id: &str, kind: ModelKind) -> RegisterModel {
    RegisterModel {
        model_id: model_id.to_string(),
        display_name: None,
        description: None,
        model_kind: kind,
        parameters: GenerationParams::default(),
    }
}
