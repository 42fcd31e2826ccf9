//! lmserve - Local language-model serving engine
//!
//! Registers language-model identifiers, loads them into memory on demand,
//! dispatches text-generation requests against them, and tracks usage. The
//! HTTP layer is a thin adapter over the [`engine::Engine`] facade.

pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod generation;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod state;
pub mod usage;

pub use cache::{CacheEntryInfo, CachedModel, ModelCache};
pub use config::EngineConfig;
pub use engine::{Engine, RegisterModel};
pub use error::{EngineError, EngineResult};
pub use generation::{
    ChatTurn, Dispatcher, EffectiveParams, GenerationOutcome, GenerationParams, GenerationRequest,
    PipelineRequest, PipelineTask,
};
pub use models::{
    Capability, CapabilityReport, GgufLoader, ModelLoader, ModelRuntime, RuntimeFootprint,
};
pub use registry::{ModelKind, ModelPatch, ModelRecord, ModelStatus, RegistryStore};
pub use state::{RegistryPersistence, StorageBackend};
pub use usage::{UsageStatistics, UsageTracker};
