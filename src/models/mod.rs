//! Model loading
//!
//! Turns a registered model identifier into a generation-ready runtime:
//! - capability checks before any I/O
//! - artifact resolution from local paths or the HuggingFace Hub
//! - GGUF metadata inspection and kind compatibility
//! - quantized candle runtime construction

pub mod gguf;
pub mod hub;
pub mod loader;
pub mod metadata;

pub use gguf::GgufRuntime;
pub use hub::{ModelArtifacts, cache_dir, resolve_artifacts};
pub use loader::{
    CAP_CUDA, CAP_GGUF_BACKEND, CAP_HUB_API, CAP_MODEL_CACHE, CAP_TOKENIZERS, Capability,
    CapabilityReport, GgufLoader, ModelLoader, ModelRuntime, RuntimeFootprint,
};
pub use metadata::{GgufMetadata, inspect};
