//! Configuration structures and loading logic

use crate::generation::params::GenerationParams;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Engine and service configuration.
///
/// Supplied to the engine at construction time; nothing reads process-wide
/// state after startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub api_port: u16,

    /// JSON registry document, rewritten atomically on every mutation
    pub registry_file: PathBuf,

    /// Override for the model artifact cache directory.
    /// Defaults to the standard HuggingFace hub cache when unset.
    pub model_cache_dir: Option<PathBuf>,

    /// Serve only models whose artifacts are already cached locally
    pub offline: bool,

    /// Resource ceiling for resident models. Setting this enables
    /// least-recently-used eviction of idle cache entries; unset means no
    /// automatic eviction (manual cache-clear only).
    pub max_resident_bytes: Option<u64>,

    /// Default maximum duration for a single generation, in seconds.
    /// Per-request timeouts override this; unset means no engine-imposed
    /// deadline.
    pub generation_timeout_secs: Option<u64>,

    /// Engine-wide generation defaults, overridable per model and per request
    pub generation_defaults: GenerationParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            registry_file: default_registry_file(),
            model_cache_dir: None,
            offline: false,
            max_resident_bytes: None,
            generation_timeout_secs: None,
            generation_defaults: GenerationParams::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(port) = std::env::var("LMSERVE_API_PORT") {
            config.api_port = port.parse().context("Invalid LMSERVE_API_PORT value")?;
        }
        if let Ok(registry_file) = std::env::var("LMSERVE_REGISTRY_FILE") {
            config.registry_file = PathBuf::from(registry_file);
        }
        if let Ok(cache_dir) = std::env::var("LMSERVE_MODEL_CACHE_DIR") {
            config.model_cache_dir = Some(PathBuf::from(cache_dir));
        }
        if let Ok(offline) = std::env::var("LMSERVE_OFFLINE") {
            config.offline = matches!(offline.as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_port < 1024 {
            anyhow::bail!("API port must be >= 1024 (got {})", self.api_port);
        }

        if let Some(limit) = self.max_resident_bytes
            && limit == 0
        {
            anyhow::bail!("max_resident_bytes must be > 0 when set");
        }

        if let Some(timeout) = self.generation_timeout_secs
            && timeout == 0
        {
            anyhow::bail!("generation_timeout_secs must be > 0 when set");
        }

        // Ensure registry file directory exists or can be created
        if let Some(parent) = self.registry_file.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create registry directory: {:?}", parent))?;
        }

        Ok(())
    }
}

// Default functions
fn default_api_port() -> u16 {
    9200
}
fn default_registry_file() -> PathBuf {
    PathBuf::from("data/models.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.api_port, 9200);
        assert!(!config.offline);
        assert!(config.max_resident_bytes.is_none());
        assert!(config.generation_timeout_secs.is_none());
        assert!(config.generation_defaults.is_empty());
    }

    #[test]
    fn test_port_validation() {
        let config = EngineConfig {
            api_port: 500, // Below 1024
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_resident_limit_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            registry_file: temp_dir.path().join("models.json"),
            max_resident_bytes: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_registry_directory_created() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            registry_file: temp_dir.path().join("nested/dir/models.json"),
            ..Default::default()
        };
        config.validate().unwrap();
        assert!(temp_dir.path().join("nested/dir").exists());
    }

    #[test]
    fn test_toml_parse() {
        let content = r#"
            api_port = 9400
            registry_file = "/tmp/lmserve-test/models.json"
            offline = true
            max_resident_bytes = 8589934592

            [generation_defaults]
            max_new_tokens = 128
            temperature = 0.5
        "#;
        let config: EngineConfig = toml::from_str(content).unwrap();
        assert_eq!(config.api_port, 9400);
        assert!(config.offline);
        assert_eq!(config.max_resident_bytes, Some(8_589_934_592));
        assert_eq!(config.generation_defaults.max_new_tokens, Some(128));
        assert_eq!(config.generation_defaults.temperature, Some(0.5));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        unsafe {
            std::env::set_var("LMSERVE_API_PORT", "9555");
            std::env::set_var("LMSERVE_OFFLINE", "true");
        }

        let config = EngineConfig::load(None).unwrap();
        assert_eq!(config.api_port, 9555);
        assert!(config.offline);

        unsafe {
            std::env::remove_var("LMSERVE_API_PORT");
            std::env::remove_var("LMSERVE_OFFLINE");
        }
    }

    #[test]
    #[serial]
    fn test_invalid_env_port_rejected() {
        unsafe {
            std::env::set_var("LMSERVE_API_PORT", "not-a-port");
        }
        let result = EngineConfig::load(None);
        unsafe {
            std::env::remove_var("LMSERVE_API_PORT");
        }
        assert!(result.is_err());
    }
}
