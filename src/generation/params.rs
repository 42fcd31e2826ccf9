//! Generation parameter sets: per-request overrides, per-model defaults and
//! the resolved effective values handed to the backend.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Built-in fallbacks applied when neither the request, the model record nor
/// the engine configuration specifies a value.
pub const DEFAULT_MAX_NEW_TOKENS: u32 = 100;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TOP_P: f64 = 0.9;
pub const DEFAULT_TOP_K: u32 = 50;
pub const DEFAULT_REPETITION_PENALTY: f64 = 1.1;

/// Fixed seed used when sampling is enabled and the caller did not supply
/// one, so identical requests reproduce on the same build and hardware.
pub const DEFAULT_SEED: u64 = 299_792_458;

/// Partial parameter set. Used both as per-model defaults stored on a
/// registry record and as per-request overrides; unset fields fall through
/// to the next layer (request > model defaults > engine defaults).
///
/// Signed integer fields are validated (not just deserialized) so that
/// out-of-range values like `max_new_tokens = -1` produce a classified
/// `InvalidParameters` error instead of a generic decode failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f64>,

    /// Sequences that terminate generation when they appear in the output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl GenerationParams {
    /// Layer `self` over `base`: fields set on `self` win.
    pub fn merge_over(&self, base: &GenerationParams) -> GenerationParams {
        GenerationParams {
            max_new_tokens: self.max_new_tokens.or(base.max_new_tokens),
            temperature: self.temperature.or(base.temperature),
            top_p: self.top_p.or(base.top_p),
            top_k: self.top_k.or(base.top_k),
            repetition_penalty: self.repetition_penalty.or(base.repetition_penalty),
            stop: self.stop.clone().or_else(|| base.stop.clone()),
            seed: self.seed.or(base.seed),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == GenerationParams::default()
    }
}

/// Fully resolved parameter set actually used for a generation. Returned in
/// the response for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveParams {
    pub max_new_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub repetition_penalty: f64,
    pub stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for EffectiveParams {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            top_k: DEFAULT_TOP_K,
            repetition_penalty: DEFAULT_REPETITION_PENALTY,
            stop: Vec::new(),
            seed: None,
        }
    }
}

impl EffectiveParams {
    /// Resolve the effective parameters for a request: request fields win
    /// over the model record's defaults, which win over the engine-wide
    /// defaults, which win over the built-in fallbacks. The merged result is
    /// range-checked before any model access.
    pub fn resolve(
        request: &GenerationParams,
        model_defaults: &GenerationParams,
        engine_defaults: &GenerationParams,
    ) -> EngineResult<EffectiveParams> {
        let merged = request
            .merge_over(model_defaults)
            .merge_over(engine_defaults);

        let max_new_tokens = match merged.max_new_tokens {
            None => DEFAULT_MAX_NEW_TOKENS,
            Some(n) if n >= 1 => n as u32,
            Some(n) => {
                return Err(EngineError::InvalidParameters(format!(
                    "max_new_tokens must be >= 1 (got {n})"
                )));
            }
        };

        let temperature = merged.temperature.unwrap_or(DEFAULT_TEMPERATURE);
        if !(temperature >= 0.0) {
            return Err(EngineError::InvalidParameters(format!(
                "temperature must be >= 0 (got {temperature})"
            )));
        }

        let top_p = merged.top_p.unwrap_or(DEFAULT_TOP_P);
        if !(top_p > 0.0 && top_p <= 1.0) {
            return Err(EngineError::InvalidParameters(format!(
                "top_p must be in (0, 1] (got {top_p})"
            )));
        }

        let top_k = match merged.top_k {
            None => DEFAULT_TOP_K,
            Some(k) if k >= 0 => k as u32,
            Some(k) => {
                return Err(EngineError::InvalidParameters(format!(
                    "top_k must be >= 0 (got {k})"
                )));
            }
        };

        let repetition_penalty = merged
            .repetition_penalty
            .unwrap_or(DEFAULT_REPETITION_PENALTY);
        if !(repetition_penalty >= 0.0) {
            return Err(EngineError::InvalidParameters(format!(
                "repetition_penalty must be >= 0 (got {repetition_penalty})"
            )));
        }

        Ok(EffectiveParams {
            max_new_tokens,
            temperature,
            top_p,
            top_k,
            repetition_penalty,
            stop: merged.stop.unwrap_or_default(),
            seed: merged.seed,
        })
    }

    /// Greedy decoding requested (deterministic on a fixed backend).
    pub fn is_greedy(&self) -> bool {
        self.temperature <= 0.0
    }
}
