//! Quantized llama-family runtime on candle
//!
//! Wraps `candle_transformers::models::quantized_llama` weights and a
//! `tokenizers` tokenizer into a [`ModelRuntime`]. Inference is blocking and
//! runs on the blocking thread pool.

use crate::error::{EngineError, EngineResult};
use crate::generation::params::{DEFAULT_SEED, EffectiveParams};
use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::quantized_llama::ModelWeights;
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;

use super::hub::ModelArtifacts;
use super::loader::{ModelRuntime, RuntimeFootprint};
use super::metadata::GgufMetadata;

/// Fallback context window when the artifact does not declare one
const DEFAULT_CONTEXT_LENGTH: usize = 4096;

/// Window of recent tokens the repetition penalty looks at
const REPEAT_LAST_N: usize = 64;

/// Tokens that end generation when the model emits them
const EOS_TOKENS: [&str; 5] = [
    "</s>",
    "<|endoftext|>",
    "<|im_end|>",
    "<|eot_id|>",
    "<end_of_turn>",
];

struct Backend {
    weights: ModelWeights,
    device: Device,
}

/// A loaded GGUF model.
///
/// The weights mutate their key-value cache across forward calls, so the
/// backend stays behind its own lock even though the cache already serializes
/// generations per model. An abandoned generation keeps that lock until its
/// blocking task finishes, so a successor can never interleave with it.
pub struct GgufRuntime {
    model_id: String,
    backend: Arc<Mutex<Backend>>,
    tokenizer: Arc<Tokenizer>,
    eos_ids: Vec<u32>,
    context_length: usize,
    footprint: RuntimeFootprint,
}

impl GgufRuntime {
    /// Build the runtime from resolved artifacts. Heavy work runs on the
    /// blocking pool; failures are reported as `LoadFailure` with the
    /// upstream cause.
    pub async fn load(
        model_id: &str,
        artifacts: &ModelArtifacts,
        metadata: &GgufMetadata,
    ) -> EngineResult<Self> {
        let weights_path = artifacts.weights.clone();
        let tokenizer_path = artifacts.tokenizer.clone();
        let approx_bytes = std::fs::metadata(&weights_path).map(|m| m.len()).unwrap_or(0);
        let context_length = metadata
            .context_length
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_CONTEXT_LENGTH);
        let id = model_id.to_string();

        let (backend, tokenizer) =
            tokio::task::spawn_blocking(move || -> Result<(Backend, Tokenizer), String> {
                let device = if candle_core::utils::cuda_is_available() {
                    Device::new_cuda(0)
                        .map_err(|e| format!("failed to initialise CUDA device: {e}"))?
                } else {
                    Device::Cpu
                };

                let mut file = std::fs::File::open(&weights_path)
                    .map_err(|e| format!("cannot open weight file {weights_path:?}: {e}"))?;
                let content = gguf_file::Content::read(&mut file)
                    .map_err(|e| format!("cannot read GGUF content: {e}"))?;
                let weights = ModelWeights::from_gguf(content, &mut file, &device)
                    .map_err(|e| format!("cannot build model weights: {e}"))?;

                let tokenizer = Tokenizer::from_file(&tokenizer_path)
                    .map_err(|e| format!("cannot load tokenizer: {e}"))?;

                Ok((Backend { weights, device }, tokenizer))
            })
            .await
            .map_err(|e| EngineError::LoadFailure {
                model_id: id.clone(),
                reason: format!("load task panicked: {e}"),
            })?
            .map_err(|reason| EngineError::LoadFailure {
                model_id: id.clone(),
                reason,
            })?;

        let device_label = match &backend.device {
            Device::Cpu => "cpu".to_string(),
            _ => "cuda:0".to_string(),
        };
        let eos_ids = eos_token_ids(&tokenizer);

        tracing::info!(
            model_id = %id,
            device = %device_label,
            context_length,
            approx_bytes,
            "GGUF runtime ready"
        );

        Ok(Self {
            model_id: id,
            backend: Arc::new(Mutex::new(backend)),
            tokenizer: Arc::new(tokenizer),
            eos_ids,
            context_length,
            footprint: RuntimeFootprint {
                approx_bytes,
                device: device_label,
            },
        })
    }
}

fn eos_token_ids(tokenizer: &Tokenizer) -> Vec<u32> {
    EOS_TOKENS
        .iter()
        .filter_map(|t| tokenizer.token_to_id(t))
        .collect()
}

/// Map resolved parameters onto a candle sampling strategy. Temperature zero
/// selects greedy argmax decoding, which is deterministic on a fixed backend.
fn sampling_for(params: &EffectiveParams) -> Sampling {
    if params.is_greedy() {
        return Sampling::ArgMax;
    }
    let temperature = params.temperature;
    match (params.top_k, params.top_p) {
        (0, p) if p >= 1.0 => Sampling::All { temperature },
        (0, p) => Sampling::TopP { p, temperature },
        (k, p) if p >= 1.0 => Sampling::TopK {
            k: k as usize,
            temperature,
        },
        (k, p) => Sampling::TopKThenTopP {
            k: k as usize,
            p,
            temperature,
        },
    }
}

/// Keep the tail of an over-long prompt, leaving room for new tokens
fn clamp_prompt(tokens: Vec<u32>, context_length: usize, max_new_tokens: usize) -> Vec<u32> {
    let budget = context_length.saturating_sub(max_new_tokens).max(1);
    if tokens.len() <= budget {
        tokens
    } else {
        tokens[tokens.len() - budget..].to_vec()
    }
}

/// Cut text at the earliest stop sequence. Returns the possibly shortened
/// text and whether a stop sequence was hit.
fn apply_stop_sequences(text: &str, stops: &[String]) -> (String, bool) {
    let mut cut: Option<usize> = None;
    for stop in stops {
        if stop.is_empty() {
            continue;
        }
        if let Some(pos) = text.find(stop.as_str()) {
            cut = Some(cut.map_or(pos, |c| c.min(pos)));
        }
    }
    match cut {
        Some(pos) => (text[..pos].to_string(), true),
        None => (text.to_string(), false),
    }
}

#[async_trait]
impl ModelRuntime for GgufRuntime {
    async fn generate(&self, prompt: &str, params: &EffectiveParams) -> Result<String, String> {
        let backend = self.backend.clone();
        let tokenizer = self.tokenizer.clone();
        let eos_ids = self.eos_ids.clone();
        let context_length = self.context_length;
        let params = params.clone();
        let prompt = prompt.to_string();
        let model_id = self.model_id.clone();

        tokio::task::spawn_blocking(move || -> Result<String, String> {
            let mut backend = backend
                .lock()
                .map_err(|_| "backend lock poisoned by an earlier panic".to_string())?;
            let Backend { weights, device } = &mut *backend;

            let encoding = tokenizer
                .encode(prompt.as_str(), true)
                .map_err(|e| format!("tokenization failed: {e}"))?;
            let prompt_tokens = clamp_prompt(
                encoding.get_ids().to_vec(),
                context_length,
                params.max_new_tokens as usize,
            );

            let seed = params.seed.unwrap_or(DEFAULT_SEED);
            let mut processor = LogitsProcessor::from_sampling(seed, sampling_for(&params));

            // Prompt pass, then one token at a time against the KV cache
            let input = Tensor::new(prompt_tokens.as_slice(), device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(|e| format!("cannot build input tensor: {e}"))?;
            let logits = weights
                .forward(&input, 0)
                .and_then(|l| l.squeeze(0))
                .map_err(|e| format!("forward pass failed: {e}"))?;
            let mut next = processor
                .sample(&logits)
                .map_err(|e| format!("sampling failed: {e}"))?;

            let mut index_pos = prompt_tokens.len();
            let mut generated: Vec<u32> = Vec::new();
            let mut text = String::new();

            for step in 0..params.max_new_tokens as usize {
                if eos_ids.contains(&next) {
                    break;
                }
                generated.push(next);

                text = tokenizer
                    .decode(&generated, true)
                    .map_err(|e| format!("decoding failed: {e}"))?;
                let (clipped, stopped) = apply_stop_sequences(&text, &params.stop);
                if stopped {
                    text = clipped;
                    break;
                }

                if step + 1 == params.max_new_tokens as usize {
                    break;
                }

                let input = Tensor::new(&[next], device)
                    .and_then(|t| t.unsqueeze(0))
                    .map_err(|e| format!("cannot build input tensor: {e}"))?;
                let logits = weights
                    .forward(&input, index_pos)
                    .and_then(|l| l.squeeze(0))
                    .map_err(|e| format!("forward pass failed: {e}"))?;
                index_pos += 1;

                let logits = if params.repetition_penalty == 1.0 {
                    logits
                } else {
                    let start = generated.len().saturating_sub(REPEAT_LAST_N);
                    candle_transformers::utils::apply_repeat_penalty(
                        &logits,
                        params.repetition_penalty as f32,
                        &generated[start..],
                    )
                    .map_err(|e| format!("repetition penalty failed: {e}"))?
                };

                next = processor
                    .sample(&logits)
                    .map_err(|e| format!("sampling failed: {e}"))?;
            }

            tracing::debug!(
                model_id = %model_id,
                prompt_tokens = prompt_tokens.len(),
                generated_tokens = generated.len(),
                "Generation finished"
            );

            Ok(text.trim_start().to_string())
        })
        .await
        .map_err(|e| format!("generation task panicked: {e}"))?
    }

    fn concurrent_safe(&self) -> bool {
        // The weights carry a mutable key-value cache
        false
    }

    fn footprint(&self) -> RuntimeFootprint {
        self.footprint.clone()
    }
}
