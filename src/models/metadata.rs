//! GGUF metadata inspection
//!
//! Reads the header of a GGUF weight file to learn the declared architecture
//! and context window without touching tensor data, and decides whether that
//! architecture can serve a registered model kind.

use crate::error::{EngineError, EngineResult};
use crate::registry::ModelKind;
use anyhow::{Context, Result};
use candle_core::quantized::gguf_file;
use std::path::Path;

/// Header metadata extracted from a GGUF artifact
#[derive(Debug, Clone)]
pub struct GgufMetadata {
    /// Architecture declared by the artifact (e.g. "llama")
    pub architecture: String,
    /// Maximum context window, if declared
    pub context_length: Option<u64>,
    /// Transformer block count, if declared
    pub block_count: Option<u64>,
    pub tensor_count: usize,
}

/// Architectures the quantized candle backend can execute
const SUPPORTED_ARCHITECTURES: [&str; 1] = ["llama"];

/// Kinds a decoder-only llama-family model can serve. Sequence-to-sequence
/// and mask-filling need encoder components these artifacts do not carry.
const DECODER_ONLY_KINDS: [ModelKind; 5] = [
    ModelKind::Causal,
    ModelKind::Conversational,
    ModelKind::Summarization,
    ModelKind::Translation,
    ModelKind::QuestionAnswering,
];

/// Read the GGUF header of a weight file without loading tensor data
pub fn inspect(path: &Path) -> Result<GgufMetadata> {
    let mut file =
        std::fs::File::open(path).with_context(|| format!("Cannot open weight file: {:?}", path))?;
    let content = gguf_file::Content::read(&mut file)
        .with_context(|| format!("Not a readable GGUF file: {:?}", path))?;

    let architecture = match content.metadata.get("general.architecture") {
        Some(gguf_file::Value::String(s)) => s.clone(),
        _ => anyhow::bail!("GGUF metadata is missing general.architecture"),
    };

    let context_length = metadata_u64(&content, &format!("{architecture}.context_length"));
    let block_count = metadata_u64(&content, &format!("{architecture}.block_count"));

    Ok(GgufMetadata {
        architecture,
        context_length,
        block_count,
        tensor_count: content.tensor_infos.len(),
    })
}

fn metadata_u64(content: &gguf_file::Content, key: &str) -> Option<u64> {
    match content.metadata.get(key) {
        Some(gguf_file::Value::U32(n)) => Some(u64::from(*n)),
        Some(gguf_file::Value::U64(n)) => Some(*n),
        Some(gguf_file::Value::I32(n)) if *n >= 0 => Some(*n as u64),
        _ => None,
    }
}

/// Verify that the artifact's architecture can serve the declared kind.
///
/// An architecture the backend cannot execute at all is a load failure; an
/// executable architecture declared as a kind it cannot serve is an
/// incompatibility the caller asked for.
pub fn check_kind(
    model_id: &str,
    model_kind: ModelKind,
    metadata: &GgufMetadata,
) -> EngineResult<()> {
    if !SUPPORTED_ARCHITECTURES.contains(&metadata.architecture.as_str()) {
        return Err(EngineError::LoadFailure {
            model_id: model_id.to_string(),
            reason: format!(
                "architecture '{}' is not executable by the quantized backend",
                metadata.architecture
            ),
        });
    }

    if !DECODER_ONLY_KINDS.contains(&model_kind) {
        return Err(EngineError::IncompatibleKind {
            model_id: model_id.to_string(),
            requested: model_kind.to_string(),
            reason: format!(
                "decoder-only '{}' weights cannot serve {} models",
                metadata.architecture, model_kind
            ),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn push_string(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
        buf.extend_from_slice(s.as_bytes());
    }

    /// Minimal GGUF v2 file: no tensors, architecture plus optional context length
    fn write_test_gguf(path: &Path, architecture: &str, context_length: Option<u32>) {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"GGUF");
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        let kv_count: u64 = 1 + u64::from(context_length.is_some());
        buf.extend_from_slice(&kv_count.to_le_bytes());

        push_string(&mut buf, "general.architecture");
        buf.extend_from_slice(&8u32.to_le_bytes());
        push_string(&mut buf, architecture);

        if let Some(len) = context_length {
            push_string(&mut buf, &format!("{architecture}.context_length"));
            buf.extend_from_slice(&4u32.to_le_bytes());
            buf.extend_from_slice(&len.to_le_bytes());
        }

        std::fs::write(path, buf).unwrap();
    }

    #[test]
    fn test_inspect_reads_architecture_and_context() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.gguf");
        write_test_gguf(&path, "llama", Some(2048));

        let meta = inspect(&path).unwrap();
        assert_eq!(meta.architecture, "llama");
        assert_eq!(meta.context_length, Some(2048));
        assert_eq!(meta.tensor_count, 0);
    }

    #[test]
    fn test_inspect_missing_architecture() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.gguf");
        // Valid header but zero metadata entries
        let mut buf = Vec::new();
        buf.extend_from_slice(b"GGUF");
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        std::fs::write(&path, buf).unwrap();

        let err = inspect(&path).unwrap_err();
        assert!(err.to_string().contains("general.architecture"));
    }

    #[test]
    fn test_inspect_rejects_non_gguf() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.gguf");
        std::fs::write(&path, b"definitely not a gguf file").unwrap();

        assert!(inspect(&path).is_err());
    }

    #[test]
    fn test_check_kind_decoder_only_accepted() {
        let meta = GgufMetadata {
            architecture: "llama".to_string(),
            context_length: Some(4096),
            block_count: None,
            tensor_count: 0,
        };
        for kind in [
            ModelKind::Causal,
            ModelKind::Conversational,
            ModelKind::Summarization,
            ModelKind::Translation,
            ModelKind::QuestionAnswering,
        ] {
            assert!(check_kind("m", kind, &meta).is_ok(), "kind {kind}");
        }
    }

    #[test]
    fn test_check_kind_encoder_kinds_rejected() {
        let meta = GgufMetadata {
            architecture: "llama".to_string(),
            context_length: None,
            block_count: None,
            tensor_count: 0,
        };
        for kind in [ModelKind::Seq2Seq, ModelKind::FillMask] {
            let err = check_kind("m", kind, &meta).unwrap_err();
            assert!(matches!(err, EngineError::IncompatibleKind { .. }), "kind {kind}");
        }
    }

    #[test]
    fn test_check_kind_unsupported_architecture() {
        let meta = GgufMetadata {
            architecture: "bert".to_string(),
            context_length: None,
            block_count: None,
            tensor_count: 0,
        };
        let err = check_kind("m", ModelKind::Causal, &meta).unwrap_err();
        assert!(matches!(err, EngineError::LoadFailure { .. }));
        assert!(err.to_string().contains("bert"));
    }
}
