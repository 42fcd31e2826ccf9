//! Task pipelines
//!
//! Pipeline generation wraps a raw continuation call with task-specific
//! pre- and post-processing: input truncation for summarization, language
//! pair handling for translation, context passages for question answering
//! and turn formatting for conversation. Which tasks a model may serve is a
//! closed map over its registered kind.

use crate::error::{EngineError, EngineResult};
use crate::generation::params::GenerationParams;
use crate::registry::ModelKind;
use serde::{Deserialize, Serialize};

/// Character budget applied to summarization input when the request does not
/// set one; long documents are truncated rather than rejected.
pub const DEFAULT_SUMMARY_INPUT_CHARS: usize = 4000;

/// Task-oriented generation strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineTask {
    Summarization,
    Translation,
    QuestionAnswering,
    Conversation,
}

impl PipelineTask {
    pub const ALL: [PipelineTask; 4] = [
        Self::Summarization,
        Self::Translation,
        Self::QuestionAnswering,
        Self::Conversation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summarization => "summarization",
            Self::Translation => "translation",
            Self::QuestionAnswering => "question-answering",
            Self::Conversation => "conversation",
        }
    }

    /// Whether a model of the given kind may serve this task.
    ///
    /// A task accepts models registered for it directly plus the
    /// general-purpose generative kinds that can emulate it through
    /// prompting. Mask-filling models serve no pipeline task.
    pub fn compatible_with(&self, kind: ModelKind) -> bool {
        use ModelKind::*;
        match self {
            Self::Summarization => {
                matches!(kind, Summarization | Seq2Seq | Causal | Conversational)
            }
            Self::Translation => matches!(kind, Translation | Seq2Seq | Causal | Conversational),
            Self::QuestionAnswering => {
                matches!(kind, QuestionAnswering | Seq2Seq | Causal | Conversational)
            }
            Self::Conversation => matches!(kind, Conversational | Causal),
        }
    }

    pub fn incompatibility_reason(&self, kind: ModelKind) -> String {
        match kind {
            ModelKind::FillMask => "mask-filling models have no generation head".to_string(),
            _ => format!("{kind} models cannot serve the {self} task"),
        }
    }
}

impl std::fmt::Display for PipelineTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PipelineTask {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|t| t.as_str()).collect();
                EngineError::InvalidParameters(format!(
                    "unknown task '{s}' (expected one of: {})",
                    known.join(", ")
                ))
            })
    }
}

/// One prior turn of a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// A pipeline generation request.
///
/// Shares the direct request's parameter set and adds task-specific controls:
/// an input truncation budget, the translation language pair, a question
/// answering context passage, conversation history and a target length bound.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub model_id: String,
    pub task: PipelineTask,
    pub input: String,
    pub params: GenerationParams,
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
    pub context: Option<String>,
    pub history: Vec<ChatTurn>,
    pub max_input_chars: Option<usize>,
    /// Caps the generated length for this call, overriding `max_new_tokens`
    pub max_target_tokens: Option<i64>,
    pub timeout_ms: Option<u64>,
}

impl PipelineRequest {
    pub fn new(model_id: impl Into<String>, task: PipelineTask, input: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            task,
            input: input.into(),
            params: GenerationParams::default(),
            source_lang: None,
            target_lang: None,
            context: None,
            history: Vec::new(),
            max_input_chars: None,
            max_target_tokens: None,
            timeout_ms: None,
        }
    }
}

/// Shape the backend prompt for a task
pub(crate) fn build_prompt(request: &PipelineRequest) -> EngineResult<String> {
    match request.task {
        PipelineTask::Summarization => {
            let budget = request
                .max_input_chars
                .unwrap_or(DEFAULT_SUMMARY_INPUT_CHARS);
            let input = truncate_chars(&request.input, budget);
            Ok(format!(
                "Summarize the following text concisely.\n\n{input}\n\nSummary:"
            ))
        }
        PipelineTask::Translation => {
            let target = request
                .target_lang
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    EngineError::InvalidParameters(
                        "target_lang is required for the translation task".to_string(),
                    )
                })?;
            let input = budgeted_input(request);
            Ok(match request.source_lang.as_deref().map(str::trim) {
                Some(source) if !source.is_empty() => format!(
                    "Translate the following text from {source} to {target}.\n\n{input}\n\nTranslation:"
                ),
                _ => format!(
                    "Translate the following text to {target}.\n\n{input}\n\nTranslation:"
                ),
            })
        }
        PipelineTask::QuestionAnswering => {
            let question = budgeted_input(request);
            Ok(match request.context.as_deref().map(str::trim) {
                Some(context) if !context.is_empty() => format!(
                    "Answer the question using only the provided context.\n\n\
                     Context:\n{context}\n\nQuestion: {question}\nAnswer:"
                ),
                _ => format!("Answer the following question.\n\nQuestion: {question}\nAnswer:"),
            })
        }
        PipelineTask::Conversation => {
            let mut prompt = String::new();
            for turn in &request.history {
                prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
            }
            prompt.push_str(&format!("User: {}\nAssistant:", budgeted_input(request)));
            Ok(prompt)
        }
    }
}

/// Strip task scaffolding the model may have echoed back
pub(crate) fn post_process(task: PipelineTask, text: &str) -> String {
    let trimmed = text.trim();
    let stripped = match task {
        PipelineTask::Summarization => trimmed.strip_prefix("Summary:"),
        PipelineTask::Translation => trimmed.strip_prefix("Translation:"),
        PipelineTask::QuestionAnswering => trimmed.strip_prefix("Answer:"),
        PipelineTask::Conversation => None,
    };
    stripped.unwrap_or(trimmed).trim().to_string()
}

fn budgeted_input(request: &PipelineRequest) -> &str {
    match request.max_input_chars {
        Some(limit) => truncate_chars(&request.input, limit),
        None => &request.input,
    }
}

/// Cut at a char boundary so multi-byte input never panics
fn truncate_chars(s: &str, limit: usize) -> &str {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
