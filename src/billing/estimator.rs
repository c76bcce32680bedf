//! Prompt token estimation
//!
//! The reservation amount needs a prompt-token count before any upstream
//! call. Real tokenizers live behind the `TokenEstimator` trait; the
//! shipped implementation is a character heuristic.

use crate::models::{GatewayRequest, RelayMode};

/// Rough character-per-token divisor for latin-heavy text
const CHARS_PER_TOKEN: usize = 4;

/// Per-message framing overhead in chat transcripts
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Approximate the token count of a plain text fragment
pub fn approximate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    ((text.chars().count() + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN) as u32
}

/// Prompt-size estimation for reservation purposes
pub trait TokenEstimator: Send + Sync {
    /// Estimated prompt tokens for a normalized request in a given mode
    fn estimate(&self, request: &GatewayRequest, mode: RelayMode) -> u32;
}

/// Character-count heuristic estimator
#[derive(Debug, Clone, Default)]
pub struct HeuristicEstimator;

impl HeuristicEstimator {
    pub fn new() -> Self {
        Self
    }
}

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, request: &GatewayRequest, mode: RelayMode) -> u32 {
        match mode {
            RelayMode::ChatCompletions => request
                .messages
                .iter()
                .map(|message| {
                    approximate_tokens(&message.content.extract_text()) + MESSAGE_OVERHEAD_TOKENS
                })
                .sum(),
            RelayMode::Completions => value_tokens(request.prompt.as_ref()),
            RelayMode::Embeddings => value_tokens(request.input.as_ref()),
        }
    }
}

/// Token estimate for a prompt/input JSON value (string or string array)
fn value_tokens(value: Option<&serde_json::Value>) -> u32 {
    match value {
        Some(serde_json::Value::String(text)) => approximate_tokens(text),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(approximate_tokens)
            .sum(),
        _ => 0,
    }
}
