//! Per-request relay context
//!
//! `RequestMeta` carries everything the pipeline needs to know about one
//! inbound call: where it came from, which backend family serves it, and
//! the accounting fields the pipeline itself fills in along the way

use crate::config::ChannelConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Relay mode declared by the inbound route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    ChatCompletions,
    Completions,
    Embeddings,
}

impl RelayMode {
    /// Upstream path suffix for the canonical API family
    pub fn canonical_path(&self) -> &'static str {
        match self {
            RelayMode::ChatCompletions => "/chat/completions",
            RelayMode::Completions => "/completions",
            RelayMode::Embeddings => "/embeddings",
        }
    }
}

/// Backend API family; selects the translator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    /// The gateway's own canonical wire format
    OpenAi,
    Anthropic,
}

impl ApiType {
    pub fn from_str_loose(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "openai" => Some(ApiType::OpenAi),
            "anthropic" | "claude" => Some(ApiType::Anthropic),
            _ => None,
        }
    }
}

/// Channel flavor used for pricing lookups
///
/// Distinct from `ApiType`: two channels can share a wire format but carry
/// different price tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    OpenAi,
    Azure,
    Anthropic,
    Custom,
}

/// Per-call relay context
///
/// Created once before the pipeline runs. The pipeline only writes the
/// fields it owns: `origin_model`, `actual_model`, `prompt_tokens` and
/// `is_stream`.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    /// Channel flavor for pricing
    pub channel_type: ChannelType,
    /// Backend API family for translator selection
    pub api_type: ApiType,
    /// Declared relay mode
    pub mode: RelayMode,
    /// Principal the request is charged against
    pub token_id: String,
    /// Principal group for discount lookup
    pub group: String,
    /// Channel model alias table
    pub model_mapping: HashMap<String, String>,
    /// System prompt the channel mandates, if any
    pub forced_system_prompt: Option<String>,
    /// Channel requires request re-encoding even for the canonical family
    pub force_conversion: bool,
    /// Upstream base URL
    pub base_url: String,
    /// Upstream credential
    pub api_key: String,
    /// Model name as the client sent it
    pub origin_model: String,
    /// Model name after alias substitution; drives pricing and routing
    pub actual_model: String,
    /// Estimated prompt token count
    pub prompt_tokens: u32,
    /// Stream flag echoed from the request
    pub is_stream: bool,
    /// Request id for log correlation
    pub request_id: String,
}

impl RequestMeta {
    /// Build the context for one inbound call
    pub fn new(channel: &ChannelConfig, mode: RelayMode, token_id: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            channel_type: channel.channel_type,
            api_type: channel.api_type,
            mode,
            token_id: token_id.into(),
            group: group.into(),
            model_mapping: channel.model_mapping.clone(),
            forced_system_prompt: channel.forced_system_prompt.clone(),
            force_conversion: channel.force_conversion,
            base_url: channel.base_url.clone(),
            api_key: channel.api_key.clone(),
            origin_model: String::new(),
            actual_model: String::new(),
            prompt_tokens: 0,
            is_stream: false,
            request_id: Uuid::new_v4().simple().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_type_parsing() {
        assert_eq!(ApiType::from_str_loose("openai"), Some(ApiType::OpenAi));
        assert_eq!(ApiType::from_str_loose("Anthropic"), Some(ApiType::Anthropic));
        assert_eq!(ApiType::from_str_loose("claude"), Some(ApiType::Anthropic));
        assert_eq!(ApiType::from_str_loose("bedrock"), None);
    }

    #[test]
    fn test_canonical_paths() {
        assert_eq!(RelayMode::ChatCompletions.canonical_path(), "/chat/completions");
        assert_eq!(RelayMode::Completions.canonical_path(), "/completions");
        assert_eq!(RelayMode::Embeddings.canonical_path(), "/embeddings");
    }

    #[test]
    fn test_meta_construction() {
        let channel = ChannelConfig::new("https://api.openai.com/v1");
        let meta = RequestMeta::new(&channel, RelayMode::ChatCompletions, "token-1", "default");
        assert_eq!(meta.token_id, "token-1");
        assert_eq!(meta.group, "default");
        assert_eq!(meta.prompt_tokens, 0);
        assert!(!meta.is_stream);
        assert!(!meta.request_id.is_empty());
    }
}
