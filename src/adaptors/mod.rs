//! Adaptor module
//!
//! Defines the translator capability set and the registry mapping an API
//! type to its backend family implementation

pub mod anthropic;
pub mod openai;

use crate::models::{ApiType, GatewayRequest, RelayMode, RequestMeta, Usage};
use crate::services::classify::BufferedResponse;
use crate::utils::error::RelayResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

/// Translator between the canonical API and one backend family
///
/// Each implementation owns the full round trip: converting a normalized
/// request to its native shape, executing the transport call, and turning
/// the buffered upstream response into client-facing bytes plus usage.
#[async_trait]
pub trait Adaptor: Send + Sync {
    /// Get the adaptor name
    fn name(&self) -> &str;

    /// Convert the normalized request into the backend-native structure
    fn convert_request(&self, mode: RelayMode, request: &GatewayRequest) -> RelayResult<serde_json::Value>;

    /// Execute the outgoing transport call with an already-encoded payload
    async fn execute(&self, meta: &RequestMeta, payload: Bytes) -> RelayResult<reqwest::Response>;

    /// Produce the client-facing response bytes and extract usage in one pass
    fn materialize(&self, response: BufferedResponse, meta: &RequestMeta) -> RelayResult<(Usage, Bytes)>;
}

/// Pure mapping from API type to translator
pub struct AdaptorRegistry {
    adaptors: HashMap<ApiType, Arc<dyn Adaptor>>,
}

impl AdaptorRegistry {
    /// Empty registry; used by tests that exercise missing-adaptor paths
    pub fn new() -> Self {
        Self {
            adaptors: HashMap::new(),
        }
    }

    /// Registry with every shipped backend family
    pub fn standard(client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register(ApiType::OpenAi, Arc::new(openai::OpenAiAdaptor::new(client.clone())));
        registry.register(ApiType::Anthropic, Arc::new(anthropic::AnthropicAdaptor::new(client)));
        registry
    }

    pub fn register(&mut self, api_type: ApiType, adaptor: Arc<dyn Adaptor>) {
        self.adaptors.insert(api_type, adaptor);
    }

    /// Look up the translator for an API type
    pub fn get(&self, api_type: ApiType) -> Option<Arc<dyn Adaptor>> {
        self.adaptors.get(&api_type).cloned()
    }
}

impl Default for AdaptorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub use anthropic::AnthropicAdaptor;
pub use openai::OpenAiAdaptor;
