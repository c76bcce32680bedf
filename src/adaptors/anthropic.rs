//! Anthropic adaptor
//!
//! Translates between the canonical chat shape and the Anthropic messages
//! API, including SSE event aggregation for streamed responses.

use crate::adaptors::Adaptor;
use crate::billing::approximate_tokens;
use crate::models::anthropic::{AnthropicContentBlock, AnthropicMessage, AnthropicRequest, AnthropicResponse};
use crate::models::chat::{ChatChoice, ChatMessage, ChatResponse};
use crate::models::{GatewayRequest, RelayMode, RequestMeta, Usage};
use crate::services::classify::BufferedResponse;
use crate::utils::error::{helpers, RelayResult};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic messages API adaptor
#[derive(Debug, Clone)]
pub struct AnthropicAdaptor {
    client: reqwest::Client,
}

impl AnthropicAdaptor {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Map a native response document to the canonical shape
    fn canonicalize(&self, native: AnthropicResponse, meta: &RequestMeta) -> (Usage, ChatResponse) {
        let text = native
            .content
            .iter()
            .map(|block| {
                let AnthropicContentBlock::Text { text } = block;
                text.as_str()
            })
            .collect::<Vec<_>>()
            .join("");

        let usage = Usage::new(native.usage.input_tokens, native.usage.output_tokens);

        let response = ChatResponse {
            id: native.id,
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: meta.origin_model.clone(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage::text("assistant", text),
                finish_reason: native.stop_reason.map(|reason| match reason.as_str() {
                    "end_turn" | "stop_sequence" => "stop".to_string(),
                    "max_tokens" => "length".to_string(),
                    other => other.to_string(),
                }),
            }],
            usage: Some(usage),
        };

        (usage, response)
    }

    /// Aggregate a native SSE event sequence into one canonical document
    fn aggregate_stream(&self, body: &Bytes, meta: &RequestMeta) -> RelayResult<(Usage, ChatResponse)> {
        let text = std::str::from_utf8(body)
            .map_err(|e| helpers::materialization_error(format!("Invalid UTF-8 in stream: {}", e)))?;

        let mut message_id = String::new();
        let mut input_tokens = 0u32;
        let mut output_tokens = 0u32;
        let mut stop_reason: Option<String> = None;
        let mut aggregated = String::new();
        let mut saw_event = false;

        for line in text.lines() {
            let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }

            let event: serde_json::Value = serde_json::from_str(data).map_err(|e| {
                helpers::materialization_error(format!("Invalid stream event: {}", e))
            })?;
            saw_event = true;

            match event.get("type").and_then(|t| t.as_str()) {
                Some("message_start") => {
                    if let Some(message) = event.get("message") {
                        if let Some(id) = message.get("id").and_then(|i| i.as_str()) {
                            message_id = id.to_string();
                        }
                        if let Some(tokens) = message.pointer("/usage/input_tokens").and_then(|t| t.as_u64()) {
                            input_tokens = tokens as u32;
                        }
                    }
                }
                Some("content_block_delta") => {
                    if let Some(delta) = event.pointer("/delta/text").and_then(|t| t.as_str()) {
                        aggregated.push_str(delta);
                    }
                }
                Some("message_delta") => {
                    if let Some(tokens) = event.pointer("/usage/output_tokens").and_then(|t| t.as_u64()) {
                        output_tokens = tokens as u32;
                    }
                    if let Some(reason) = event.pointer("/delta/stop_reason").and_then(|r| r.as_str()) {
                        stop_reason = Some(reason.to_string());
                    }
                }
                _ => {}
            }
        }

        if !saw_event {
            return Err(helpers::materialization_error("Stream contained no events"));
        }

        if input_tokens == 0 {
            input_tokens = meta.prompt_tokens;
        }
        if output_tokens == 0 {
            output_tokens = approximate_tokens(&aggregated);
        }

        let usage = Usage::new(input_tokens, output_tokens);
        let response = ChatResponse {
            id: if message_id.is_empty() {
                format!("msg_{}", meta.request_id)
            } else {
                message_id
            },
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: meta.origin_model.clone(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage::text("assistant", aggregated),
                finish_reason: stop_reason.map(|reason| match reason.as_str() {
                    "end_turn" | "stop_sequence" => "stop".to_string(),
                    "max_tokens" => "length".to_string(),
                    other => other.to_string(),
                }),
            }],
            usage: Some(usage),
        };

        debug!(
            "Aggregated {} stream events for request {}",
            usage.completion_tokens, meta.request_id
        );
        Ok((usage, response))
    }
}

#[async_trait]
impl Adaptor for AnthropicAdaptor {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn convert_request(&self, mode: RelayMode, request: &GatewayRequest) -> RelayResult<serde_json::Value> {
        if mode != RelayMode::ChatCompletions {
            return Err(helpers::conversion_error(
                "Anthropic backend only serves chat completions",
            ));
        }

        let mut system_parts: Vec<String> = Vec::new();
        let mut messages = Vec::new();

        for message in &request.messages {
            let text = message.content.extract_text();
            match message.role.as_str() {
                "system" => system_parts.push(text),
                "user" | "assistant" => messages.push(AnthropicMessage {
                    role: message.role.clone(),
                    content: text,
                }),
                other => {
                    return Err(helpers::conversion_error(format!(
                        "Role {} has no Anthropic equivalent",
                        other
                    )))
                }
            }
        }

        let native = AnthropicRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages,
            system: if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n"))
            },
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: request.stop.clone(),
            stream: request.stream,
        };

        serde_json::to_value(&native)
            .map_err(|e| helpers::conversion_error(format!("Failed to encode request: {}", e)))
    }

    async fn execute(&self, meta: &RequestMeta, payload: Bytes) -> RelayResult<reqwest::Response> {
        let url = format!("{}/v1/messages", meta.base_url);
        debug!("Dispatching request {} to {}", meta.request_id, url);

        self.client
            .post(&url)
            .header("x-api-key", &meta.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| helpers::transport_error(format!("Request to {} failed: {}", url, e)))
    }

    fn materialize(&self, response: BufferedResponse, meta: &RequestMeta) -> RelayResult<(Usage, Bytes)> {
        let body = response.body();

        let (usage, canonical) = if meta.is_stream && response.is_event_stream() {
            self.aggregate_stream(&body, meta)?
        } else {
            let native: AnthropicResponse = serde_json::from_slice(&body).map_err(|e| {
                helpers::materialization_error(format!("Invalid Anthropic response: {}", e))
            })?;
            self.canonicalize(native, meta)
        };

        let bytes = serde_json::to_vec(&canonical)
            .map_err(|e| helpers::materialization_error(format!("Failed to encode response: {}", e)))?;
        Ok((usage, Bytes::from(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::models::{ApiType, ChannelType};
    use axum::http::StatusCode;
    use reqwest::header::HeaderMap;

    fn test_meta() -> RequestMeta {
        let mut channel = ChannelConfig::new("http://localhost");
        channel.api_type = ApiType::Anthropic;
        channel.channel_type = ChannelType::Anthropic;
        let mut meta = RequestMeta::new(&channel, RelayMode::ChatCompletions, "token", "default");
        meta.origin_model = "claude-3-5-sonnet".to_string();
        meta.actual_model = "claude-3-5-sonnet".to_string();
        meta
    }

    #[test]
    fn test_convert_request_extracts_system_prompt() {
        let adaptor = AnthropicAdaptor::new(reqwest::Client::new());
        let request = GatewayRequest {
            model: "claude-3-5-sonnet".to_string(),
            messages: vec![
                ChatMessage::text("system", "be concise"),
                ChatMessage::text("user", "hello"),
            ],
            max_tokens: Some(256),
            ..Default::default()
        };

        let value = adaptor.convert_request(RelayMode::ChatCompletions, &request).unwrap();
        assert_eq!(value["system"], "be concise");
        assert_eq!(value["max_tokens"], 256);
        assert_eq!(value["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_convert_request_rejects_other_modes() {
        let adaptor = AnthropicAdaptor::new(reqwest::Client::new());
        let request = GatewayRequest {
            model: "claude-3-5-sonnet".to_string(),
            input: Some(serde_json::json!("text")),
            ..Default::default()
        };

        assert!(adaptor.convert_request(RelayMode::Embeddings, &request).is_err());
    }

    #[test]
    fn test_materialize_document() {
        let adaptor = AnthropicAdaptor::new(reqwest::Client::new());
        let body = r#"{
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "Hi!"}],
            "model": "claude-3-5-sonnet",
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 3}
        }"#;
        let response = BufferedResponse::from_parts(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from(body.to_string()),
        );

        let (usage, bytes) = adaptor.materialize(response, &test_meta()).unwrap();
        assert_eq!(usage, Usage::new(12, 3));

        let canonical: ChatResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(canonical.choices[0].message.content.extract_text(), "Hi!");
        assert_eq!(canonical.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(canonical.model, "claude-3-5-sonnet");
    }

    #[test]
    fn test_materialize_stream_aggregates_events() {
        let adaptor = AnthropicAdaptor::new(reqwest::Client::new());
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_02\",\"usage\":{\"input_tokens\":9}}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":2}}\n\n",
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("text/event-stream"),
        );
        let response = BufferedResponse::from_parts(StatusCode::OK, headers, Bytes::from(body));

        let mut meta = test_meta();
        meta.is_stream = true;

        let (usage, bytes) = adaptor.materialize(response, &meta).unwrap();
        assert_eq!(usage, Usage::new(9, 2));

        let canonical: ChatResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(canonical.id, "msg_02");
        assert_eq!(canonical.choices[0].message.content.extract_text(), "Hello");
    }

    #[test]
    fn test_materialize_rejects_garbage() {
        let adaptor = AnthropicAdaptor::new(reqwest::Client::new());
        let response = BufferedResponse::from_parts(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from_static(b"not json"),
        );
        assert!(adaptor.materialize(response, &test_meta()).is_err());
    }
}
