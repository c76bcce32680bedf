//! Canonical (OpenAI-style) adaptor
//!
//! The gateway's own wire format. Requests need no structural conversion,
//! responses pass through byte-for-byte; this adaptor's real work is
//! transport and usage extraction, including SSE aggregation for streams.

use crate::adaptors::Adaptor;
use crate::billing::approximate_tokens;
use crate::models::chat::ChatStreamChunk;
use crate::models::{GatewayRequest, RelayMode, RequestMeta, Usage};
use crate::services::classify::BufferedResponse;
use crate::utils::error::{helpers, RelayResult};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

/// Canonical API adaptor
#[derive(Debug, Clone)]
pub struct OpenAiAdaptor {
    client: reqwest::Client,
}

impl OpenAiAdaptor {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Extract usage from a non-streamed response document
    ///
    /// Some compatible backends omit or zero the usage block; totals are
    /// then derived from the choice contents so settlement always has
    /// complete accounting.
    fn document_usage(&self, body: &Bytes, meta: &RequestMeta) -> RelayResult<Usage> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| helpers::materialization_error(format!("Invalid response document: {}", e)))?;

        if value.get("choices").is_none() && value.get("data").is_none() {
            return Err(helpers::materialization_error(
                "Response document has neither choices nor data",
            ));
        }

        let reported = value
            .get("usage")
            .cloned()
            .and_then(|u| serde_json::from_value::<Usage>(u).ok())
            .unwrap_or_default();

        if !reported.is_empty() {
            return Ok(normalize_usage(reported));
        }

        let completion_text: String = value
            .get("choices")
            .and_then(|c| c.as_array())
            .map(|choices| {
                choices
                    .iter()
                    .filter_map(|choice| {
                        choice
                            .pointer("/message/content")
                            .or_else(|| choice.pointer("/text"))
                            .and_then(|c| c.as_str())
                    })
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(Usage::new(meta.prompt_tokens, approximate_tokens(&completion_text)))
    }

    /// Aggregate usage across an entire SSE event sequence
    ///
    /// A final chunk carrying a usage block wins; otherwise completion
    /// tokens are derived from the concatenated deltas.
    fn stream_usage(&self, body: &Bytes, meta: &RequestMeta) -> RelayResult<Usage> {
        let text = std::str::from_utf8(body)
            .map_err(|e| helpers::materialization_error(format!("Invalid UTF-8 in stream: {}", e)))?;

        let mut reported: Option<Usage> = None;
        let mut aggregated = String::new();
        let mut saw_chunk = false;

        for line in text.lines() {
            let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() || data == "[DONE]" {
                continue;
            }

            let chunk: ChatStreamChunk = serde_json::from_str(data).map_err(|e| {
                helpers::materialization_error(format!("Invalid stream chunk: {}", e))
            })?;
            saw_chunk = true;

            for choice in &chunk.choices {
                if let Some(content) = &choice.delta.content {
                    aggregated.push_str(content);
                }
            }
            if let Some(usage) = chunk.usage {
                if !usage.is_empty() {
                    reported = Some(usage);
                }
            }
        }

        if !saw_chunk {
            return Err(helpers::materialization_error("Stream contained no chunks"));
        }

        let usage = reported
            .map(normalize_usage)
            .unwrap_or_else(|| Usage::new(meta.prompt_tokens, approximate_tokens(&aggregated)));

        debug!(
            "Aggregated stream for request {}: {} completion tokens",
            meta.request_id, usage.completion_tokens
        );
        Ok(usage)
    }
}

fn normalize_usage(mut usage: Usage) -> Usage {
    if usage.total_tokens == 0 {
        usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
    }
    usage
}

#[async_trait]
impl Adaptor for OpenAiAdaptor {
    fn name(&self) -> &str {
        "openai"
    }

    fn convert_request(&self, _mode: RelayMode, request: &GatewayRequest) -> RelayResult<serde_json::Value> {
        // Canonical already; re-encoding only happens when the fast path
        // is disqualified (alias substitution, forced prompt, channel flag).
        serde_json::to_value(request)
            .map_err(|e| helpers::conversion_error(format!("Failed to encode request: {}", e)))
    }

    async fn execute(&self, meta: &RequestMeta, payload: Bytes) -> RelayResult<reqwest::Response> {
        let url = format!("{}{}", meta.base_url, meta.mode.canonical_path());
        debug!("Dispatching request {} to {}", meta.request_id, url);

        self.client
            .post(&url)
            .header("Authorization", format!("Bearer {}", meta.api_key))
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| helpers::transport_error(format!("Request to {} failed: {}", url, e)))
    }

    fn materialize(&self, response: BufferedResponse, meta: &RequestMeta) -> RelayResult<(Usage, Bytes)> {
        let body = response.body();

        let usage = if meta.is_stream && response.is_event_stream() {
            self.stream_usage(&body, meta)?
        } else {
            self.document_usage(&body, meta)?
        };

        // Canonical family: the upstream bytes are already client-facing.
        Ok((usage, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use axum::http::StatusCode;
    use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

    fn test_meta(stream: bool) -> RequestMeta {
        let channel = ChannelConfig::new("http://localhost");
        let mut meta = RequestMeta::new(&channel, RelayMode::ChatCompletions, "token", "default");
        meta.prompt_tokens = 10;
        meta.is_stream = stream;
        meta
    }

    fn document(body: &str) -> BufferedResponse {
        BufferedResponse::from_parts(StatusCode::OK, HeaderMap::new(), Bytes::from(body.to_string()))
    }

    fn event_stream(body: &str) -> BufferedResponse {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        BufferedResponse::from_parts(StatusCode::OK, headers, Bytes::from(body.to_string()))
    }

    #[test]
    fn test_document_usage_reported() {
        let adaptor = OpenAiAdaptor::new(reqwest::Client::new());
        let response = document(
            r#"{"id":"1","object":"chat.completion","created":1,"model":"m",
                "choices":[{"index":0,"message":{"role":"assistant","content":"hi"},"finish_reason":"stop"}],
                "usage":{"prompt_tokens":100,"completion_tokens":50,"total_tokens":150}}"#,
        );

        let (usage, body) = adaptor.materialize(response, &test_meta(false)).unwrap();
        assert_eq!(usage, Usage::new(100, 50));
        assert!(body.starts_with(b"{\"id\":\"1\""));
    }

    #[test]
    fn test_document_usage_derived_when_missing() {
        let adaptor = OpenAiAdaptor::new(reqwest::Client::new());
        let response = document(
            r#"{"id":"1","object":"chat.completion","created":1,"model":"m",
                "choices":[{"index":0,"message":{"role":"assistant","content":"abcdefgh"},"finish_reason":"stop"}]}"#,
        );

        let (usage, _) = adaptor.materialize(response, &test_meta(false)).unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 2);
    }

    #[test]
    fn test_materialize_rejects_unexpected_shape() {
        let adaptor = OpenAiAdaptor::new(reqwest::Client::new());
        let response = document(r#"{"id":"1","object":"chat.completion"}"#);
        assert!(adaptor.materialize(response, &test_meta(false)).is_err());
    }

    #[test]
    fn test_stream_usage_from_final_chunk() {
        let adaptor = OpenAiAdaptor::new(reqwest::Client::new());
        let body = concat!(
            "data: {\"id\":\"1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"id\":\"1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"id\":\"1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[],\"usage\":{\"prompt_tokens\":7,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n",
        );

        let (usage, _) = adaptor.materialize(event_stream(body), &test_meta(true)).unwrap();
        assert_eq!(usage.prompt_tokens, 7);
        assert_eq!(usage.completion_tokens, 2);
        assert_eq!(usage.total_tokens, 9);
    }

    #[test]
    fn test_stream_usage_derived_from_deltas() {
        let adaptor = OpenAiAdaptor::new(reqwest::Client::new());
        let body = concat!(
            "data: {\"id\":\"1\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"abcdefgh\"}}]}\n\n",
            "data: [DONE]\n\n",
        );

        let (usage, _) = adaptor.materialize(event_stream(body), &test_meta(true)).unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 2);
    }

    #[test]
    fn test_empty_stream_is_materialization_failure() {
        let adaptor = OpenAiAdaptor::new(reqwest::Client::new());
        let response = event_stream("data: [DONE]\n\n");
        assert!(adaptor.materialize(response, &test_meta(true)).is_err());
    }
}
