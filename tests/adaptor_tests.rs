//! Adaptor integration tests
//!
//! Exercise each backend family's transport, buffering and
//! materialization against a mocked upstream.

use bytes::Bytes;
use httpmock::prelude::*;
use quotagate::adaptors::{Adaptor, AdaptorRegistry, AnthropicAdaptor, OpenAiAdaptor};
use quotagate::config::ChannelConfig;
use quotagate::models::{ApiType, ChannelType, GatewayRequest, RelayMode, RequestMeta};
use quotagate::services::classify::{classify_upstream, BufferedResponse};
use serde_json::json;

fn openai_meta(base_url: &str, mode: RelayMode) -> RequestMeta {
    let mut channel = ChannelConfig::new(base_url);
    channel.api_key = "upstream-key".to_string();
    let mut meta = RequestMeta::new(&channel, mode, "sk-principal", "default");
    meta.origin_model = "gpt-4o".to_string();
    meta.actual_model = "gpt-4o".to_string();
    meta.prompt_tokens = 12;
    meta
}

fn anthropic_meta(base_url: &str) -> RequestMeta {
    let mut channel = ChannelConfig::new(base_url);
    channel.api_type = ApiType::Anthropic;
    channel.channel_type = ChannelType::Anthropic;
    channel.api_key = "upstream-key".to_string();
    let mut meta = RequestMeta::new(&channel, RelayMode::ChatCompletions, "sk-principal", "default");
    meta.origin_model = "claude-3-5-sonnet".to_string();
    meta.actual_model = "claude-3-5-sonnet".to_string();
    meta
}

#[tokio::test]
async fn openai_adaptor_round_trip() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("authorization", "Bearer upstream-key");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "id": "chatcmpl-1",
                    "object": "chat.completion",
                    "created": 1,
                    "model": "gpt-4o",
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": "Hi"},
                        "finish_reason": "stop"
                    }],
                    "usage": {"prompt_tokens": 9, "completion_tokens": 1, "total_tokens": 10}
                }));
        })
        .await;

    let adaptor = OpenAiAdaptor::new(reqwest::Client::new());
    let meta = openai_meta(&server.base_url(), RelayMode::ChatCompletions);
    let payload = Bytes::from(
        json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "Hello"}]}).to_string(),
    );

    let response = adaptor.execute(&meta, payload).await.unwrap();
    let buffered = BufferedResponse::capture(response).await.unwrap();

    assert!(classify_upstream(&meta, &buffered).is_none());

    let (usage, body) = adaptor.materialize(buffered, &meta).unwrap();
    assert_eq!(usage.prompt_tokens, 9);
    assert_eq!(usage.completion_tokens, 1);

    let document: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(document["choices"][0]["message"]["content"], "Hi");

    mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn openai_adaptor_routes_by_mode() {
    let server = MockServer::start_async().await;
    let embeddings = server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "object": "list",
                    "data": [{"object": "embedding", "index": 0, "embedding": [0.1, 0.2]}],
                    "model": "text-embedding-3-small",
                    "usage": {"prompt_tokens": 4, "total_tokens": 4}
                }));
        })
        .await;

    let adaptor = OpenAiAdaptor::new(reqwest::Client::new());
    let meta = openai_meta(&server.base_url(), RelayMode::Embeddings);
    let payload = Bytes::from(
        json!({"model": "text-embedding-3-small", "input": "abcdefgh"}).to_string(),
    );

    let response = adaptor.execute(&meta, payload).await.unwrap();
    let buffered = BufferedResponse::capture(response).await.unwrap();
    let (usage, _) = adaptor.materialize(buffered, &meta).unwrap();

    embeddings.assert_hits_async(1).await;
    assert_eq!(usage.prompt_tokens, 4);
    assert_eq!(usage.completion_tokens, 0);
}

#[tokio::test]
async fn openai_error_status_is_classified_not_materialized() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(401)
                .header("content-type", "application/json")
                .json_body(json!({
                    "error": {"type": "authentication_error", "message": "bad key"}
                }));
        })
        .await;

    let adaptor = OpenAiAdaptor::new(reqwest::Client::new());
    let meta = openai_meta(&server.base_url(), RelayMode::ChatCompletions);
    let payload = Bytes::from(json!({"model": "gpt-4o", "messages": []}).to_string());

    let response = adaptor.execute(&meta, payload).await.unwrap();
    let buffered = BufferedResponse::capture(response).await.unwrap();

    let err = classify_upstream(&meta, &buffered).unwrap();
    assert_eq!(err.code(), "authentication_error");
    assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn anthropic_adaptor_sends_native_headers() {
    let server = MockServer::start_async().await;
    let native = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/messages")
                .header("x-api-key", "upstream-key")
                .header("anthropic-version", "2023-06-01");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "id": "msg_01",
                    "type": "message",
                    "role": "assistant",
                    "content": [{"type": "text", "text": "Hello"}],
                    "model": "claude-3-5-sonnet",
                    "stop_reason": "end_turn",
                    "usage": {"input_tokens": 8, "output_tokens": 2}
                }));
        })
        .await;

    let adaptor = AnthropicAdaptor::new(reqwest::Client::new());
    let meta = anthropic_meta(&server.base_url());

    let request: GatewayRequest = serde_json::from_value(json!({
        "model": "claude-3-5-sonnet",
        "messages": [{"role": "user", "content": "Hello"}],
        "max_tokens": 32
    }))
    .unwrap();

    let converted = adaptor.convert_request(RelayMode::ChatCompletions, &request).unwrap();
    let payload = Bytes::from(serde_json::to_vec(&converted).unwrap());

    let response = adaptor.execute(&meta, payload).await.unwrap();
    let buffered = BufferedResponse::capture(response).await.unwrap();
    let (usage, body) = adaptor.materialize(buffered, &meta).unwrap();

    native.assert_hits_async(1).await;
    assert_eq!(usage.prompt_tokens, 8);

    let canonical: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(canonical["object"], "chat.completion");
    assert_eq!(canonical["model"], "claude-3-5-sonnet");
}

#[test]
fn registry_resolves_every_shipped_family() {
    let registry = AdaptorRegistry::standard(reqwest::Client::new());

    let openai = registry.get(ApiType::OpenAi).unwrap();
    assert_eq!(openai.name(), "openai");

    let anthropic = registry.get(ApiType::Anthropic).unwrap();
    assert_eq!(anthropic.name(), "anthropic");
}
