//! Relay endpoint handlers
//!
//! Thin inbound surface: each handler builds the per-request context and
//! delegates to the pipeline. All relay semantics live in the pipeline.

use crate::handlers::AppState;
use crate::models::{RelayMode, RequestMeta};
use crate::utils::error::RelayError;
use crate::utils::logging::relay_log_summary;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Response},
    response::IntoResponse,
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    relay(state, headers, body, RelayMode::ChatCompletions).await
}

/// POST /v1/completions
pub async fn completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    relay(state, headers, body, RelayMode::Completions).await
}

/// POST /v1/embeddings
pub async fn embeddings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response<Body> {
    relay(state, headers, body, RelayMode::Embeddings).await
}

async fn relay(
    state: Arc<AppState>,
    headers: HeaderMap,
    body: Bytes,
    mode: RelayMode,
) -> Response<Body> {
    let Some(principal) = extract_principal(&headers) else {
        return RelayError::Validation("Missing or malformed Authorization header".to_string())
            .into_response();
    };
    let group = headers
        .get("x-principal-group")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("default")
        .to_string();

    let mut meta = RequestMeta::new(&state.settings.channel, mode, principal, group);

    match state.pipeline.relay(&mut meta, body).await {
        Ok(relayed) => {
            debug!("Relay finished: {}", relay_log_summary(&meta));

            Response::builder()
                .status(relayed.status)
                .header("Content-Type", relayed.content_type)
                .body(Body::from(relayed.body))
                .unwrap_or_else(|_| {
                    RelayError::Internal(anyhow::anyhow!("Failed to build response")).into_response()
                })
        }
        Err(err) => err.into_response(),
    }
}

/// Principal token from the Authorization header
fn extract_principal(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("authorization")?.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}
