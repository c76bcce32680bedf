//! Upstream failure classification
//!
//! A transport-successful response may still carry a logical failure in
//! its status or body. The body is a read-once resource, so it is fully
//! buffered into a replayable view before anything inspects it.

use crate::models::RequestMeta;
use crate::utils::error::{helpers, RelayError};
use axum::http::StatusCode;
use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use tracing::debug;

/// Fully buffered upstream response
///
/// Constructed once from the live transport response; every later stage
/// reads the same immutable bytes instead of the consumed stream.
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl BufferedResponse {
    /// Drain a live response into a replayable buffer
    ///
    /// A failure while reading the body (including an upstream disconnect
    /// mid-stream) is a transport error.
    pub async fn capture(response: reqwest::Response) -> Result<Self, RelayError> {
        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|e| helpers::transport_error(format!("Invalid upstream status: {}", e)))?;
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| helpers::transport_error(format!("Failed to read upstream body: {}", e)))?;

        Ok(Self {
            status,
            headers,
            body,
        })
    }

    pub fn from_parts(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Cheap handle to the buffered bytes
    pub fn body(&self) -> Bytes {
        self.body.clone()
    }

    /// Whether the body is a server-sent event stream
    pub fn is_event_stream(&self) -> bool {
        self.content_type()
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false)
            || self.body.starts_with(b"data:")
    }
}

/// Decide whether a transport-successful response is a logical failure
///
/// Non-2xx statuses are always failures. A 2xx JSON document that carries
/// a backend error object is a failure hidden behind a successful
/// transport; its native code is mapped to the canonical status.
pub fn classify_upstream(meta: &RequestMeta, response: &BufferedResponse) -> Option<RelayError> {
    if !response.status().is_success() {
        return Some(upstream_error_from_body(meta, response));
    }

    // 2xx event streams carry failures as in-band events, handled during
    // materialization; only probe document bodies here.
    if response.is_event_stream() {
        return None;
    }

    let value: serde_json::Value = serde_json::from_slice(&response.body()).ok()?;
    let error = value.get("error")?;
    if error.is_null() {
        return None;
    }

    let code = error
        .get("code")
        .and_then(|c| c.as_str())
        .or_else(|| error.get("type").and_then(|t| t.as_str()))
        .unwrap_or("upstream_error")
        .to_string();
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("Upstream reported an error")
        .to_string();

    Some(RelayError::Upstream {
        status: helpers::upstream_status_for(&code),
        code,
        message,
    })
}

/// Build the canonical error for a non-2xx upstream response
fn upstream_error_from_body(meta: &RequestMeta, response: &BufferedResponse) -> RelayError {
    let fallback_code = format!("upstream_{}", response.status().as_u16());

    let (code, message) = serde_json::from_slice::<serde_json::Value>(&response.body())
        .ok()
        .and_then(|value| {
            let error = value.get("error")?.clone();
            let code = error
                .get("code")
                .and_then(|c| c.as_str())
                .or_else(|| error.get("type").and_then(|t| t.as_str()))
                .map(|s| s.to_string());
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(|s| s.to_string());
            Some((code, message))
        })
        .map(|(code, message)| {
            (
                code.unwrap_or_else(|| fallback_code.clone()),
                message.unwrap_or_else(|| "Upstream request failed".to_string()),
            )
        })
        .unwrap_or_else(|| (fallback_code.clone(), "Upstream request failed".to_string()));

    debug!(
        "Upstream failure for request {}: status {}, code {}",
        meta.request_id,
        response.status(),
        code
    );

    // Keep the upstream's own status when the body gave us nothing better.
    let status = if code == fallback_code {
        response.status()
    } else {
        helpers::upstream_status_for(&code)
    };

    RelayError::Upstream {
        code,
        message,
        status,
    }
}

/// Log a preview of the buffered upstream body when capture is enabled
///
/// Purely observational: it reads the replayable buffer and must never
/// influence classification or usage extraction.
pub fn capture_body_diagnostics(enabled: bool, meta: &RequestMeta, response: &BufferedResponse) {
    if !enabled {
        return;
    }

    const PREVIEW_LIMIT: usize = 2048;
    let body = response.body();
    let preview = String::from_utf8_lossy(&body[..body.len().min(PREVIEW_LIMIT)]).into_owned();
    debug!(
        "Upstream response for request {}: status {}, body: {}",
        meta.request_id,
        response.status(),
        preview
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::models::{RelayMode, RequestMeta};

    fn test_meta() -> RequestMeta {
        let channel = ChannelConfig::new("http://localhost");
        RequestMeta::new(&channel, RelayMode::ChatCompletions, "token", "default")
    }

    fn buffered(status: StatusCode, body: &str) -> BufferedResponse {
        BufferedResponse::from_parts(status, HeaderMap::new(), Bytes::from(body.to_string()))
    }

    #[test]
    fn test_clean_success_passes() {
        let response = buffered(StatusCode::OK, r#"{"id":"1","choices":[]}"#);
        assert!(classify_upstream(&test_meta(), &response).is_none());
    }

    #[test]
    fn test_error_hidden_in_success_status() {
        let response = buffered(StatusCode::OK, r#"{"error":{"code":"rate_limited"}}"#);
        let err = classify_upstream(&test_meta(), &response).unwrap();

        match err {
            RelayError::Upstream { code, status, .. } => {
                assert_eq!(code, "rate_limited");
                assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
            }
            other => panic!("Expected upstream error, got {:?}", other),
        }
    }

    #[test]
    fn test_null_error_field_is_success() {
        let response = buffered(StatusCode::OK, r#"{"id":"1","error":null}"#);
        assert!(classify_upstream(&test_meta(), &response).is_none());
    }

    #[test]
    fn test_non_success_status_is_failure() {
        let response = buffered(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error":{"type":"server_error","message":"boom"}}"#,
        );
        let err = classify_upstream(&test_meta(), &response).unwrap();
        assert!(matches!(err, RelayError::Upstream { .. }));
    }

    #[test]
    fn test_non_json_error_body_keeps_upstream_status() {
        let response = buffered(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        let err = classify_upstream(&test_meta(), &response).unwrap();

        match err {
            RelayError::Upstream { code, status, .. } => {
                assert_eq!(code, "upstream_502");
                assert_eq!(status, StatusCode::BAD_GATEWAY);
            }
            other => panic!("Expected upstream error, got {:?}", other),
        }
    }

    #[test]
    fn test_event_stream_bodies_skip_probe() {
        let response = buffered(StatusCode::OK, "data: {\"choices\":[]}\n\n");
        assert!(classify_upstream(&test_meta(), &response).is_none());
    }

    #[test]
    fn test_diagnostics_do_not_change_classification() {
        let meta = test_meta();
        let response = buffered(StatusCode::OK, r#"{"error":{"code":"rate_limited"}}"#);

        let before = classify_upstream(&meta, &response).map(|e| e.code().to_string());
        capture_body_diagnostics(true, &meta, &response);
        capture_body_diagnostics(false, &meta, &response);
        let after = classify_upstream(&meta, &response).map(|e| e.code().to_string());

        assert_eq!(before, after);
        assert_eq!(response.body(), Bytes::from(r#"{"error":{"code":"rate_limited"}}"#));
    }
}
