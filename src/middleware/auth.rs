//! Authentication middleware
//!
//! Validates principal tokens before requests reach the relay handlers

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Authentication middleware
///
/// Rejects requests without a plausibly formatted token; principal
/// identity extraction happens in the relay handlers.
pub async fn auth_middleware(
    State(_state): State<Arc<crate::handlers::AppState>>,
    headers: HeaderMap,
    request: Request<Body>,
    next: Next,
) -> Result<Response<Body>, StatusCode> {
    let path = request.uri().path();

    // Health endpoints stay open.
    if path.starts_with("/health") || path == "/" {
        return Ok(next.run(request).await);
    }

    let auth_header = headers.get("authorization").and_then(|h| h.to_str().ok());

    match auth_header {
        Some(token) if validate_api_key(token) => {
            debug!("Authentication successful");
            Ok(next.run(request).await)
        }
        Some(_) => {
            warn!("Invalid principal token");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!("Missing authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Validate principal token format
pub fn validate_api_key(api_key: &str) -> bool {
    if api_key.is_empty() {
        return false;
    }

    let token = api_key.strip_prefix("Bearer ").unwrap_or(api_key);

    token.len() >= 8 && !token.contains(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_api_key() {
        assert!(validate_api_key("Bearer sk-1234567890abcdef"));
        assert!(validate_api_key("sk-1234567890abcdef"));
        assert!(validate_api_key("custom_api_key_123"));

        assert!(!validate_api_key(""));
        assert!(!validate_api_key("short"));
        assert!(!validate_api_key("Bearer "));
        assert!(!validate_api_key("Bearer invalid key with spaces"));
    }
}
