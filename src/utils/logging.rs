//! Logging utilities
//!
//! Subscriber initialization and request log summaries

use crate::models::RequestMeta;
use serde_json::json;
use tracing::info;

/// Initialize the logging system
///
/// Text format for development, JSON when `LOG_FORMAT=json`.
pub fn init_logging() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if log_format == "json" {
        Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(log_level)
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .finish(),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(log_level)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .finish(),
        )
    };

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("Logging system initialized");
}

/// Compact per-request summary for debug logs
pub fn relay_log_summary(meta: &RequestMeta) -> serde_json::Value {
    json!({
        "request_id": meta.request_id,
        "mode": meta.mode,
        "api_type": meta.api_type,
        "origin_model": meta.origin_model,
        "actual_model": meta.actual_model,
        "prompt_tokens": meta.prompt_tokens,
        "stream": meta.is_stream,
        "group": meta.group,
    })
}
