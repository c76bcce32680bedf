//! Request validation and normalization
//!
//! Structural checks per relay mode, model-alias substitution and
//! forced-system-prompt injection. Everything here runs before the
//! admission gate, so failures never touch the ledger.

use crate::models::chat::MessageContent;
use crate::models::{ChatMessage, GatewayRequest, RelayMode, RequestMeta};
use crate::utils::error::{helpers, RelayResult};
use tracing::debug;

const MAX_TOKENS_LIMIT: u32 = 100_000;

/// Validate a request against the rules of its declared mode
pub fn validate_request(request: &GatewayRequest, mode: RelayMode) -> RelayResult<()> {
    if request.model.is_empty() {
        return Err(helpers::validation_error("Model name cannot be empty"));
    }

    if let Some(max_tokens) = request.max_tokens {
        if max_tokens == 0 {
            return Err(helpers::validation_error("max_tokens must be greater than 0"));
        }
        if max_tokens > MAX_TOKENS_LIMIT {
            return Err(helpers::validation_error(format!(
                "max_tokens cannot exceed {}",
                MAX_TOKENS_LIMIT
            )));
        }
    }

    if let Some(temperature) = request.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(helpers::validation_error("temperature must be between 0.0 and 2.0"));
        }
    }

    if let Some(top_p) = request.top_p {
        if !(0.0..=1.0).contains(&top_p) {
            return Err(helpers::validation_error("top_p must be between 0.0 and 1.0"));
        }
    }

    match mode {
        RelayMode::ChatCompletions => validate_messages(request),
        RelayMode::Completions => {
            if request.prompt.is_none() {
                return Err(helpers::validation_error("Field prompt is required"));
            }
            Ok(())
        }
        RelayMode::Embeddings => {
            if request.input.is_none() {
                return Err(helpers::validation_error("Field input is required"));
            }
            Ok(())
        }
    }
}

fn validate_messages(request: &GatewayRequest) -> RelayResult<()> {
    if request.messages.is_empty() {
        return Err(helpers::validation_error("Message list cannot be empty"));
    }

    for (i, message) in request.messages.iter().enumerate() {
        if message.role.is_empty() {
            return Err(helpers::validation_error(format!(
                "Message {} role cannot be empty",
                i
            )));
        }
        if !matches!(message.role.as_str(), "system" | "user" | "assistant" | "tool") {
            return Err(helpers::validation_error(format!(
                "Message {} role is invalid: {}",
                i, message.role
            )));
        }
        // Assistant turns may legitimately be empty mid-conversation.
        if message.role == "user" && message.content.is_empty_text() {
            return Err(helpers::validation_error(format!(
                "Message {} content cannot be empty",
                i
            )));
        }
    }

    Ok(())
}

/// Substitute the channel alias for the client-declared model
///
/// The original name is preserved in `meta.origin_model` for accounting;
/// the mapped name drives pricing and routing from here on.
pub fn apply_model_mapping(request: &mut GatewayRequest, meta: &mut RequestMeta) {
    meta.origin_model = request.model.clone();

    if let Some(mapped) = meta.model_mapping.get(&request.model) {
        if !mapped.is_empty() && *mapped != request.model {
            debug!("Mapped model {} to {}", request.model, mapped);
            request.model = mapped.clone();
        }
    }

    meta.actual_model = request.model.clone();
}

/// Overwrite or insert the channel's mandated system prompt
///
/// Returns whether the request's own prompt was replaced; the flag rides
/// along to settlement as a billing extension point.
pub fn apply_forced_system_prompt(request: &mut GatewayRequest, meta: &RequestMeta) -> bool {
    let Some(forced) = meta.forced_system_prompt.as_deref() else {
        return false;
    };
    if forced.is_empty() {
        return false;
    }

    if let Some(first) = request.messages.first_mut() {
        if first.role == "system" {
            if first.content.extract_text() == forced {
                return false;
            }
            first.content = MessageContent::Text(forced.to_string());
            debug!("Reset existing system prompt for request {}", meta.request_id);
            return true;
        }
    }

    request.messages.insert(0, ChatMessage::text("system", forced));
    debug!("Injected system prompt for request {}", meta.request_id);
    true
}
