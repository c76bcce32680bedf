//! Data models module
//!
//! Canonical wire shapes, backend-native shapes and per-request context

pub mod anthropic;
pub mod chat;
pub mod meta;

pub use chat::{ChatMessage, ChatResponse, GatewayRequest, MessageContent, Usage};
pub use meta::{ApiType, ChannelType, RelayMode, RequestMeta};
