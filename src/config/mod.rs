//! Configuration module
//!
//! Application settings loaded from the environment

pub mod settings;

pub use settings::{BillingConfig, ChannelConfig, LoggingConfig, ServerConfig, Settings};
