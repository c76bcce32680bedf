//! Application configuration settings
//!
//! Defines all configuration structures and env-based loading logic

use crate::models::{ApiType, ChannelType};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Server configuration
    pub server: ServerConfig,
    /// Upstream channel configuration
    pub channel: ChannelConfig,
    /// Billing configuration
    pub billing: BillingConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
}

/// Upstream channel configuration
///
/// One channel per process: credential selection and failover across
/// multiple channels belong to an outer layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel flavor for pricing
    pub channel_type: ChannelType,
    /// Backend API family
    pub api_type: ApiType,
    /// Upstream base URL
    pub base_url: String,
    /// Upstream credential
    pub api_key: String,
    /// Model alias table
    #[serde(default)]
    pub model_mapping: HashMap<String, String>,
    /// System prompt this channel mandates
    #[serde(default)]
    pub forced_system_prompt: Option<String>,
    /// Always re-encode requests even for the canonical family
    #[serde(default)]
    pub force_conversion: bool,
}

impl ChannelConfig {
    /// Canonical channel with defaults; callers adjust fields as needed
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            channel_type: ChannelType::OpenAi,
            api_type: ApiType::OpenAi,
            base_url: base_url.into(),
            api_key: String::new(),
            model_mapping: HashMap::new(),
            forced_system_prompt: None,
            force_conversion: false,
        }
    }
}

/// Billing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Flat quota added to every reservation
    pub reserve_headroom: i64,
    /// Per-request settlement charge ceiling (0 disables the cap)
    pub max_charge: i64,
    /// Balance granted to principals on first sight
    pub initial_balance: i64,
    /// Log upstream response bodies
    pub capture_upstream_body: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (text/json)
    pub format: String,
}

impl Settings {
    /// Create a new configuration instance from the environment
    pub fn new() -> Result<Self> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let api_type = get_env_or_default("UPSTREAM_API_TYPE", "openai");
        let api_type = ApiType::from_str_loose(&api_type)
            .with_context(|| format!("Unknown UPSTREAM_API_TYPE: {}", api_type))?;

        let channel_type = match api_type {
            ApiType::OpenAi => ChannelType::OpenAi,
            ApiType::Anthropic => ChannelType::Anthropic,
        };

        let settings = Self {
            server: ServerConfig {
                host: get_env_or_default("SERVER_HOST", "0.0.0.0"),
                port: get_env_or_default("SERVER_PORT", "8082")
                    .parse()
                    .context("Invalid port number")?,
            },
            channel: ChannelConfig {
                channel_type,
                api_type,
                base_url: get_env_or_default("UPSTREAM_BASE_URL", "https://api.openai.com/v1"),
                api_key: std::env::var("UPSTREAM_API_KEY")
                    .context("UPSTREAM_API_KEY environment variable not set")?,
                model_mapping: parse_model_mapping(&get_env_or_default("MODEL_MAPPING", ""))?,
                forced_system_prompt: std::env::var("FORCED_SYSTEM_PROMPT").ok().filter(|s| !s.is_empty()),
                force_conversion: get_env_or_default("FORCE_CONVERSION", "false")
                    .parse()
                    .context("Invalid force conversion flag")?,
            },
            billing: BillingConfig {
                reserve_headroom: get_env_or_default("RESERVE_HEADROOM", "500")
                    .parse()
                    .context("Invalid reserve headroom")?,
                max_charge: get_env_or_default("MAX_CHARGE_PER_REQUEST", "0")
                    .parse()
                    .context("Invalid per-request charge ceiling")?,
                initial_balance: get_env_or_default("INITIAL_BALANCE", "1000000")
                    .parse()
                    .context("Invalid initial balance")?,
                capture_upstream_body: get_env_or_default("CAPTURE_UPSTREAM_BODY", "false")
                    .parse()
                    .context("Invalid body capture flag")?,
            },
            logging: LoggingConfig {
                level: get_env_or_default("RUST_LOG", "info"),
                format: get_env_or_default("LOG_FORMAT", "text"),
            },
        };

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration validity
    fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Port number cannot be 0");
        }

        if self.channel.api_key.is_empty() {
            anyhow::bail!("Upstream API key cannot be empty");
        }

        if self.channel.api_key.contains(char::is_whitespace) {
            anyhow::bail!("Upstream API key cannot contain whitespace characters");
        }

        if !self.channel.base_url.starts_with("http") {
            anyhow::bail!("Invalid upstream base URL format, should start with 'http'");
        }

        if self.billing.reserve_headroom < 0 {
            anyhow::bail!("Reserve headroom cannot be negative");
        }

        if self.billing.max_charge < 0 {
            anyhow::bail!("Per-request charge ceiling cannot be negative");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!("Invalid log format: {}", self.logging.format);
        }

        Ok(())
    }
}

/// Parse `client=upstream` pairs separated by commas
fn parse_model_mapping(raw: &str) -> Result<HashMap<String, String>> {
    let mut mapping = HashMap::new();
    for pair in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let (from, to) = pair
            .split_once('=')
            .with_context(|| format!("Invalid model mapping entry: {}", pair))?;
        mapping.insert(from.trim().to_string(), to.trim().to_string());
    }
    Ok(mapping)
}

/// Get environment variable or default value
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
