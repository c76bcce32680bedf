//! Pricing lookup
//!
//! Pure multiplier tables mapping model/channel/group to quota ratios.
//! The pipeline captures one `RatioSnapshot` per request so a pricing
//! table change can never split a single request across two prices.

use crate::models::ChannelType;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Pricing lookup interface
///
/// All multipliers are positive; `1.0` means the base quota unit per token.
pub trait Pricing: Send + Sync {
    /// Cost multiplier for a model on a channel flavor
    fn model_ratio(&self, model: &str, channel_type: ChannelType) -> f64;

    /// Discount multiplier for a principal group
    fn group_ratio(&self, group: &str) -> f64;

    /// Weight of completion tokens relative to prompt tokens
    fn completion_ratio(&self, model: &str, channel_type: ChannelType) -> f64;
}

/// Ratios pinned once per request and reused for reservation and settlement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatioSnapshot {
    pub model_ratio: f64,
    pub group_ratio: f64,
    pub completion_ratio: f64,
}

impl RatioSnapshot {
    /// Query the pricing table once; callers must not re-query mid-request
    pub fn capture(pricing: &dyn Pricing, model: &str, channel_type: ChannelType, group: &str) -> Self {
        Self {
            model_ratio: pricing.model_ratio(model, channel_type),
            group_ratio: pricing.group_ratio(group),
            completion_ratio: pricing.completion_ratio(model, channel_type),
        }
    }

    /// Combined per-prompt-token price
    pub fn combined(&self) -> f64 {
        self.model_ratio * self.group_ratio
    }
}

static DEFAULT_MODEL_RATIOS: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("gpt-4o", 2.5),
        ("gpt-4o-mini", 0.15),
        ("gpt-4", 15.0),
        ("gpt-3.5-turbo", 0.25),
        ("text-embedding-3-small", 0.01),
        ("claude-3-5-sonnet", 1.5),
        ("claude-3-haiku", 0.125),
    ])
});

/// Table-backed pricing with sensible defaults
///
/// Unknown models fall back to a flat ratio rather than failing: pricing
/// absence must not reject traffic, only misprice it visibly.
#[derive(Debug, Clone, Default)]
pub struct StaticPricing {
    model_ratios: HashMap<String, f64>,
    group_ratios: HashMap<String, f64>,
    completion_ratios: HashMap<String, f64>,
}

impl StaticPricing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model_ratio(mut self, model: impl Into<String>, ratio: f64) -> Self {
        self.model_ratios.insert(model.into(), ratio);
        self
    }

    pub fn with_group_ratio(mut self, group: impl Into<String>, ratio: f64) -> Self {
        self.group_ratios.insert(group.into(), ratio);
        self
    }

    pub fn with_completion_ratio(mut self, model: impl Into<String>, ratio: f64) -> Self {
        self.completion_ratios.insert(model.into(), ratio);
        self
    }
}

impl Pricing for StaticPricing {
    fn model_ratio(&self, model: &str, _channel_type: ChannelType) -> f64 {
        if let Some(ratio) = self.model_ratios.get(model) {
            return *ratio;
        }
        if let Some(ratio) = DEFAULT_MODEL_RATIOS.get(model) {
            return *ratio;
        }
        tracing::warn!("No model ratio configured for {}, using 1.0", model);
        1.0
    }

    fn group_ratio(&self, group: &str) -> f64 {
        self.group_ratios.get(group).copied().unwrap_or(1.0)
    }

    fn completion_ratio(&self, model: &str, _channel_type: ChannelType) -> f64 {
        self.completion_ratios.get(model).copied().unwrap_or(1.0)
    }
}
