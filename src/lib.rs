//! Quotagate Library
//!
//! Quota-reserving relay pipeline translating a canonical completion API
//! to heterogeneous upstream backends

pub mod adaptors;
pub mod billing;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

// Re-export common types
pub use adaptors::{Adaptor, AdaptorRegistry};
pub use billing::{InMemoryLedger, Pricing, QuotaLedger, StaticPricing};
pub use config::Settings;
pub use handlers::{create_router, AppState};
pub use models::{GatewayRequest, RelayMode, RequestMeta, Usage};
pub use services::{RelayOptions, RelayPipeline, RelayedResponse};
pub use utils::error::{RelayError, RelayResult};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
