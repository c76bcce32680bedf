//! HTTP handlers module
//!
//! Contains all HTTP endpoint handling logic

pub mod health;
pub mod relay;

use crate::adaptors::AdaptorRegistry;
use crate::billing::{
    spawn_settlement_worker, HeuristicEstimator, InMemoryLedger, SettlementConfig, StaticPricing,
};
use crate::config::Settings;
use crate::services::{RelayOptions, RelayPipeline};
use anyhow::{Context, Result};
use axum::{middleware as axum_middleware, routing::get, routing::post, Router};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

const UPSTREAM_TIMEOUT_SECS: u64 = 300;

/// Application state
pub struct AppState {
    pub settings: Settings,
    pub pipeline: RelayPipeline,
}

/// Create application router with the full collaborator wiring
pub async fn create_router(settings: Settings) -> Result<Router> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")?;

    let ledger = Arc::new(InMemoryLedger::with_initial_balance(settings.billing.initial_balance));
    let pricing = Arc::new(StaticPricing::new());
    let estimator = Arc::new(HeuristicEstimator::new());
    let adaptors = Arc::new(AdaptorRegistry::standard(client));

    let settlement = spawn_settlement_worker(
        ledger.clone(),
        SettlementConfig {
            max_charge: match settings.billing.max_charge {
                0 => None,
                ceiling => Some(ceiling),
            },
            ..SettlementConfig::default()
        },
    );

    let pipeline = RelayPipeline::new(
        pricing,
        ledger,
        estimator,
        adaptors,
        settlement,
        RelayOptions {
            reserve_headroom: settings.billing.reserve_headroom,
            capture_upstream_body: settings.billing.capture_upstream_body,
        },
    );

    let app_state = Arc::new(AppState {
        settings: settings.clone(),
        pipeline,
    });

    let middleware_stack = ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    let router = Router::new()
        .route("/v1/chat/completions", post(relay::chat_completions))
        .route("/v1/completions", post(relay::completions))
        .route("/v1/embeddings", post(relay::embeddings))
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness_check))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            crate::middleware::auth::auth_middleware,
        ))
        .with_state(app_state)
        .layer(middleware_stack);

    Ok(router)
}
