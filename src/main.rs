//! Quotagate Server
//!
//! Gateway exposing the canonical completion API and relaying each call
//! through the quota-reserving translation pipeline

use anyhow::{Context, Result};
use tracing::info;

mod adaptors;
mod billing;
mod config;
mod handlers;
mod middleware;
mod models;
mod services;
mod utils;

use config::Settings;
use handlers::create_router;
use utils::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let settings = Settings::new().context("Failed to load settings")?;
    info!("Settings loaded");

    let app = create_router(settings.clone()).await?;

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Quotagate server started");
    info!("Health check: http://{}/health", addr);
    info!("Relay endpoint: http://{}/v1/chat/completions", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start server: {}", e))?;

    Ok(())
}
