//! # mto-api server binary
//!
//! Wires the order engine to the Axum router, starts the background
//! expiry sweeper, and serves HTTP.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use mto_api::{app, ApiConfig, AppState};
use mto_order::{sweep, InstantGateway, OrderEngine, RetryingGateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ApiConfig::from_env()?;
    tracing::info!(bind = %config.bind_addr, "starting mto-api");

    // The stub gateway ships as the default backend; a production
    // deployment substitutes its processor client behind the same trait.
    let gateway = Arc::new(RetryingGateway::new(InstantGateway::new()));
    let engine = Arc::new(OrderEngine::new(gateway));

    let sweeper = sweep::spawn(
        engine.clone(),
        Duration::from_secs(config.sweep_interval_secs),
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    axum::serve(listener, app(AppState::new(engine)))
        .await
        .context("server error")?;

    sweeper.abort();
    Ok(())
}
