//! # API Configuration
//!
//! Environment-driven settings for the server binary. Everything has a
//! sensible default so a bare `mto-api` starts locally.

use std::env;

use anyhow::Context;

/// Server configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Socket address to bind (`MTO_BIND`, default `127.0.0.1:8080`).
    pub bind_addr: String,
    /// Expiry sweep interval in seconds (`MTO_SWEEP_INTERVAL_SECS`,
    /// default 60).
    pub sweep_interval_secs: u64,
}

impl ApiConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr =
            env::var("MTO_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let sweep_interval_secs = match env::var("MTO_SWEEP_INTERVAL_SECS") {
            Ok(raw) => raw
                .parse::<u64>()
                .context("invalid MTO_SWEEP_INTERVAL_SECS")?,
            Err(_) => 60,
        };
        Ok(Self {
            bind_addr,
            sweep_interval_secs,
        })
    }
}
