//! # mto-api — Axum API Service
//!
//! The HTTP surface for the MTO order lifecycle engine, built on
//! Axum/Tower/Tokio.
//!
//! ## Routes
//!
//! - `/v1/orders/*` — order lifecycle (create, advance, cancel, confirm
//!   delivery) and read-only projections (order, timeline)
//! - `/v1/orders/{id}/consultations/*`, `/v1/consultations/*` —
//!   consultation gate operations
//! - `/v1/orders/{id}/adjustments/*`, `/v1/adjustments/*` — price
//!   adjustment negotiation
//! - `/health/live` — liveness probe (unauthenticated)
//!
//! ## Crate Policy
//!
//! - No business logic in route handlers — everything delegates to
//!   `mto-order`.
//! - All errors map to structured HTTP responses via [`AppError`].

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::AppError;
pub use state::AppState;

use axum::Router;
use tower_http::trace::TraceLayer;

/// Assemble the application router.
pub fn app(state: AppState) -> Router {
    routes::router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
