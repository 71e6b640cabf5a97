//! # Route Modules
//!
//! Each module defines an Axum router for one API surface area; they are
//! merged into the application router here.

use axum::routing::get;
use axum::Router;

use crate::AppState;

pub mod adjustments;
pub mod consultations;
pub mod orders;

/// Assemble all surface-area routers plus the health probe.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health/live", get(|| async { "ok" }))
        .merge(orders::router())
        .merge(consultations::router())
        .merge(adjustments::router())
}
