//! # Application State
//!
//! Shared state for the Axum application. Cheaply cloneable — all clones
//! share the same engine.

use std::sync::Arc;

use mto_order::OrderEngine;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// The order lifecycle engine.
    pub engine: Arc<OrderEngine>,
}

impl AppState {
    /// Wrap an engine for the router.
    pub fn new(engine: Arc<OrderEngine>) -> Self {
        Self { engine }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
