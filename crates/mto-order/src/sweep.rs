//! # Background Expiry Sweeper
//!
//! Consultation timeouts and adjustment deadlines are settled by a
//! periodic job rather than on the read path. The job shares the
//! engine's per-order locking discipline, so it cannot race an in-flight
//! manual resolution — whichever takes the lock first wins.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use mto_core::Timestamp;

use crate::engine::OrderEngine;

/// Spawn the periodic expiry sweep.
///
/// Runs until the returned handle is aborted. Each tick runs one
/// [`OrderEngine::sweep_once`] pass at the current wall-clock time; a
/// pass that settles nothing is silent.
pub fn spawn(engine: Arc<OrderEngine>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a freshly started
        // service does not sweep before callers finish wiring up.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = engine.sweep_once(Timestamp::now()).await;
            tracing::debug!(
                consultations = report.consultations_expired,
                adjustments = report.adjustments_expired,
                "expiry sweep pass complete"
            );
        }
    })
}
