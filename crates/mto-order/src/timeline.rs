//! # Timeline Recorder
//!
//! Append-only event log keyed by order. Every component writes to it;
//! nothing reads it for control flow — it exists for auditing and
//! customer support.
//!
//! Events are ordered by `created_at` with a global insertion sequence
//! breaking same-second ties.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use mto_core::{EventId, OrderId, Timestamp};

// ─── Event Kind ──────────────────────────────────────────────────────

/// The kind of a timeline event, with a canonical dotted string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Order created and escrow captured.
    OrderCreated,
    /// Order moved forward along the progression.
    OrderAdvanced,
    /// Order cancelled and escrow refunded.
    OrderCancelled,
    /// Customer confirmed delivery; escrow released.
    DeliveryConfirmed,
    /// Consultation requested by a party.
    ConsultationRequested,
    /// Consultation session started.
    ConsultationStarted,
    /// Consultation completed; the gate is satisfied.
    ConsultationCompleted,
    /// Consultation waived by a party.
    ConsultationWaived,
    /// Consultation timed out without completing.
    ConsultationExpired,
    /// Price adjustment proposed by the provider.
    AdjustmentProposed,
    /// Price adjustment approved by the customer.
    AdjustmentApproved,
    /// Price adjustment rejected by the customer.
    AdjustmentRejected,
    /// Price adjustment deadline passed unresolved.
    AdjustmentExpired,
}

impl EventKind {
    /// The canonical dotted identifier (e.g. `order.advanced`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderCreated => "order.created",
            Self::OrderAdvanced => "order.advanced",
            Self::OrderCancelled => "order.cancelled",
            Self::DeliveryConfirmed => "order.delivery_confirmed",
            Self::ConsultationRequested => "consultation.requested",
            Self::ConsultationStarted => "consultation.started",
            Self::ConsultationCompleted => "consultation.completed",
            Self::ConsultationWaived => "consultation.waived",
            Self::ConsultationExpired => "consultation.expired",
            Self::AdjustmentProposed => "adjustment.proposed",
            Self::AdjustmentApproved => "adjustment.approved",
            Self::AdjustmentRejected => "adjustment.rejected",
            Self::AdjustmentExpired => "adjustment.expired",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Timeline Event ──────────────────────────────────────────────────

/// A single immutable audit record of a state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Unique event identifier.
    pub id: EventId,
    /// The order this event belongs to.
    pub order_id: OrderId,
    /// What happened.
    pub kind: EventKind,
    /// Human-readable description for support and display.
    pub description: String,
    /// When the event was recorded (UTC).
    pub created_at: Timestamp,
    /// Global insertion sequence; breaks same-second ordering ties.
    pub seq: u64,
    /// Opaque key/value bag for display; never drives control flow.
    pub metadata: serde_json::Value,
}

// ─── Recorder ────────────────────────────────────────────────────────

/// Append-only in-memory timeline store keyed by order.
///
/// Appends happen inside the engine's per-order critical section, so the
/// per-order event order matches the linearized operation order.
pub struct TimelineRecorder {
    events: DashMap<OrderId, Vec<TimelineEvent>>,
    seq: AtomicU64,
}

impl TimelineRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Append an event. Events are never mutated or deleted afterwards.
    pub fn record(
        &self,
        order_id: OrderId,
        kind: EventKind,
        description: impl Into<String>,
        metadata: serde_json::Value,
        now: Timestamp,
    ) -> TimelineEvent {
        let event = TimelineEvent {
            id: EventId::new(),
            order_id,
            kind,
            description: description.into(),
            created_at: now,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            metadata,
        };
        self.events.entry(order_id).or_default().push(event.clone());
        event
    }

    /// The most recent `limit` events for an order, newest first.
    pub fn recent(&self, order_id: OrderId, limit: usize) -> Vec<TimelineEvent> {
        self.events
            .get(&order_id)
            .map(|entry| entry.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// All events for an order in insertion order.
    pub fn all(&self, order_id: OrderId) -> Vec<TimelineEvent> {
        self.events
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

impl Default for TimelineRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TimelineRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineRecorder")
            .field("orders", &self.events.len())
            .finish()
    }
}
