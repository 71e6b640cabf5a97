//! # Consultation Gate
//!
//! Tracks whether a consultation has been requested, started, completed,
//! or waived for an order, and blocks order progression until satisfied.
//!
//! ## Statuses
//!
//! ```text
//! Pending ──start()──▶ InProgress ──complete()──▶ Completed (terminal)
//!    │                     │
//!    │                     ├──waive──▶ Waived (terminal)
//!    ├──waive──▶ Waived    │
//!    └──timeout──▶ Expired └──timeout──▶ Expired (terminal)
//! ```
//!
//! At most one active (non-terminal) consultation exists per order;
//! historical records are retained for audit. An expired consultation
//! does **not** satisfy the gate — the order stays blocked until a party
//! waives or a fresh consultation is requested and completed. There is no
//! silent unblock on timeout.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use mto_core::{ConsultationId, OrderId, Timestamp};

use crate::error::OrderError;
use crate::order::{PartyRole, ProductionOrder};

// ─── Consultation Status ─────────────────────────────────────────────

/// The lifecycle status of a consultation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsultationStatus {
    /// Requested; waiting for a session to start.
    Pending,
    /// Session underway.
    InProgress,
    /// Session finished; the gate is satisfied (terminal).
    Completed,
    /// A party waived the consultation (terminal).
    Waived,
    /// Timed out before completing (terminal). Does not satisfy the gate.
    Expired,
}

impl ConsultationStatus {
    /// The canonical string name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Waived => "WAIVED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Waived | Self::Expired)
    }
}

impl std::fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Consultation ────────────────────────────────────────────────────

/// A consultation record attached to an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consultation {
    /// Unique consultation identifier.
    pub id: ConsultationId,
    /// The order this consultation gates.
    pub order_id: OrderId,
    /// Current status.
    pub status: ConsultationStatus,
    /// Which party requested it.
    pub requested_by: PartyRole,
    /// When it was requested.
    pub requested_at: Timestamp,
    /// When the session started.
    pub started_at: Option<Timestamp>,
    /// When the session completed.
    pub completed_at: Option<Timestamp>,
    /// When it was waived.
    pub waived_at: Option<Timestamp>,
    /// Deadline after which the sweep expires it.
    pub timeout_at: Timestamp,
}

// ─── Gate ────────────────────────────────────────────────────────────

/// Owns all consultation records, keyed by order.
///
/// Mutating operations run only while the engine holds the order's lock;
/// the maps themselves are sharded for parallel cross-order access.
pub struct ConsultationGate {
    by_order: DashMap<OrderId, Vec<Consultation>>,
    index: DashMap<ConsultationId, OrderId>,
}

impl ConsultationGate {
    /// Create an empty gate.
    pub fn new() -> Self {
        Self {
            by_order: DashMap::new(),
            index: DashMap::new(),
        }
    }

    /// Request a consultation for an order.
    ///
    /// # Errors
    ///
    /// [`OrderError::AlreadyActive`] if a non-terminal consultation
    /// already exists for the order.
    pub fn request(
        &self,
        order_id: OrderId,
        requested_by: PartyRole,
        timeout_at: Timestamp,
        now: Timestamp,
    ) -> Result<Consultation, OrderError> {
        if self.active(order_id).is_some() {
            return Err(OrderError::AlreadyActive { order_id });
        }
        let consultation = Consultation {
            id: ConsultationId::new(),
            order_id,
            status: ConsultationStatus::Pending,
            requested_by,
            requested_at: now,
            started_at: None,
            completed_at: None,
            waived_at: None,
            timeout_at,
        };
        self.index.insert(consultation.id, order_id);
        self.by_order
            .entry(order_id)
            .or_default()
            .push(consultation.clone());
        Ok(consultation)
    }

    /// Start a consultation session: Pending → InProgress.
    ///
    /// Idempotent when already InProgress — re-entry from a dropped
    /// session must not error.
    ///
    /// # Errors
    ///
    /// [`OrderError::InvalidState`] from any terminal status.
    pub fn start(
        &self,
        consultation_id: ConsultationId,
        now: Timestamp,
    ) -> Result<Consultation, OrderError> {
        self.update(consultation_id, |c| match c.status {
            ConsultationStatus::Pending => {
                c.status = ConsultationStatus::InProgress;
                c.started_at = Some(now);
                Ok(())
            }
            ConsultationStatus::InProgress => Ok(()),
            _ => Err(invalid_state(c, "start")),
        })
    }

    /// Complete a consultation session: InProgress → Completed.
    ///
    /// # Errors
    ///
    /// [`OrderError::InvalidState`] unless the session is InProgress.
    pub fn complete(
        &self,
        consultation_id: ConsultationId,
        now: Timestamp,
    ) -> Result<Consultation, OrderError> {
        self.update(consultation_id, |c| match c.status {
            ConsultationStatus::InProgress => {
                c.status = ConsultationStatus::Completed;
                c.completed_at = Some(now);
                Ok(())
            }
            _ => Err(invalid_state(c, "complete")),
        })
    }

    /// Mark the order's active consultation (if any) as waived.
    ///
    /// The sticky `consultation_waived` flag on the order itself is the
    /// engine's responsibility; this only settles the record.
    pub fn waive_active(&self, order_id: OrderId, now: Timestamp) -> Option<Consultation> {
        self.update_active(order_id, |c| {
            c.status = ConsultationStatus::Waived;
            c.waived_at = Some(now);
        })
    }

    /// Expire the order's active consultation if its deadline has passed.
    pub fn expire_due(&self, order_id: OrderId, now: Timestamp) -> Option<Consultation> {
        let due = self
            .active(order_id)
            .map(|c| c.timeout_at <= now)
            .unwrap_or(false);
        if !due {
            return None;
        }
        self.update_active(order_id, |c| {
            c.status = ConsultationStatus::Expired;
        })
    }

    /// Look up a consultation by id.
    pub fn get(&self, consultation_id: ConsultationId) -> Option<Consultation> {
        let order_id = self.order_of(consultation_id)?;
        self.by_order.get(&order_id).and_then(|entry| {
            entry.iter().find(|c| c.id == consultation_id).cloned()
        })
    }

    /// The order's active (non-terminal) consultation, if any.
    pub fn active(&self, order_id: OrderId) -> Option<Consultation> {
        self.by_order.get(&order_id).and_then(|entry| {
            entry
                .iter()
                .find(|c| !c.status.is_terminal())
                .cloned()
        })
    }

    /// All consultation records for an order, oldest first.
    pub fn history(&self, order_id: OrderId) -> Vec<Consultation> {
        self.by_order
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// The order a consultation belongs to.
    pub fn order_of(&self, consultation_id: ConsultationId) -> Option<OrderId> {
        self.index.get(&consultation_id).map(|entry| *entry.value())
    }

    /// Orders that currently have an active consultation. Sweep input.
    pub fn orders_with_active(&self) -> Vec<OrderId> {
        self.by_order
            .iter()
            .filter(|entry| entry.iter().any(|c| !c.status.is_terminal()))
            .map(|entry| *entry.key())
            .collect()
    }

    /// The gate-satisfaction predicate.
    ///
    /// Satisfied when no consultation is required, when one was waived,
    /// or when a completed consultation exists for the order.
    pub fn satisfied(&self, order: &ProductionOrder) -> bool {
        if !order.consultation_required || order.consultation_waived {
            return true;
        }
        self.by_order
            .get(&order.id)
            .map(|entry| {
                entry
                    .iter()
                    .any(|c| c.status == ConsultationStatus::Completed)
            })
            .unwrap_or(false)
    }

    fn update(
        &self,
        consultation_id: ConsultationId,
        apply: impl FnOnce(&mut Consultation) -> Result<(), OrderError>,
    ) -> Result<Consultation, OrderError> {
        let order_id = self
            .order_of(consultation_id)
            .ok_or_else(|| OrderError::NotFound(consultation_id.to_string()))?;
        let mut entry = self
            .by_order
            .get_mut(&order_id)
            .ok_or_else(|| OrderError::NotFound(consultation_id.to_string()))?;
        let consultation = entry
            .iter_mut()
            .find(|c| c.id == consultation_id)
            .ok_or_else(|| OrderError::NotFound(consultation_id.to_string()))?;
        apply(consultation)?;
        Ok(consultation.clone())
    }

    fn update_active(
        &self,
        order_id: OrderId,
        apply: impl FnOnce(&mut Consultation),
    ) -> Option<Consultation> {
        let mut entry = self.by_order.get_mut(&order_id)?;
        let consultation = entry.iter_mut().find(|c| !c.status.is_terminal())?;
        apply(consultation);
        Some(consultation.clone())
    }
}

impl Default for ConsultationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConsultationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsultationGate")
            .field("orders", &self.by_order.len())
            .finish()
    }
}

fn invalid_state(c: &Consultation, action: &str) -> OrderError {
    OrderError::InvalidState {
        action: action.to_string(),
        reason: format!("consultation {} is {}", c.id, c.status),
    }
}
