//! # Production Order — Record and Status Machine
//!
//! Models a made-to-order service transaction from escrow capture through
//! delivery confirmation.
//!
//! ## Status Progression
//!
//! ```text
//! PendingConsultation ──▶ PendingOrderReceived ──▶ OrderReceived
//!        ──▶ InProduction ──▶ PendingApproval ──▶ ReadyForDelivery
//!        ──▶ Shipped ──▶ Completed
//!
//! Cancelled is reachable from every non-terminal status.
//! ConfirmDelivery is the sole shortcut: ReadyForDelivery ──▶ Completed.
//! ```
//!
//! ## Design Choice: Validated Enum over Typestate
//!
//! The status is a runtime-checked enum rather than a typestate. Two
//! factors drive this:
//!
//! 1. **Cancellation from any non-terminal status.** Typestate would
//!    duplicate `cancel()` across seven `impl` blocks with identical
//!    logic but different source state types.
//!
//! 2. **Serialization frequency.** Orders are stored and projected to
//!    clients where the status is not known at compile time; a validated
//!    enum serializes directly via serde.
//!
//! The engine is the only writer of `status`; every mutation goes through
//! its transition API under the per-order lock.

use serde::{Deserialize, Serialize};

use mto_core::{Money, OrderId, Timestamp, UserId};

use crate::error::OrderError;

// ─── Order Status ────────────────────────────────────────────────────

/// The lifecycle status of a production order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Blocked on the consultation gate.
    PendingConsultation,
    /// Waiting for the provider to acknowledge the order.
    PendingOrderReceived,
    /// Provider has acknowledged; `order_received_at` is stamped here.
    OrderReceived,
    /// Work is underway.
    InProduction,
    /// Finished work is awaiting the customer's sign-off.
    PendingApproval,
    /// Approved and ready to hand over or ship.
    ReadyForDelivery,
    /// In transit; tracking fields may be populated.
    Shipped,
    /// Delivery confirmed and escrow released (terminal).
    Completed,
    /// Cancelled and escrow refunded (terminal).
    Cancelled,
}

impl OrderStatus {
    /// The canonical string name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingConsultation => "PENDING_CONSULTATION",
            Self::PendingOrderReceived => "PENDING_ORDER_RECEIVED",
            Self::OrderReceived => "ORDER_RECEIVED",
            Self::InProduction => "IN_PRODUCTION",
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::ReadyForDelivery => "READY_FOR_DELIVERY",
            Self::Shipped => "SHIPPED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether this status is terminal (no further transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// The next status in the forward progression, if any.
    pub fn next(&self) -> Option<OrderStatus> {
        match self {
            Self::PendingConsultation => Some(Self::PendingOrderReceived),
            Self::PendingOrderReceived => Some(Self::OrderReceived),
            Self::OrderReceived => Some(Self::InProduction),
            Self::InProduction => Some(Self::PendingApproval),
            Self::PendingApproval => Some(Self::ReadyForDelivery),
            Self::ReadyForDelivery => Some(Self::Shipped),
            Self::Shipped => Some(Self::Completed),
            Self::Completed | Self::Cancelled => None,
        }
    }

    /// Approximate percent-complete for display purposes only.
    ///
    /// Never consulted for control logic.
    pub fn percent_complete(&self) -> u8 {
        match self {
            Self::PendingConsultation => 10,
            Self::PendingOrderReceived => 20,
            Self::OrderReceived => 40,
            Self::InProduction => 60,
            Self::PendingApproval => 70,
            Self::ReadyForDelivery => 85,
            Self::Shipped => 90,
            Self::Completed => 100,
            Self::Cancelled => 0,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Parties ─────────────────────────────────────────────────────────

/// Which side of the order a user is acting as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartyRole {
    /// The paying party.
    Customer,
    /// The party performing the work.
    Provider,
}

impl std::fmt::Display for PartyRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Customer => "CUSTOMER",
            Self::Provider => "PROVIDER",
        })
    }
}

// ─── Shipment ────────────────────────────────────────────────────────

/// Shipment details supplied by the shipping collaborator when an order
/// enters `Shipped`. Stored and surfaced as-is; never polled or validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentInfo {
    /// Carrier tracking number.
    pub tracking_number: String,
    /// Carrier name.
    pub shipping_carrier: String,
}

// ─── Production Order ────────────────────────────────────────────────

/// A made-to-order service transaction with escrowed payment.
///
/// Created only after escrow capture succeeds; mutated only through the
/// engine's transition API; never hard-deleted — cancellation is a
/// terminal status, not a deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionOrder {
    /// Unique order identifier.
    pub id: OrderId,
    /// The paying customer.
    pub customer: UserId,
    /// The provider performing the work.
    pub provider: UserId,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// Amount captured into escrow at creation. Immutable.
    pub escrow_amount: Money,
    /// The price that will settle on completion. Starts equal to
    /// `escrow_amount`; changes at most once via an approved adjustment.
    pub final_price: Money,
    /// Whether a consultation gates early progression.
    pub consultation_required: bool,
    /// Sticky unblock flag set by either party waiving the consultation.
    pub consultation_waived: bool,
    /// True once any price adjustment reached a terminal status.
    pub price_adjustment_used: bool,
    /// When the provider acknowledged the order. Set once.
    pub order_received_at: Option<Timestamp>,
    /// When escrow was released to the provider. Set once; non-`None`
    /// exactly when `status == Completed`.
    pub escrow_released_at: Option<Timestamp>,
    /// Carrier tracking number, once shipped.
    pub tracking_number: Option<String>,
    /// Carrier name, once shipped.
    pub shipping_carrier: Option<String>,
    /// When the order was created.
    pub created_at: Timestamp,
    /// When the order last changed.
    pub updated_at: Timestamp,
}

impl ProductionOrder {
    /// Create a new order record. Escrow must already be captured; the
    /// engine enforces that ordering.
    pub(crate) fn new(
        customer: UserId,
        provider: UserId,
        escrow_amount: Money,
        consultation_required: bool,
        now: Timestamp,
    ) -> Self {
        let status = if consultation_required {
            OrderStatus::PendingConsultation
        } else {
            OrderStatus::PendingOrderReceived
        };
        Self {
            id: OrderId::new(),
            customer,
            provider,
            status,
            escrow_amount,
            final_price: escrow_amount,
            consultation_required,
            consultation_waived: false,
            price_adjustment_used: false,
            order_received_at: None,
            escrow_released_at: None,
            tracking_number: None,
            shipping_carrier: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The role `user` plays on this order, if any.
    pub fn role_of(&self, user: UserId) -> Option<PartyRole> {
        if user == self.customer {
            Some(PartyRole::Customer)
        } else if user == self.provider {
            Some(PartyRole::Provider)
        } else {
            None
        }
    }

    /// Reject actors who are not a party to this order.
    pub(crate) fn require_party(&self, actor: UserId) -> Result<PartyRole, OrderError> {
        self.role_of(actor).ok_or(OrderError::Unauthorized {
            actor,
            order_id: self.id,
        })
    }

    /// Reject actors other than the given role.
    pub(crate) fn require_role(&self, actor: UserId, role: PartyRole) -> Result<(), OrderError> {
        if self.require_party(actor)? == role {
            Ok(())
        } else {
            Err(OrderError::Unauthorized {
                actor,
                order_id: self.id,
            })
        }
    }

    /// Reject any operation on a terminal order.
    pub(crate) fn require_active(&self) -> Result<(), OrderError> {
        if self.status.is_terminal() {
            return Err(OrderError::AlreadyTerminal {
                order_id: self.id,
                status: self.status.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Commit a status change. Callers have already validated the move.
    pub(crate) fn transition_to(&mut self, to: OrderStatus, now: Timestamp) {
        self.status = to;
        self.updated_at = now;
    }

    /// Stamp `order_received_at`, preserving an earlier value.
    pub(crate) fn mark_order_received(&mut self, now: Timestamp) {
        if self.order_received_at.is_none() {
            self.order_received_at = Some(now);
        }
    }

    /// Stamp `escrow_released_at`, preserving an earlier value.
    pub(crate) fn mark_escrow_released(&mut self, now: Timestamp) {
        if self.escrow_released_at.is_none() {
            self.escrow_released_at = Some(now);
        }
    }

    /// Store shipment details supplied at the `Shipped` transition.
    pub(crate) fn set_shipment(&mut self, shipment: ShipmentInfo) {
        self.tracking_number = Some(shipment.tracking_number);
        self.shipping_carrier = Some(shipment.shipping_carrier);
    }
}
