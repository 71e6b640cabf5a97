//! # Error Types — Engine Error Taxonomy
//!
//! Every rejected operation returns a specific error kind, never a generic
//! failure, so callers can distinguish "you can't do this yet"
//! ([`OrderError::ConsultationPending`]) from "this was already done"
//! ([`OrderError::AlreadyResolved`]) from "the system couldn't charge you"
//! ([`OrderError::TopUpFailed`]).
//!
//! All validation and invariant checks run synchronously inside the
//! per-order lock and reject before any state mutation — a returned error
//! means nothing changed.

use thiserror::Error;

use mto_core::{AdjustmentId, Money, OrderId, UserId};

use crate::payment::PaymentError;

/// Errors returned by the order lifecycle engine.
#[derive(Error, Debug)]
pub enum OrderError {
    /// Attempted transition is not valid from the current status.
    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        /// Current status name.
        from: String,
        /// Attempted target status name.
        to: String,
        /// Reason the transition was rejected.
        reason: String,
    },

    /// The consultation gate is not satisfied.
    #[error("order {order_id} is awaiting consultation")]
    ConsultationPending {
        /// The blocked order.
        order_id: OrderId,
    },

    /// An active (non-terminal) consultation already exists for the order.
    #[error("order {order_id} already has an active consultation")]
    AlreadyActive {
        /// The order with the active consultation.
        order_id: OrderId,
    },

    /// A pending price adjustment already exists for the order.
    #[error("order {order_id} already has a pending price adjustment")]
    AlreadyPending {
        /// The order with the pending adjustment.
        order_id: OrderId,
    },

    /// The order's single price negotiation round has been used.
    #[error("order {order_id} has already used its price adjustment")]
    AlreadyUsed {
        /// The order whose negotiation round is spent.
        order_id: OrderId,
    },

    /// The adjustment has already reached a terminal status.
    #[error("price adjustment {adjustment_id} is already resolved")]
    AlreadyResolved {
        /// The resolved adjustment.
        adjustment_id: AdjustmentId,
    },

    /// The order is in a terminal status.
    #[error("order {order_id} is in terminal status {status}")]
    AlreadyTerminal {
        /// The terminal order.
        order_id: OrderId,
        /// The terminal status name.
        status: String,
    },

    /// The escrow for this order was already released or refunded.
    #[error("escrow for order {order_id} was already settled")]
    AlreadyReleased {
        /// The order whose escrow is settled.
        order_id: OrderId,
    },

    /// A hold already exists for this order.
    #[error("escrow hold already exists for order {order_id}")]
    DuplicateHold {
        /// The order with the existing hold.
        order_id: OrderId,
    },

    /// A monetary amount failed validation.
    #[error("invalid amount: {amount}")]
    InvalidAmount {
        /// The rejected amount, in minor units.
        amount: Money,
    },

    /// The proposed price equals the current price.
    #[error("adjusted price equals the current price; nothing to negotiate")]
    NoOpAdjustment,

    /// The adjustment justification is empty.
    #[error("price adjustment justification must not be empty")]
    InvalidJustification,

    /// A consultation operation does not apply in the current state.
    #[error("consultation action {action} rejected: {reason}")]
    InvalidState {
        /// The operation that was attempted.
        action: String,
        /// Why it does not apply.
        reason: String,
    },

    /// The additional charge backing a price increase failed.
    #[error("escrow top-up failed for order {order_id}: {source}")]
    TopUpFailed {
        /// The order whose top-up failed.
        order_id: OrderId,
        /// The underlying gateway failure.
        source: PaymentError,
    },

    /// No escrow hold exists for the order.
    #[error("no escrow hold exists for order {order_id}")]
    NotHeld {
        /// The order without a hold.
        order_id: OrderId,
    },

    /// The actor is not a party to the order, or not the correct
    /// counterparty for the attempted action.
    #[error("user {actor} is not authorized to act on order {order_id}")]
    Unauthorized {
        /// The rejected actor.
        actor: UserId,
        /// The order the actor attempted to act on.
        order_id: OrderId,
    },

    /// The referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A recoverable payment-collaborator failure outside the top-up path.
    /// The operation made no local state changes and is safe to retry.
    #[error("payment gateway error: {0}")]
    Payment(#[from] PaymentError),
}
