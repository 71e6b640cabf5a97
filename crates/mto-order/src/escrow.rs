//! # Escrow Ledger
//!
//! Holds the captured amount for each order, grows it on approved price
//! increases, and settles it exactly once — released to the provider on
//! completion or refunded to the customer on cancellation.
//!
//! Every operation calls the payment collaborator **before** touching
//! local state: a failed external call leaves the ledger unchanged and
//! the operation safe to retry. The engine invokes these methods inside
//! the per-order critical section, so ledger and order state cannot
//! diverge.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use mto_core::{Money, OrderId, Timestamp, UserId};

use crate::error::OrderError;
use crate::payment::{HoldToken, PaymentGateway};

// ─── Hold Record ─────────────────────────────────────────────────────

/// The escrow position for one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowHold {
    /// The order the funds are held for.
    pub order_id: OrderId,
    /// The customer whose instrument was charged.
    pub customer: UserId,
    /// Processor token for the authorization hold.
    pub hold_token: HoldToken,
    /// Currently held amount (capture plus any top-ups).
    pub held: Money,
    /// When the hold was released to the provider, if it was.
    pub released_at: Option<Timestamp>,
    /// When the hold was refunded to the customer, if it was.
    pub refunded_at: Option<Timestamp>,
}

impl EscrowHold {
    /// Whether the hold has already been released or refunded.
    pub fn is_settled(&self) -> bool {
        self.released_at.is_some() || self.refunded_at.is_some()
    }
}

// ─── Ledger ──────────────────────────────────────────────────────────

/// Escrow positions keyed by order, backed by the payment collaborator.
pub struct EscrowLedger {
    holds: DashMap<OrderId, EscrowHold>,
    gateway: Arc<dyn PaymentGateway>,
}

impl EscrowLedger {
    /// Create a ledger backed by the given gateway.
    pub fn new(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            holds: DashMap::new(),
            gateway,
        }
    }

    /// Capture `amount` into escrow for a new order.
    ///
    /// Authorizes and captures through the gateway, then records the
    /// hold.
    ///
    /// # Errors
    ///
    /// [`OrderError::DuplicateHold`] if a hold already exists for the
    /// order; [`OrderError::Payment`] if the gateway refuses.
    pub async fn hold(
        &self,
        order_id: OrderId,
        customer: UserId,
        amount: Money,
    ) -> Result<EscrowHold, OrderError> {
        if self.holds.contains_key(&order_id) {
            return Err(OrderError::DuplicateHold { order_id });
        }
        let token = self.gateway.authorize(customer, amount).await?;
        self.gateway.capture(&token, amount).await?;

        let hold = EscrowHold {
            order_id,
            customer,
            hold_token: token,
            held: amount,
            released_at: None,
            refunded_at: None,
        };
        // A concurrent duplicate create is excluded by the engine's
        // per-order serialization; entry() keeps the first hold anyway.
        self.holds.entry(order_id).or_insert_with(|| hold.clone());
        tracing::info!(order = %order_id, amount = %amount, "escrow captured");
        Ok(hold)
    }

    /// Increase the held amount by `delta`, charging the customer's
    /// instrument first.
    ///
    /// # Errors
    ///
    /// [`OrderError::NotHeld`] without a hold;
    /// [`OrderError::AlreadyReleased`] after settlement;
    /// [`OrderError::TopUpFailed`] if the additional charge fails.
    pub async fn top_up(&self, order_id: OrderId, delta: Money) -> Result<EscrowHold, OrderError> {
        let customer = {
            let hold = self
                .holds
                .get(&order_id)
                .ok_or(OrderError::NotHeld { order_id })?;
            if hold.is_settled() {
                return Err(OrderError::AlreadyReleased { order_id });
            }
            hold.customer
        };

        self.gateway
            .charge_additional(customer, delta)
            .await
            .map_err(|source| OrderError::TopUpFailed { order_id, source })?;

        let mut hold = self
            .holds
            .get_mut(&order_id)
            .ok_or(OrderError::NotHeld { order_id })?;
        hold.held = hold
            .held
            .checked_add(delta)
            .ok_or(OrderError::InvalidAmount { amount: delta })?;
        tracing::info!(order = %order_id, delta = %delta, held = %hold.held, "escrow topped up");
        Ok(hold.clone())
    }

    /// Release `amount` (the order's final price) to the provider payout
    /// path and stamp `released_at`.
    ///
    /// # Errors
    ///
    /// [`OrderError::NotHeld`] without a hold;
    /// [`OrderError::AlreadyReleased`] on a second settlement.
    pub async fn release(
        &self,
        order_id: OrderId,
        amount: Money,
        now: Timestamp,
    ) -> Result<Money, OrderError> {
        {
            let hold = self
                .holds
                .get(&order_id)
                .ok_or(OrderError::NotHeld { order_id })?;
            if hold.is_settled() {
                return Err(OrderError::AlreadyReleased { order_id });
            }
        }
        // The provider payout is the capture already performed; release
        // is a local settlement of the position.
        let mut hold = self
            .holds
            .get_mut(&order_id)
            .ok_or(OrderError::NotHeld { order_id })?;
        hold.released_at = Some(now);
        tracing::info!(order = %order_id, amount = %amount, "escrow released");
        Ok(amount)
    }

    /// Refund `amount` to the customer and stamp `refunded_at`.
    ///
    /// # Errors
    ///
    /// [`OrderError::NotHeld`] without a hold;
    /// [`OrderError::AlreadyReleased`] after a release or prior refund;
    /// [`OrderError::Payment`] if the gateway refuses.
    pub async fn refund(
        &self,
        order_id: OrderId,
        amount: Money,
        now: Timestamp,
    ) -> Result<(), OrderError> {
        let token = {
            let hold = self
                .holds
                .get(&order_id)
                .ok_or(OrderError::NotHeld { order_id })?;
            if hold.is_settled() {
                return Err(OrderError::AlreadyReleased { order_id });
            }
            hold.hold_token.clone()
        };

        self.gateway.refund(&token, amount).await?;

        let mut hold = self
            .holds
            .get_mut(&order_id)
            .ok_or(OrderError::NotHeld { order_id })?;
        hold.refunded_at = Some(now);
        tracing::info!(order = %order_id, amount = %amount, "escrow refunded");
        Ok(())
    }

    /// The escrow position for an order, if one exists.
    pub fn position(&self, order_id: OrderId) -> Option<EscrowHold> {
        self.holds.get(&order_id).map(|entry| entry.value().clone())
    }
}

impl std::fmt::Debug for EscrowLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscrowLedger")
            .field("holds", &self.holds.len())
            .finish()
    }
}
