//! # Price Adjustment Negotiator
//!
//! The single-use propose/approve/reject/expire sub-protocol that may
//! revise an order's final price.
//!
//! A provider proposes at most one adjustment round per order; the
//! customer resolves it, or the deadline sweep expires it. Expiry behaves
//! like an implicit rejection — a stale price proposal must not hold up
//! delivery. (The consultation gate deliberately takes the opposite
//! timeout policy.)

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use mto_core::{AdjustmentId, Money, OrderId, Timestamp};

use crate::error::OrderError;
use crate::order::ProductionOrder;

// ─── Adjustment Status ───────────────────────────────────────────────

/// The status of a price adjustment proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdjustmentStatus {
    /// Awaiting the customer's decision.
    Pending,
    /// Customer approved; the order's final price changed (terminal).
    Approved,
    /// Customer rejected; price unchanged (terminal).
    Rejected,
    /// Deadline passed unresolved; price unchanged (terminal).
    Expired,
}

impl AdjustmentStatus {
    /// The canonical string name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for AdjustmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a price adjustment, derived from the sign of the
/// difference at proposal time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdjustmentKind {
    /// Adjusted price exceeds the original.
    Increase,
    /// Adjusted price is below the original.
    Decrease,
}

/// A customer's decision on a pending adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Accept the new price.
    Approve,
    /// Keep the original price.
    Reject,
}

// ─── Price Adjustment ────────────────────────────────────────────────

/// A single-use price renegotiation proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAdjustment {
    /// Unique adjustment identifier.
    pub id: AdjustmentId,
    /// The order whose price is being renegotiated.
    pub order_id: OrderId,
    /// The order's final price at proposal time.
    pub original_price: Money,
    /// The proposed replacement price.
    pub adjusted_price: Money,
    /// Increase or decrease, derived at proposal time.
    pub kind: AdjustmentKind,
    /// Required free-text rationale from the provider.
    pub justification: String,
    /// Current status.
    pub status: AdjustmentStatus,
    /// When the proposal was made.
    pub proposed_at: Timestamp,
    /// Deadline for the customer's decision.
    pub response_deadline: Timestamp,
    /// When the proposal reached a terminal status.
    pub resolved_at: Option<Timestamp>,
}

impl PriceAdjustment {
    /// The magnitude of the proposed change. Always computed, never
    /// stored as an independent mutable field.
    pub fn adjustment_amount(&self) -> Money {
        self.adjusted_price.abs_diff(self.original_price)
    }
}

// ─── Negotiator ──────────────────────────────────────────────────────

/// Owns all price adjustment records, keyed by order.
///
/// Mutating operations run only while the engine holds the order's lock.
/// The escrow top-up that backs an approved increase is orchestrated by
/// the engine before [`PriceNegotiator::mark_approved`] is called.
pub struct PriceNegotiator {
    by_order: DashMap<OrderId, Vec<PriceAdjustment>>,
    index: DashMap<AdjustmentId, OrderId>,
}

impl PriceNegotiator {
    /// Create an empty negotiator.
    pub fn new() -> Self {
        Self {
            by_order: DashMap::new(),
            index: DashMap::new(),
        }
    }

    /// Validate and record a new proposal against the order's state.
    ///
    /// # Errors
    ///
    /// In guard order: [`OrderError::AlreadyUsed`] once any adjustment
    /// has resolved for the order, [`OrderError::AlreadyPending`] while
    /// one is open, [`OrderError::InvalidJustification`] for a blank
    /// justification, [`OrderError::InvalidAmount`] for a non-positive
    /// price, [`OrderError::NoOpAdjustment`] when nothing would change.
    pub fn propose(
        &self,
        order: &ProductionOrder,
        adjusted_price: Money,
        justification: impl Into<String>,
        response_deadline: Timestamp,
        now: Timestamp,
    ) -> Result<PriceAdjustment, OrderError> {
        if order.price_adjustment_used {
            return Err(OrderError::AlreadyUsed { order_id: order.id });
        }
        if self.pending(order.id).is_some() {
            return Err(OrderError::AlreadyPending { order_id: order.id });
        }
        let justification = justification.into();
        if justification.trim().is_empty() {
            return Err(OrderError::InvalidJustification);
        }
        if !adjusted_price.is_positive() {
            return Err(OrderError::InvalidAmount {
                amount: adjusted_price,
            });
        }
        let original_price = order.final_price;
        let kind = if adjusted_price > original_price {
            AdjustmentKind::Increase
        } else if adjusted_price < original_price {
            AdjustmentKind::Decrease
        } else {
            return Err(OrderError::NoOpAdjustment);
        };

        let adjustment = PriceAdjustment {
            id: AdjustmentId::new(),
            order_id: order.id,
            original_price,
            adjusted_price,
            kind,
            justification,
            status: AdjustmentStatus::Pending,
            proposed_at: now,
            response_deadline,
            resolved_at: None,
        };
        self.index.insert(adjustment.id, order.id);
        self.by_order
            .entry(order.id)
            .or_default()
            .push(adjustment.clone());
        Ok(adjustment)
    }

    /// Settle a pending adjustment as approved.
    ///
    /// # Errors
    ///
    /// [`OrderError::AlreadyResolved`] unless the adjustment is pending.
    pub fn mark_approved(
        &self,
        adjustment_id: AdjustmentId,
        now: Timestamp,
    ) -> Result<PriceAdjustment, OrderError> {
        self.settle(adjustment_id, AdjustmentStatus::Approved, now)
    }

    /// Settle a pending adjustment as rejected.
    ///
    /// # Errors
    ///
    /// [`OrderError::AlreadyResolved`] unless the adjustment is pending.
    pub fn mark_rejected(
        &self,
        adjustment_id: AdjustmentId,
        now: Timestamp,
    ) -> Result<PriceAdjustment, OrderError> {
        self.settle(adjustment_id, AdjustmentStatus::Rejected, now)
    }

    /// Expire the order's pending adjustment if its deadline has passed.
    pub fn expire_due(&self, order_id: OrderId, now: Timestamp) -> Option<PriceAdjustment> {
        let due = self
            .pending(order_id)
            .map(|a| a.response_deadline <= now)
            .unwrap_or(false);
        if !due {
            return None;
        }
        let mut entry = self.by_order.get_mut(&order_id)?;
        let adjustment = entry
            .iter_mut()
            .find(|a| a.status == AdjustmentStatus::Pending)?;
        adjustment.status = AdjustmentStatus::Expired;
        adjustment.resolved_at = Some(now);
        Some(adjustment.clone())
    }

    /// The order's pending adjustment, if any.
    pub fn pending(&self, order_id: OrderId) -> Option<PriceAdjustment> {
        self.by_order.get(&order_id).and_then(|entry| {
            entry
                .iter()
                .find(|a| a.status == AdjustmentStatus::Pending)
                .cloned()
        })
    }

    /// Look up an adjustment by id.
    pub fn get(&self, adjustment_id: AdjustmentId) -> Option<PriceAdjustment> {
        let order_id = self.order_of(adjustment_id)?;
        self.by_order.get(&order_id).and_then(|entry| {
            entry.iter().find(|a| a.id == adjustment_id).cloned()
        })
    }

    /// All adjustment records for an order, oldest first.
    pub fn history(&self, order_id: OrderId) -> Vec<PriceAdjustment> {
        self.by_order
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// The order an adjustment belongs to.
    pub fn order_of(&self, adjustment_id: AdjustmentId) -> Option<OrderId> {
        self.index.get(&adjustment_id).map(|entry| *entry.value())
    }

    /// Orders that currently have a pending adjustment. Sweep input.
    pub fn orders_with_pending(&self) -> Vec<OrderId> {
        self.by_order
            .iter()
            .filter(|entry| {
                entry
                    .iter()
                    .any(|a| a.status == AdjustmentStatus::Pending)
            })
            .map(|entry| *entry.key())
            .collect()
    }

    fn settle(
        &self,
        adjustment_id: AdjustmentId,
        to: AdjustmentStatus,
        now: Timestamp,
    ) -> Result<PriceAdjustment, OrderError> {
        let order_id = self
            .order_of(adjustment_id)
            .ok_or_else(|| OrderError::NotFound(adjustment_id.to_string()))?;
        let mut entry = self
            .by_order
            .get_mut(&order_id)
            .ok_or_else(|| OrderError::NotFound(adjustment_id.to_string()))?;
        let adjustment = entry
            .iter_mut()
            .find(|a| a.id == adjustment_id)
            .ok_or_else(|| OrderError::NotFound(adjustment_id.to_string()))?;
        if adjustment.status != AdjustmentStatus::Pending {
            return Err(OrderError::AlreadyResolved { adjustment_id });
        }
        adjustment.status = to;
        adjustment.resolved_at = Some(now);
        Ok(adjustment.clone())
    }
}

impl Default for PriceNegotiator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PriceNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceNegotiator")
            .field("orders", &self.by_order.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mto_core::UserId;

    fn make_order() -> ProductionOrder {
        ProductionOrder::new(
            UserId::new(),
            UserId::new(),
            Money::from_minor(10_000),
            false,
            Timestamp::now(),
        )
    }

    fn propose(
        negotiator: &PriceNegotiator,
        order: &ProductionOrder,
        price: i64,
    ) -> Result<PriceAdjustment, OrderError> {
        let now = Timestamp::now();
        negotiator.propose(
            order,
            Money::from_minor(price),
            "material cost increase",
            now.plus_secs(48 * 3600),
            now,
        )
    }

    // ── Propose guards ───────────────────────────────────────────────

    #[test]
    fn propose_derives_increase() {
        let negotiator = PriceNegotiator::new();
        let order = make_order();
        let a = propose(&negotiator, &order, 12_000).unwrap();
        assert_eq!(a.kind, AdjustmentKind::Increase);
        assert_eq!(a.original_price, Money::from_minor(10_000));
        assert_eq!(a.adjustment_amount(), Money::from_minor(2_000));
        assert_eq!(a.status, AdjustmentStatus::Pending);
    }

    #[test]
    fn propose_derives_decrease() {
        let negotiator = PriceNegotiator::new();
        let order = make_order();
        let a = propose(&negotiator, &order, 8_000).unwrap();
        assert_eq!(a.kind, AdjustmentKind::Decrease);
        assert_eq!(a.adjustment_amount(), Money::from_minor(2_000));
    }

    #[test]
    fn equal_price_is_a_noop() {
        let negotiator = PriceNegotiator::new();
        let order = make_order();
        assert!(matches!(
            propose(&negotiator, &order, 10_000),
            Err(OrderError::NoOpAdjustment)
        ));
    }

    #[test]
    fn blank_justification_is_rejected() {
        let negotiator = PriceNegotiator::new();
        let order = make_order();
        let now = Timestamp::now();
        let result = negotiator.propose(
            &order,
            Money::from_minor(12_000),
            "   ",
            now.plus_secs(3600),
            now,
        );
        assert!(matches!(result, Err(OrderError::InvalidJustification)));
    }

    #[test]
    fn non_positive_price_is_rejected() {
        let negotiator = PriceNegotiator::new();
        let order = make_order();
        assert!(matches!(
            propose(&negotiator, &order, 0),
            Err(OrderError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn second_propose_while_pending_fails() {
        let negotiator = PriceNegotiator::new();
        let order = make_order();
        propose(&negotiator, &order, 12_000).unwrap();
        assert!(matches!(
            propose(&negotiator, &order, 11_000),
            Err(OrderError::AlreadyPending { .. })
        ));
    }

    #[test]
    fn propose_after_round_used_fails() {
        let negotiator = PriceNegotiator::new();
        let mut order = make_order();
        order.price_adjustment_used = true;
        assert!(matches!(
            propose(&negotiator, &order, 12_000),
            Err(OrderError::AlreadyUsed { .. })
        ));
    }

    // ── Resolution ───────────────────────────────────────────────────

    #[test]
    fn approve_settles_once() {
        let negotiator = PriceNegotiator::new();
        let order = make_order();
        let a = propose(&negotiator, &order, 12_000).unwrap();
        let now = Timestamp::now();

        let approved = negotiator.mark_approved(a.id, now).unwrap();
        assert_eq!(approved.status, AdjustmentStatus::Approved);
        assert!(approved.resolved_at.is_some());
        assert!(negotiator.pending(order.id).is_none());

        assert!(matches!(
            negotiator.mark_approved(a.id, now),
            Err(OrderError::AlreadyResolved { .. })
        ));
        assert!(matches!(
            negotiator.mark_rejected(a.id, now),
            Err(OrderError::AlreadyResolved { .. })
        ));
    }

    #[test]
    fn reject_settles_once() {
        let negotiator = PriceNegotiator::new();
        let order = make_order();
        let a = propose(&negotiator, &order, 12_000).unwrap();
        let rejected = negotiator.mark_rejected(a.id, Timestamp::now()).unwrap();
        assert_eq!(rejected.status, AdjustmentStatus::Rejected);
    }

    #[test]
    fn unknown_adjustment_is_not_found() {
        let negotiator = PriceNegotiator::new();
        assert!(matches!(
            negotiator.mark_approved(AdjustmentId::new(), Timestamp::now()),
            Err(OrderError::NotFound(_))
        ));
    }

    // ── Expiry ───────────────────────────────────────────────────────

    #[test]
    fn expire_due_respects_deadline() {
        let negotiator = PriceNegotiator::new();
        let order = make_order();
        let now = Timestamp::now();
        negotiator
            .propose(
                &order,
                Money::from_minor(12_000),
                "rush surcharge",
                now.plus_secs(600),
                now,
            )
            .unwrap();

        assert!(negotiator.expire_due(order.id, now.plus_secs(599)).is_none());
        let expired = negotiator.expire_due(order.id, now.plus_secs(600)).unwrap();
        assert_eq!(expired.status, AdjustmentStatus::Expired);
        assert!(negotiator.pending(order.id).is_none());
    }

    #[test]
    fn expired_adjustment_cannot_be_resolved() {
        let negotiator = PriceNegotiator::new();
        let order = make_order();
        let now = Timestamp::now();
        let a = negotiator
            .propose(
                &order,
                Money::from_minor(12_000),
                "rush surcharge",
                now.plus_secs(600),
                now,
            )
            .unwrap();
        negotiator.expire_due(order.id, now.plus_secs(600)).unwrap();
        assert!(matches!(
            negotiator.mark_approved(a.id, now.plus_secs(601)),
            Err(OrderError::AlreadyResolved { .. })
        ));
    }

    #[test]
    fn orders_with_pending_lists_open_rounds() {
        let negotiator = PriceNegotiator::new();
        let order = make_order();
        let other = make_order();
        propose(&negotiator, &order, 12_000).unwrap();
        let b = propose(&negotiator, &other, 9_000).unwrap();
        negotiator.mark_rejected(b.id, Timestamp::now()).unwrap();

        assert_eq!(negotiator.orders_with_pending(), vec![order.id]);
    }
}
