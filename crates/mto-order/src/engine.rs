//! # Order Lifecycle Engine
//!
//! The top-level controller for production orders. It consults the
//! consultation gate to unblock entry transitions, delegates pricing
//! changes to the negotiator, and settles the escrow ledger on terminal
//! transitions. It is the only component with write access to an order's
//! `status`.
//!
//! ## Concurrency
//!
//! Orders live in a sharded map of `Arc<tokio::sync::Mutex<_>>` slots.
//! Every mutating operation locks the order, validates, performs any
//! required escrow call, and commits state + timeline + notice while
//! still holding the lock — transitions on one order are strictly
//! linearized, and a transition that needs a successful escrow call
//! cannot commit without it. Operations on different orders run fully
//! in parallel.
//!
//! Expiry sweeps acquire the same per-order lock, so a sweep and a
//! manual resolution cannot double-apply: whichever takes the lock first
//! wins and the other observes a settled record.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;

use mto_core::{AdjustmentId, ConsultationId, Money, OrderId, Timestamp, UserId};

use crate::adjustment::{AdjustmentStatus, Decision, PriceAdjustment, PriceNegotiator};
use crate::config::EngineConfig;
use crate::consultation::{Consultation, ConsultationGate, ConsultationStatus};
use crate::error::OrderError;
use crate::escrow::{EscrowHold, EscrowLedger};
use crate::notify::{NullNotifier, TransitionNotice, TransitionNotifier};
use crate::order::{OrderStatus, PartyRole, ProductionOrder, ShipmentInfo};
use crate::payment::PaymentGateway;
use crate::timeline::{EventKind, TimelineEvent, TimelineRecorder};

/// Counts of records settled by one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Consultations marked expired.
    pub consultations_expired: usize,
    /// Price adjustments marked expired.
    pub adjustments_expired: usize,
}

impl SweepReport {
    /// Total records settled in the pass.
    pub fn total(&self) -> usize {
        self.consultations_expired + self.adjustments_expired
    }
}

/// The production order lifecycle engine.
pub struct OrderEngine {
    orders: DashMap<OrderId, Arc<Mutex<ProductionOrder>>>,
    gate: ConsultationGate,
    negotiator: PriceNegotiator,
    ledger: EscrowLedger,
    timeline: TimelineRecorder,
    notifier: Arc<dyn TransitionNotifier>,
    config: EngineConfig,
}

impl OrderEngine {
    /// Create an engine with the default configuration and no notifier.
    pub fn new(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self::with_parts(gateway, Arc::new(NullNotifier), EngineConfig::default())
    }

    /// Create an engine with explicit notifier and configuration.
    pub fn with_parts(
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn TransitionNotifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            orders: DashMap::new(),
            gate: ConsultationGate::new(),
            negotiator: PriceNegotiator::new(),
            ledger: EscrowLedger::new(gateway),
            timeline: TimelineRecorder::new(),
            notifier,
            config,
        }
    }

    // ─── Lifecycle operations ────────────────────────────────────────

    /// Create an order, capturing `escrow_amount` into escrow first.
    ///
    /// # Errors
    ///
    /// [`OrderError::InvalidAmount`] for a non-positive amount;
    /// [`OrderError::Payment`] if escrow capture fails (no order record
    /// is created in that case).
    pub async fn create(
        &self,
        customer: UserId,
        provider: UserId,
        escrow_amount: Money,
        consultation_required: bool,
    ) -> Result<ProductionOrder, OrderError> {
        if !escrow_amount.is_positive() {
            return Err(OrderError::InvalidAmount {
                amount: escrow_amount,
            });
        }
        let now = Timestamp::now();
        let order = ProductionOrder::new(customer, provider, escrow_amount, consultation_required, now);

        self.ledger.hold(order.id, customer, escrow_amount).await?;

        self.timeline.record(
            order.id,
            EventKind::OrderCreated,
            format!("order created; {escrow_amount} captured into escrow"),
            json!({
                "escrow_amount": escrow_amount,
                "consultation_required": consultation_required,
            }),
            now,
        );
        self.orders
            .insert(order.id, Arc::new(Mutex::new(order.clone())));
        tracing::info!(order = %order.id, status = %order.status, "order created");
        Ok(order)
    }

    /// Move an order to the next status in the progression.
    ///
    /// Provider-driven. Entering `OrderReceived` stamps
    /// `order_received_at`; entering `Shipped` stores the supplied
    /// shipment details; entering `Completed` releases escrow before the
    /// status commits.
    ///
    /// # Errors
    ///
    /// [`OrderError::AlreadyTerminal`] from a terminal status;
    /// [`OrderError::ConsultationPending`] while the gate is
    /// unsatisfied; [`OrderError::InvalidTransition`] when shipment
    /// details accompany a non-shipping transition.
    pub async fn advance(
        &self,
        order_id: OrderId,
        actor: UserId,
        shipment: Option<ShipmentInfo>,
    ) -> Result<ProductionOrder, OrderError> {
        let slot = self.slot(order_id)?;
        let mut order = slot.lock().await;

        order.require_role(actor, PartyRole::Provider)?;
        order.require_active()?;
        if order.status == OrderStatus::PendingConsultation && !self.gate.satisfied(&order) {
            return Err(OrderError::ConsultationPending { order_id });
        }

        let from = order.status;
        let to = from.next().ok_or(OrderError::AlreadyTerminal {
            order_id,
            status: from.as_str().to_string(),
        })?;
        if shipment.is_some() && to != OrderStatus::Shipped {
            return Err(OrderError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: "shipment details only apply when entering SHIPPED".to_string(),
            });
        }

        let now = Timestamp::now();
        if to == OrderStatus::Completed {
            self.ledger.release(order_id, order.final_price, now).await?;
            order.mark_escrow_released(now);
        }
        if to == OrderStatus::OrderReceived {
            order.mark_order_received(now);
        }
        if to == OrderStatus::Shipped {
            if let Some(details) = shipment {
                order.set_shipment(details);
            }
        }

        order.transition_to(to, now);
        self.commit(
            &order,
            from,
            to,
            Some(actor),
            EventKind::OrderAdvanced,
            format!("order advanced from {from} to {to}"),
            json!({ "from": from.as_str(), "to": to.as_str() }),
            now,
        );
        Ok(order.clone())
    }

    /// Cancel an order from any non-terminal status, refunding the
    /// current final price to the customer.
    ///
    /// # Errors
    ///
    /// [`OrderError::AlreadyTerminal`] once completed or cancelled.
    pub async fn cancel(
        &self,
        order_id: OrderId,
        actor: UserId,
        reason: impl Into<String>,
    ) -> Result<ProductionOrder, OrderError> {
        let slot = self.slot(order_id)?;
        let mut order = slot.lock().await;

        order.require_party(actor)?;
        order.require_active()?;

        let now = Timestamp::now();
        // Approved adjustments are honored: refund the current price.
        self.ledger.refund(order_id, order.final_price, now).await?;

        let from = order.status;
        let reason = reason.into();
        order.transition_to(OrderStatus::Cancelled, now);
        self.commit(
            &order,
            from,
            OrderStatus::Cancelled,
            Some(actor),
            EventKind::OrderCancelled,
            format!("order cancelled: {reason}"),
            json!({ "reason": reason, "refunded": order.final_price }),
            now,
        );
        Ok(order.clone())
    }

    /// Customer acknowledgement of delivery, from `Shipped` or
    /// `ReadyForDelivery`. Releases escrow and completes the order.
    ///
    /// # Errors
    ///
    /// [`OrderError::AlreadyTerminal`] once completed or cancelled;
    /// [`OrderError::InvalidTransition`] from any other status.
    pub async fn confirm_delivery(
        &self,
        order_id: OrderId,
        actor: UserId,
    ) -> Result<ProductionOrder, OrderError> {
        let slot = self.slot(order_id)?;
        let mut order = slot.lock().await;

        order.require_role(actor, PartyRole::Customer)?;
        order.require_active()?;
        if !matches!(
            order.status,
            OrderStatus::Shipped | OrderStatus::ReadyForDelivery
        ) {
            return Err(OrderError::InvalidTransition {
                from: order.status.as_str().to_string(),
                to: OrderStatus::Completed.as_str().to_string(),
                reason: "delivery can only be confirmed from SHIPPED or READY_FOR_DELIVERY"
                    .to_string(),
            });
        }

        let now = Timestamp::now();
        self.ledger.release(order_id, order.final_price, now).await?;
        order.mark_escrow_released(now);

        let from = order.status;
        order.transition_to(OrderStatus::Completed, now);
        self.commit(
            &order,
            from,
            OrderStatus::Completed,
            Some(actor),
            EventKind::DeliveryConfirmed,
            format!("delivery confirmed; {} released to provider", order.final_price),
            json!({ "released": order.final_price }),
            now,
        );
        Ok(order.clone())
    }

    // ─── Consultation operations ─────────────────────────────────────

    /// Request a consultation for an order awaiting one.
    ///
    /// # Errors
    ///
    /// [`OrderError::InvalidState`] when the order does not require a
    /// consultation or is past the gate;
    /// [`OrderError::AlreadyActive`] while one is open.
    pub async fn request_consultation(
        &self,
        order_id: OrderId,
        actor: UserId,
        timeout_secs: Option<i64>,
    ) -> Result<Consultation, OrderError> {
        let slot = self.slot(order_id)?;
        let order = slot.lock().await;

        let role = order.require_party(actor)?;
        order.require_active()?;
        if !order.consultation_required {
            return Err(OrderError::InvalidState {
                action: "request".to_string(),
                reason: "order does not require a consultation".to_string(),
            });
        }
        if order.status != OrderStatus::PendingConsultation {
            return Err(OrderError::InvalidState {
                action: "request".to_string(),
                reason: format!("order is past the consultation gate ({})", order.status),
            });
        }

        let now = Timestamp::now();
        let timeout =
            timeout_secs.unwrap_or(self.config.default_consultation_timeout_secs);
        let consultation = self
            .gate
            .request(order_id, role, now.plus_secs(timeout), now)?;
        self.timeline.record(
            order_id,
            EventKind::ConsultationRequested,
            format!("consultation requested by {role}"),
            json!({ "consultation_id": consultation.id, "timeout_at": consultation.timeout_at }),
            now,
        );
        Ok(consultation)
    }

    /// Start a consultation session. Idempotent while in progress.
    pub async fn start_consultation(
        &self,
        consultation_id: ConsultationId,
        actor: UserId,
    ) -> Result<Consultation, OrderError> {
        let order_id = self
            .gate
            .order_of(consultation_id)
            .ok_or_else(|| OrderError::NotFound(consultation_id.to_string()))?;
        let slot = self.slot(order_id)?;
        let order = slot.lock().await;
        order.require_party(actor)?;

        let now = Timestamp::now();
        let before = self
            .gate
            .get(consultation_id)
            .ok_or_else(|| OrderError::NotFound(consultation_id.to_string()))?;
        let consultation = self.gate.start(consultation_id, now)?;
        if before.status == ConsultationStatus::Pending {
            self.timeline.record(
                order_id,
                EventKind::ConsultationStarted,
                "consultation session started",
                json!({ "consultation_id": consultation.id }),
                now,
            );
        }
        Ok(consultation)
    }

    /// Complete a consultation session, satisfying the gate.
    pub async fn complete_consultation(
        &self,
        consultation_id: ConsultationId,
        actor: UserId,
    ) -> Result<Consultation, OrderError> {
        let order_id = self
            .gate
            .order_of(consultation_id)
            .ok_or_else(|| OrderError::NotFound(consultation_id.to_string()))?;
        let slot = self.slot(order_id)?;
        let order = slot.lock().await;
        order.require_party(actor)?;

        let now = Timestamp::now();
        let consultation = self.gate.complete(consultation_id, now)?;
        self.timeline.record(
            order_id,
            EventKind::ConsultationCompleted,
            "consultation completed",
            json!({ "consultation_id": consultation.id }),
            now,
        );
        Ok(consultation)
    }

    /// Waive the consultation requirement for an order.
    ///
    /// Either party may waive unilaterally. On an order that never
    /// required a consultation this is a successful no-op. The waive is
    /// sticky: repeat calls are no-ops too.
    pub async fn waive_consultation(
        &self,
        order_id: OrderId,
        actor: UserId,
    ) -> Result<ProductionOrder, OrderError> {
        let slot = self.slot(order_id)?;
        let mut order = slot.lock().await;

        let role = order.require_party(actor)?;
        if !order.consultation_required || order.consultation_waived {
            return Ok(order.clone());
        }
        order.require_active()?;

        let now = Timestamp::now();
        order.consultation_waived = true;
        order.updated_at = now;
        let settled = self.gate.waive_active(order_id, now);

        self.timeline.record(
            order_id,
            EventKind::ConsultationWaived,
            format!("consultation waived by {role}"),
            json!({ "settled_consultation": settled.map(|c| c.id) }),
            now,
        );
        Ok(order.clone())
    }

    // ─── Price adjustment operations ─────────────────────────────────

    /// Propose a one-time price adjustment. Provider-driven.
    pub async fn propose_adjustment(
        &self,
        order_id: OrderId,
        actor: UserId,
        adjusted_price: Money,
        justification: impl Into<String>,
        response_deadline: Timestamp,
    ) -> Result<PriceAdjustment, OrderError> {
        let slot = self.slot(order_id)?;
        let order = slot.lock().await;

        order.require_role(actor, PartyRole::Provider)?;
        order.require_active()?;

        let now = Timestamp::now();
        let adjustment =
            self.negotiator
                .propose(&order, adjusted_price, justification, response_deadline, now)?;
        self.timeline.record(
            order_id,
            EventKind::AdjustmentProposed,
            format!(
                "price adjustment proposed: {} -> {}",
                adjustment.original_price, adjustment.adjusted_price
            ),
            json!({
                "adjustment_id": adjustment.id,
                "original_price": adjustment.original_price,
                "adjusted_price": adjustment.adjusted_price,
                "response_deadline": adjustment.response_deadline,
            }),
            now,
        );
        Ok(adjustment)
    }

    /// Resolve a pending adjustment. Customer-driven (the counterparty
    /// of the proposing provider).
    ///
    /// On approval, a price above the held escrow requires a successful
    /// top-up before anything commits — a failed charge leaves the
    /// adjustment pending and the order untouched.
    pub async fn resolve_adjustment(
        &self,
        adjustment_id: AdjustmentId,
        actor: UserId,
        decision: Decision,
    ) -> Result<PriceAdjustment, OrderError> {
        let order_id = self
            .negotiator
            .order_of(adjustment_id)
            .ok_or_else(|| OrderError::NotFound(adjustment_id.to_string()))?;
        let slot = self.slot(order_id)?;
        let mut order = slot.lock().await;

        order.require_role(actor, PartyRole::Customer)?;
        let adjustment = self
            .negotiator
            .get(adjustment_id)
            .ok_or_else(|| OrderError::NotFound(adjustment_id.to_string()))?;
        if adjustment.status != AdjustmentStatus::Pending {
            return Err(OrderError::AlreadyResolved { adjustment_id });
        }

        let now = Timestamp::now();
        match decision {
            Decision::Approve => {
                let position = self
                    .ledger
                    .position(order_id)
                    .ok_or(OrderError::NotHeld { order_id })?;
                if adjustment.adjusted_price > position.held {
                    let delta = adjustment
                        .adjusted_price
                        .checked_sub(position.held)
                        .ok_or(OrderError::InvalidAmount {
                            amount: adjustment.adjusted_price,
                        })?;
                    self.ledger.top_up(order_id, delta).await?;
                }
                let settled = self.negotiator.mark_approved(adjustment_id, now)?;
                order.final_price = settled.adjusted_price;
                order.price_adjustment_used = true;
                order.updated_at = now;
                self.timeline.record(
                    order_id,
                    EventKind::AdjustmentApproved,
                    format!("price adjustment approved; final price {}", order.final_price),
                    json!({ "adjustment_id": settled.id, "final_price": order.final_price }),
                    now,
                );
                Ok(settled)
            }
            Decision::Reject => {
                let settled = self.negotiator.mark_rejected(adjustment_id, now)?;
                order.price_adjustment_used = true;
                order.updated_at = now;
                self.timeline.record(
                    order_id,
                    EventKind::AdjustmentRejected,
                    "price adjustment rejected; price unchanged",
                    json!({ "adjustment_id": settled.id }),
                    now,
                );
                Ok(settled)
            }
        }
    }

    // ─── Expiry sweeps ───────────────────────────────────────────────

    /// Run one expiry pass over all orders with open deadline-bound
    /// records. Acquires each order's lock before settling anything, so
    /// it cannot race a manual resolution.
    pub async fn sweep_once(&self, now: Timestamp) -> SweepReport {
        let mut report = SweepReport::default();

        for order_id in self.gate.orders_with_active() {
            let Ok(slot) = self.slot(order_id) else {
                tracing::warn!(order = %order_id, "sweep skipped: consultation without order");
                continue;
            };
            let _order = slot.lock().await;
            if let Some(consultation) = self.gate.expire_due(order_id, now) {
                self.timeline.record(
                    order_id,
                    EventKind::ConsultationExpired,
                    "consultation expired before completion; order remains gated",
                    json!({ "consultation_id": consultation.id }),
                    now,
                );
                report.consultations_expired += 1;
            }
        }

        for order_id in self.negotiator.orders_with_pending() {
            let Ok(slot) = self.slot(order_id) else {
                tracing::warn!(order = %order_id, "sweep skipped: adjustment without order");
                continue;
            };
            let mut order = slot.lock().await;
            if let Some(adjustment) = self.negotiator.expire_due(order_id, now) {
                // Expiry consumes the single negotiation round.
                order.price_adjustment_used = true;
                order.updated_at = now;
                self.timeline.record(
                    order_id,
                    EventKind::AdjustmentExpired,
                    "price adjustment expired unresolved; price unchanged",
                    json!({ "adjustment_id": adjustment.id }),
                    now,
                );
                report.adjustments_expired += 1;
            }
        }

        if report.total() > 0 {
            tracing::info!(
                consultations = report.consultations_expired,
                adjustments = report.adjustments_expired,
                "expiry sweep settled records"
            );
        }
        report
    }

    // ─── Query surface ───────────────────────────────────────────────

    /// Snapshot of an order.
    pub async fn order(&self, order_id: OrderId) -> Option<ProductionOrder> {
        let slot = self.orders.get(&order_id).map(|entry| entry.value().clone())?;
        let order = slot.lock().await;
        Some(order.clone())
    }

    /// The order's active consultation, if any.
    pub fn active_consultation(&self, order_id: OrderId) -> Option<Consultation> {
        self.gate.active(order_id)
    }

    /// All consultation records for an order, oldest first.
    pub fn consultation_history(&self, order_id: OrderId) -> Vec<Consultation> {
        self.gate.history(order_id)
    }

    /// The order's pending price adjustment, if any.
    pub fn pending_adjustment(&self, order_id: OrderId) -> Option<PriceAdjustment> {
        self.negotiator.pending(order_id)
    }

    /// All adjustment records for an order, oldest first.
    pub fn adjustment_history(&self, order_id: OrderId) -> Vec<PriceAdjustment> {
        self.negotiator.history(order_id)
    }

    /// The most recent `limit` timeline events, newest first. Capped by
    /// the configured query limit.
    pub fn timeline(&self, order_id: OrderId, limit: usize) -> Vec<TimelineEvent> {
        self.timeline
            .recent(order_id, limit.min(self.config.timeline_query_cap))
    }

    /// The escrow position for an order.
    pub fn escrow_position(&self, order_id: OrderId) -> Option<EscrowHold> {
        self.ledger.position(order_id)
    }

    /// Whether the consultation gate is satisfied for an order.
    pub async fn consultation_satisfied(&self, order_id: OrderId) -> Result<bool, OrderError> {
        let slot = self.slot(order_id)?;
        let order = slot.lock().await;
        Ok(self.gate.satisfied(&order))
    }

    // ─── Internals ───────────────────────────────────────────────────

    fn slot(&self, order_id: OrderId) -> Result<Arc<Mutex<ProductionOrder>>, OrderError> {
        self.orders
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    fn commit(
        &self,
        order: &ProductionOrder,
        from: OrderStatus,
        to: OrderStatus,
        actor: Option<UserId>,
        kind: EventKind,
        description: String,
        metadata: serde_json::Value,
        now: Timestamp,
    ) {
        self.timeline
            .record(order.id, kind, description, metadata, now);
        self.notifier.transition(&TransitionNotice {
            order_id: order.id,
            from_status: from,
            to_status: to,
            actor,
            at: now,
        });
        tracing::info!(order = %order.id, from = %from, to = %to, "order transition");
    }
}

impl std::fmt::Debug for OrderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderEngine")
            .field("orders", &self.orders.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelNotifier;
    use crate::payment::InstantGateway;

    struct Harness {
        gateway: Arc<InstantGateway>,
        engine: OrderEngine,
        customer: UserId,
        provider: UserId,
    }

    fn harness() -> Harness {
        let gateway = Arc::new(InstantGateway::new());
        Harness {
            gateway: gateway.clone(),
            engine: OrderEngine::new(gateway),
            customer: UserId::new(),
            provider: UserId::new(),
        }
    }

    impl Harness {
        async fn create(&self, amount: i64, consultation: bool) -> ProductionOrder {
            self.engine
                .create(
                    self.customer,
                    self.provider,
                    Money::from_minor(amount),
                    consultation,
                )
                .await
                .unwrap()
        }

        /// Advance repeatedly until the order reaches `target`.
        async fn advance_to(&self, order_id: OrderId, target: OrderStatus) {
            loop {
                let order = self
                    .engine
                    .advance(order_id, self.provider, None)
                    .await
                    .unwrap();
                if order.status == target {
                    break;
                }
            }
        }
    }

    // ── Creation ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_rejects_non_positive_escrow() {
        let h = harness();
        let result = h
            .engine
            .create(h.customer, h.provider, Money::ZERO, false)
            .await;
        assert!(matches!(result, Err(OrderError::InvalidAmount { .. })));
    }

    #[tokio::test]
    async fn create_captures_escrow_and_writes_timeline() {
        let h = harness();
        let order = h.create(10_000, false).await;

        assert_eq!(order.status, OrderStatus::PendingOrderReceived);
        let position = h.engine.escrow_position(order.id).unwrap();
        assert_eq!(position.held, Money::from_minor(10_000));

        let events = h.engine.timeline(order.id, 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::OrderCreated);
    }

    #[tokio::test]
    async fn failed_capture_creates_no_order() {
        let h = harness();
        h.gateway.set_available(false);
        let result = h
            .engine
            .create(h.customer, h.provider, Money::from_minor(10_000), false)
            .await;
        assert!(matches!(result, Err(OrderError::Payment(_))));
    }

    // ── Advance ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn advance_walks_the_progression() {
        let h = harness();
        let order = h.create(10_000, false).await;

        let order = h.engine.advance(order.id, h.provider, None).await.unwrap();
        assert_eq!(order.status, OrderStatus::OrderReceived);
        assert!(order.order_received_at.is_some());

        let order = h.engine.advance(order.id, h.provider, None).await.unwrap();
        assert_eq!(order.status, OrderStatus::InProduction);
    }

    #[tokio::test]
    async fn advance_requires_the_provider() {
        let h = harness();
        let order = h.create(10_000, false).await;
        let result = h.engine.advance(order.id, h.customer, None).await;
        assert!(matches!(result, Err(OrderError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn advance_blocked_by_consultation_gate() {
        let h = harness();
        let order = h.create(10_000, true).await;
        let result = h.engine.advance(order.id, h.provider, None).await;
        assert!(matches!(result, Err(OrderError::ConsultationPending { .. })));
    }

    #[tokio::test]
    async fn shipment_details_apply_only_on_shipping() {
        let h = harness();
        let order = h.create(10_000, false).await;

        let early = h
            .engine
            .advance(
                order.id,
                h.provider,
                Some(ShipmentInfo {
                    tracking_number: "TRK-1".to_string(),
                    shipping_carrier: "FastShip".to_string(),
                }),
            )
            .await;
        assert!(matches!(early, Err(OrderError::InvalidTransition { .. })));

        h.advance_to(order.id, OrderStatus::ReadyForDelivery).await;
        let shipped = h
            .engine
            .advance(
                order.id,
                h.provider,
                Some(ShipmentInfo {
                    tracking_number: "TRK-1".to_string(),
                    shipping_carrier: "FastShip".to_string(),
                }),
            )
            .await
            .unwrap();
        assert_eq!(shipped.status, OrderStatus::Shipped);
        assert_eq!(shipped.tracking_number.as_deref(), Some("TRK-1"));
        assert_eq!(shipped.shipping_carrier.as_deref(), Some("FastShip"));
    }

    #[tokio::test]
    async fn advance_through_completed_releases_escrow() {
        let h = harness();
        let order = h.create(10_000, false).await;
        h.advance_to(order.id, OrderStatus::Completed).await;

        let order = h.engine.order(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.escrow_released_at.is_some());

        let result = h.engine.advance(order.id, h.provider, None).await;
        assert!(matches!(result, Err(OrderError::AlreadyTerminal { .. })));
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let h = harness();
        let result = h.engine.advance(OrderId::new(), h.provider, None).await;
        assert!(matches!(result, Err(OrderError::NotFound(_))));
    }

    // ── Cancel ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn cancel_refunds_current_price() {
        let h = harness();
        let order = h.create(10_000, false).await;
        h.advance_to(order.id, OrderStatus::OrderReceived).await;

        let cancelled = h
            .engine
            .cancel(order.id, h.customer, "changed my mind")
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(h.gateway.refunded(h.customer), Money::from_minor(10_000));

        let again = h.engine.cancel(order.id, h.customer, "again").await;
        assert!(matches!(again, Err(OrderError::AlreadyTerminal { .. })));
        let advance = h.engine.advance(order.id, h.provider, None).await;
        assert!(matches!(advance, Err(OrderError::AlreadyTerminal { .. })));
    }

    #[tokio::test]
    async fn cancel_rejects_strangers() {
        let h = harness();
        let order = h.create(10_000, false).await;
        let result = h.engine.cancel(order.id, UserId::new(), "nope").await;
        assert!(matches!(result, Err(OrderError::Unauthorized { .. })));
    }

    // ── Confirm delivery ─────────────────────────────────────────────

    #[tokio::test]
    async fn confirm_delivery_from_shipped() {
        let h = harness();
        let order = h.create(10_000, false).await;
        h.advance_to(order.id, OrderStatus::Shipped).await;

        let done = h
            .engine
            .confirm_delivery(order.id, h.customer)
            .await
            .unwrap();
        assert_eq!(done.status, OrderStatus::Completed);
        assert!(done.escrow_released_at.is_some());

        let again = h.engine.confirm_delivery(order.id, h.customer).await;
        assert!(matches!(again, Err(OrderError::AlreadyTerminal { .. })));
    }

    #[tokio::test]
    async fn confirm_delivery_shortcut_from_ready() {
        let h = harness();
        let order = h.create(10_000, false).await;
        h.advance_to(order.id, OrderStatus::ReadyForDelivery).await;

        let done = h
            .engine
            .confirm_delivery(order.id, h.customer)
            .await
            .unwrap();
        assert_eq!(done.status, OrderStatus::Completed);
    }

    #[tokio::test]
    async fn confirm_delivery_rejected_early() {
        let h = harness();
        let order = h.create(10_000, false).await;
        let result = h.engine.confirm_delivery(order.id, h.customer).await;
        assert!(matches!(result, Err(OrderError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn confirm_delivery_is_customer_only() {
        let h = harness();
        let order = h.create(10_000, false).await;
        h.advance_to(order.id, OrderStatus::Shipped).await;
        let result = h.engine.confirm_delivery(order.id, h.provider).await;
        assert!(matches!(result, Err(OrderError::Unauthorized { .. })));
    }

    // ── Consultation flow ────────────────────────────────────────────

    #[tokio::test]
    async fn consultation_complete_unblocks_advance() {
        let h = harness();
        let order = h.create(10_000, true).await;

        let consultation = h
            .engine
            .request_consultation(order.id, h.customer, None)
            .await
            .unwrap();
        h.engine
            .start_consultation(consultation.id, h.provider)
            .await
            .unwrap();
        h.engine
            .complete_consultation(consultation.id, h.provider)
            .await
            .unwrap();

        assert!(h.engine.consultation_satisfied(order.id).await.unwrap());
        let order = h.engine.advance(order.id, h.provider, None).await.unwrap();
        assert_eq!(order.status, OrderStatus::PendingOrderReceived);
    }

    #[tokio::test]
    async fn waive_unblocks_without_consultation() {
        let h = harness();
        let order = h.create(10_000, true).await;

        let waived = h
            .engine
            .waive_consultation(order.id, h.provider)
            .await
            .unwrap();
        assert!(waived.consultation_waived);

        let order = h.engine.advance(order.id, h.provider, None).await.unwrap();
        assert_eq!(order.status, OrderStatus::PendingOrderReceived);
    }

    #[tokio::test]
    async fn waive_on_unrequired_order_is_a_noop() {
        let h = harness();
        let order = h.create(10_000, false).await;
        let before = h.engine.order(order.id).await.unwrap();

        let after = h
            .engine
            .waive_consultation(order.id, h.customer)
            .await
            .unwrap();
        assert_eq!(after.status, before.status);
        assert!(!after.consultation_waived);
        // No timeline event for the no-op.
        assert_eq!(h.engine.timeline(order.id, 10).len(), 1);
    }

    #[tokio::test]
    async fn request_on_unrequired_order_is_invalid() {
        let h = harness();
        let order = h.create(10_000, false).await;
        let result = h
            .engine
            .request_consultation(order.id, h.customer, None)
            .await;
        assert!(matches!(result, Err(OrderError::InvalidState { .. })));
    }

    // ── Price adjustment flow ────────────────────────────────────────

    #[tokio::test]
    async fn approved_increase_tops_up_and_reprices() {
        let h = harness();
        let order = h.create(10_000, false).await;
        h.advance_to(order.id, OrderStatus::InProduction).await;

        let adjustment = h
            .engine
            .propose_adjustment(
                order.id,
                h.provider,
                Money::from_minor(12_000),
                "material cost increase",
                Timestamp::now().plus_secs(48 * 3600),
            )
            .await
            .unwrap();

        let settled = h
            .engine
            .resolve_adjustment(adjustment.id, h.customer, Decision::Approve)
            .await
            .unwrap();
        assert_eq!(settled.status, AdjustmentStatus::Approved);

        let order = h.engine.order(order.id).await.unwrap();
        assert_eq!(order.final_price, Money::from_minor(12_000));
        assert!(order.price_adjustment_used);
        // Exactly one top-up charge for the delta.
        assert_eq!(h.gateway.charge_count(h.customer), 1);
        assert_eq!(h.gateway.charged(h.customer), Money::from_minor(2_000));
        assert_eq!(
            h.engine.escrow_position(order.id).unwrap().held,
            Money::from_minor(12_000)
        );

        let second = h
            .engine
            .propose_adjustment(
                order.id,
                h.provider,
                Money::from_minor(13_000),
                "one more",
                Timestamp::now().plus_secs(3600),
            )
            .await;
        assert!(matches!(second, Err(OrderError::AlreadyUsed { .. })));
    }

    #[tokio::test]
    async fn approved_decrease_needs_no_top_up() {
        let h = harness();
        let order = h.create(10_000, false).await;
        h.advance_to(order.id, OrderStatus::InProduction).await;

        let adjustment = h
            .engine
            .propose_adjustment(
                order.id,
                h.provider,
                Money::from_minor(8_000),
                "smaller scope",
                Timestamp::now().plus_secs(3600),
            )
            .await
            .unwrap();
        h.engine
            .resolve_adjustment(adjustment.id, h.customer, Decision::Approve)
            .await
            .unwrap();

        let order = h.engine.order(order.id).await.unwrap();
        assert_eq!(order.final_price, Money::from_minor(8_000));
        assert_eq!(h.gateway.charge_count(h.customer), 0);
    }

    #[tokio::test]
    async fn failed_top_up_leaves_adjustment_pending() {
        let h = harness();
        let order = h.create(10_000, false).await;
        h.advance_to(order.id, OrderStatus::InProduction).await;

        let adjustment = h
            .engine
            .propose_adjustment(
                order.id,
                h.provider,
                Money::from_minor(12_000),
                "material cost increase",
                Timestamp::now().plus_secs(3600),
            )
            .await
            .unwrap();

        h.gateway.set_available(false);
        let result = h
            .engine
            .resolve_adjustment(adjustment.id, h.customer, Decision::Approve)
            .await;
        assert!(matches!(result, Err(OrderError::TopUpFailed { .. })));

        // Nothing committed: still pending, price unchanged, retryable.
        let pending = h.engine.pending_adjustment(order.id).unwrap();
        assert_eq!(pending.id, adjustment.id);
        let order_snapshot = h.engine.order(order.id).await.unwrap();
        assert_eq!(order_snapshot.final_price, Money::from_minor(10_000));
        assert!(!order_snapshot.price_adjustment_used);

        h.gateway.set_available(true);
        let settled = h
            .engine
            .resolve_adjustment(adjustment.id, h.customer, Decision::Approve)
            .await
            .unwrap();
        assert_eq!(settled.status, AdjustmentStatus::Approved);
    }

    #[tokio::test]
    async fn reject_keeps_price_and_consumes_round() {
        let h = harness();
        let order = h.create(10_000, false).await;
        h.advance_to(order.id, OrderStatus::InProduction).await;

        let adjustment = h
            .engine
            .propose_adjustment(
                order.id,
                h.provider,
                Money::from_minor(12_000),
                "material cost increase",
                Timestamp::now().plus_secs(3600),
            )
            .await
            .unwrap();
        h.engine
            .resolve_adjustment(adjustment.id, h.customer, Decision::Reject)
            .await
            .unwrap();

        let order = h.engine.order(order.id).await.unwrap();
        assert_eq!(order.final_price, Money::from_minor(10_000));
        assert!(order.price_adjustment_used);

        let again = h
            .engine
            .resolve_adjustment(adjustment.id, h.customer, Decision::Approve)
            .await;
        assert!(matches!(again, Err(OrderError::AlreadyResolved { .. })));
    }

    #[tokio::test]
    async fn resolve_is_counterparty_only() {
        let h = harness();
        let order = h.create(10_000, false).await;
        h.advance_to(order.id, OrderStatus::InProduction).await;

        let adjustment = h
            .engine
            .propose_adjustment(
                order.id,
                h.provider,
                Money::from_minor(12_000),
                "material cost increase",
                Timestamp::now().plus_secs(3600),
            )
            .await
            .unwrap();
        let result = h
            .engine
            .resolve_adjustment(adjustment.id, h.provider, Decision::Approve)
            .await;
        assert!(matches!(result, Err(OrderError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn propose_is_provider_only() {
        let h = harness();
        let order = h.create(10_000, false).await;
        let result = h
            .engine
            .propose_adjustment(
                order.id,
                h.customer,
                Money::from_minor(12_000),
                "why not",
                Timestamp::now().plus_secs(3600),
            )
            .await;
        assert!(matches!(result, Err(OrderError::Unauthorized { .. })));
    }

    // ── Cancellation honors approved adjustments ─────────────────────

    #[tokio::test]
    async fn cancel_after_approved_increase_refunds_new_price() {
        let h = harness();
        let order = h.create(10_000, false).await;
        h.advance_to(order.id, OrderStatus::InProduction).await;

        let adjustment = h
            .engine
            .propose_adjustment(
                order.id,
                h.provider,
                Money::from_minor(12_000),
                "material cost increase",
                Timestamp::now().plus_secs(3600),
            )
            .await
            .unwrap();
        h.engine
            .resolve_adjustment(adjustment.id, h.customer, Decision::Approve)
            .await
            .unwrap();

        h.engine
            .cancel(order.id, h.customer, "cancelled after reprice")
            .await
            .unwrap();
        assert_eq!(h.gateway.refunded(h.customer), Money::from_minor(12_000));
    }

    // ── Notifications ────────────────────────────────────────────────

    #[tokio::test]
    async fn notices_are_emitted_per_transition() {
        let gateway = Arc::new(InstantGateway::new());
        let (notifier, mut rx) = ChannelNotifier::new();
        let engine = OrderEngine::with_parts(
            gateway,
            Arc::new(notifier),
            EngineConfig::default(),
        );
        let customer = UserId::new();
        let provider = UserId::new();

        let order = engine
            .create(customer, provider, Money::from_minor(10_000), false)
            .await
            .unwrap();
        engine.advance(order.id, provider, None).await.unwrap();

        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.order_id, order.id);
        assert_eq!(notice.from_status, OrderStatus::PendingOrderReceived);
        assert_eq!(notice.to_status, OrderStatus::OrderReceived);
        assert_eq!(notice.actor, Some(provider));
        // Creation is not a transition; exactly one notice so far.
        assert!(rx.try_recv().is_err());
    }

    // ── Timeline ordering ────────────────────────────────────────────

    #[tokio::test]
    async fn timeline_matches_operation_order() {
        let h = harness();
        let order = h.create(10_000, true).await;
        h.engine
            .waive_consultation(order.id, h.customer)
            .await
            .unwrap();
        h.engine.advance(order.id, h.provider, None).await.unwrap();

        let events: Vec<EventKind> = h
            .engine
            .timeline(order.id, 10)
            .into_iter()
            .rev()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            events,
            vec![
                EventKind::OrderCreated,
                EventKind::ConsultationWaived,
                EventKind::OrderAdvanced,
            ]
        );
    }
}
