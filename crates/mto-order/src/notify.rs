//! # Transition Notices
//!
//! On every successful lifecycle transition the engine emits a
//! [`TransitionNotice`] for an external notifier to translate into
//! user-facing messages. Delivery and formatting are out of scope here;
//! notices are emitted after the transition commits and a slow or failing
//! notifier can never fail or reorder a transition.

use serde::{Deserialize, Serialize};

use mto_core::{OrderId, Timestamp, UserId};

use crate::order::OrderStatus;

/// A committed lifecycle transition, as seen by the notification
/// collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionNotice {
    /// The order that transitioned.
    pub order_id: OrderId,
    /// Status before the transition.
    pub from_status: OrderStatus,
    /// Status after the transition.
    pub to_status: OrderStatus,
    /// The user whose action caused the transition, when one did
    /// (expiry sweeps act without a user).
    pub actor: Option<UserId>,
    /// When the transition committed.
    pub at: Timestamp,
}

/// The notification collaborator boundary.
pub trait TransitionNotifier: Send + Sync {
    /// Observe a committed transition. Must not block.
    fn transition(&self, notice: &TransitionNotice);
}

/// Notifier that drops every notice. Default wiring.
#[derive(Debug, Default)]
pub struct NullNotifier;

impl TransitionNotifier for NullNotifier {
    fn transition(&self, _notice: &TransitionNotice) {}
}

/// Notifier that forwards notices into an unbounded channel. Test and
/// integration wiring.
#[derive(Debug)]
pub struct ChannelNotifier {
    tx: tokio::sync::mpsc::UnboundedSender<TransitionNotice>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiving half of its channel.
    pub fn new() -> (
        Self,
        tokio::sync::mpsc::UnboundedReceiver<TransitionNotice>,
    ) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TransitionNotifier for ChannelNotifier {
    fn transition(&self, notice: &TransitionNotice) {
        // A dropped receiver means nobody is listening; that is fine.
        let _ = self.tx.send(notice.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_notifier_forwards_notices() {
        let (notifier, mut rx) = ChannelNotifier::new();
        let notice = TransitionNotice {
            order_id: OrderId::new(),
            from_status: OrderStatus::Shipped,
            to_status: OrderStatus::Completed,
            actor: Some(UserId::new()),
            at: Timestamp::now(),
        };
        notifier.transition(&notice);
        assert_eq!(rx.try_recv().unwrap(), notice);
    }

    #[test]
    fn channel_notifier_survives_dropped_receiver() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        notifier.transition(&TransitionNotice {
            order_id: OrderId::new(),
            from_status: OrderStatus::InProduction,
            to_status: OrderStatus::PendingApproval,
            actor: None,
            at: Timestamp::now(),
        });
    }
}
