//! # mto-order — Production Order Lifecycle Engine
//!
//! Governs made-to-order service transactions from initial consultation
//! through escrow release:
//!
//! - **Order** ([`order`]): The production order record and its
//!   nine-status lifecycle machine.
//!
//! - **Consultation** ([`consultation`]): The consultation gate that
//!   blocks early progression until a session completes or a party
//!   waives it.
//!
//! - **Adjustment** ([`adjustment`]): The single-use price renegotiation
//!   sub-protocol (propose / approve / reject / expire).
//!
//! - **Escrow** ([`escrow`]): The escrow ledger holding the captured
//!   amount and settling it exactly once.
//!
//! - **Payment** ([`payment`]): The external payment processor boundary,
//!   with a stub backend and a retrying decorator.
//!
//! - **Timeline** ([`timeline`]): Append-only audit log of every state
//!   change; read for support and display, never for control flow.
//!
//! - **Engine** ([`engine`]): The lifecycle controller tying the parts
//!   together under a per-order single-writer discipline.
//!
//! - **Sweep** ([`sweep`]): The periodic job settling consultation
//!   timeouts and adjustment deadlines.

pub mod adjustment;
pub mod config;
pub mod consultation;
pub mod engine;
pub mod error;
pub mod escrow;
pub mod notify;
pub mod order;
pub mod payment;
pub mod sweep;
pub mod timeline;

// Re-export primary types for ergonomic imports.

// Errors
pub use error::OrderError;

// Order lifecycle
pub use order::{OrderStatus, PartyRole, ProductionOrder, ShipmentInfo};

// Consultation gate
pub use consultation::{Consultation, ConsultationGate, ConsultationStatus};

// Price negotiation
pub use adjustment::{
    AdjustmentKind, AdjustmentStatus, Decision, PriceAdjustment, PriceNegotiator,
};

// Escrow and payments
pub use escrow::{EscrowHold, EscrowLedger};
pub use payment::{HoldToken, InstantGateway, PaymentError, PaymentGateway, RetryingGateway};

// Timeline
pub use timeline::{EventKind, TimelineEvent, TimelineRecorder};

// Notifications
pub use notify::{ChannelNotifier, NullNotifier, TransitionNotice, TransitionNotifier};

// Engine
pub use config::EngineConfig;
pub use engine::{OrderEngine, SweepReport};
