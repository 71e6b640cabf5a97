//! # Domain Identity Newtypes
//!
//! Newtype wrappers for all domain identifiers in the MTO Stack.
//! These prevent accidental identifier confusion — you cannot pass an
//! `OrderId` where a `ConsultationId` is expected.
//!
//! `UserId` is shared by customers and providers: both are opaque foreign
//! keys into the same external identity system, and an acting user must be
//! comparable against either role on an order.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a production order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(Uuid);

/// Unique identifier for a consultation attached to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsultationId(Uuid);

/// Unique identifier for a price adjustment proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdjustmentId(Uuid);

/// Unique identifier for a timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

/// Identifier for a platform user (customer or provider).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

macro_rules! impl_id {
    ($name:ident, $prefix:literal) => {
        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create an identifier from an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the inner UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

impl_id!(OrderId, "order");
impl_id!(ConsultationId, "consultation");
impl_id!(AdjustmentId, "adjustment");
impl_id!(EventId, "event");
impl_id!(UserId, "user");
