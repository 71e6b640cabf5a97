//! # Money — Fixed-Point Minor Units
//!
//! Monetary amounts as signed 64-bit integers of minor units (cents,
//! paisa, fils — the platform is currency-agnostic and the unit is fixed
//! per deployment).
//!
//! ## Security Invariant
//!
//! Financial amounts must never be represented as floating-point numbers.
//! All arithmetic is checked; overflow surfaces as `None` at the call site
//! rather than wrapping silently.

use serde::{Deserialize, Serialize};

/// A monetary amount in integer minor units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero amount.
    pub const ZERO: Money = Money(0);

    /// Create an amount from minor units.
    pub const fn from_minor(units: i64) -> Self {
        Self(units)
    }

    /// The raw minor-unit count.
    pub const fn minor_units(&self) -> i64 {
        self.0
    }

    /// Whether the amount is strictly positive.
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checked addition.
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Checked subtraction.
    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// Absolute difference between two amounts.
    ///
    /// Saturates at `i64::MAX`; amounts anywhere near that range are not
    /// representable order values in the first place.
    pub fn abs_diff(self, other: Money) -> Money {
        Money(self.0.abs_diff(other.0).min(i64::MAX as u64) as i64)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
