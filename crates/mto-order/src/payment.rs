//! # Payment Collaborator Boundary
//!
//! The escrow ledger never touches a payment instrument directly; it
//! calls out through [`PaymentGateway`]. Failures are recoverable — the
//! ledger makes no local state change until the external call succeeds,
//! so the same operation is always safe to retry.
//!
//! Two implementations ship with the engine:
//!
//! - [`InstantGateway`] — in-memory stub that approves everything and
//!   records charges. Test and demo backend; can be flipped to decline.
//! - [`RetryingGateway`] — decorator adding bounded exponential backoff
//!   on transient failures. Declines are returned immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use mto_core::{Money, UserId};

// ─── Errors ──────────────────────────────────────────────────────────

/// Failures from the external payment processor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// The instrument refused the charge. Not retryable.
    #[error("payment declined: {0}")]
    Declined(String),

    /// The processor could not be reached or timed out. Retryable.
    #[error("payment processor unavailable: {0}")]
    Unavailable(String),
}

impl PaymentError {
    /// Whether retrying the same call can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

// ─── Hold Token ──────────────────────────────────────────────────────

/// Opaque token referencing an authorization hold at the processor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HoldToken(String);

impl HoldToken {
    /// Wrap a processor-issued token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ─── Gateway Trait ───────────────────────────────────────────────────

/// The payment processor interface consumed by the escrow ledger.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Place an authorization hold on the customer's instrument.
    async fn authorize(&self, customer: UserId, amount: Money) -> Result<HoldToken, PaymentError>;

    /// Capture a previously authorized hold.
    async fn capture(&self, token: &HoldToken, amount: Money) -> Result<(), PaymentError>;

    /// Charge an additional amount against the customer's instrument.
    async fn charge_additional(&self, customer: UserId, amount: Money)
        -> Result<(), PaymentError>;

    /// Return funds to the customer.
    async fn refund(&self, token: &HoldToken, amount: Money) -> Result<(), PaymentError>;
}

// ─── Instant Gateway (stub) ──────────────────────────────────────────

/// In-memory gateway that approves every call and records the charges it
/// sees, keyed by customer.
///
/// Flip [`InstantGateway::set_available`] to `false` to exercise
/// transient-failure paths.
pub struct InstantGateway {
    holds: DashMap<String, UserId>,
    charges: DashMap<UserId, Vec<Money>>,
    refunds: DashMap<UserId, Vec<Money>>,
    available: AtomicBool,
}

impl InstantGateway {
    /// Create a gateway that approves everything.
    pub fn new() -> Self {
        Self {
            holds: DashMap::new(),
            charges: DashMap::new(),
            refunds: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate processor availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Total amount charged against a customer across all calls.
    pub fn charged(&self, customer: UserId) -> Money {
        self.charges
            .get(&customer)
            .map(|v| {
                v.iter()
                    .fold(Money::ZERO, |acc, m| acc.checked_add(*m).unwrap_or(acc))
            })
            .unwrap_or(Money::ZERO)
    }

    /// Number of charge calls recorded for a customer.
    pub fn charge_count(&self, customer: UserId) -> usize {
        self.charges.get(&customer).map(|v| v.len()).unwrap_or(0)
    }

    /// Total amount refunded to a customer.
    pub fn refunded(&self, customer: UserId) -> Money {
        self.refunds
            .get(&customer)
            .map(|v| {
                v.iter()
                    .fold(Money::ZERO, |acc, m| acc.checked_add(*m).unwrap_or(acc))
            })
            .unwrap_or(Money::ZERO)
    }

    fn check_available(&self) -> Result<(), PaymentError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PaymentError::Unavailable("stub offline".to_string()))
        }
    }
}

impl Default for InstantGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for InstantGateway {
    async fn authorize(&self, customer: UserId, _amount: Money) -> Result<HoldToken, PaymentError> {
        self.check_available()?;
        let token = HoldToken::new(format!("hold-{}", Uuid::new_v4()));
        self.holds.insert(token.as_str().to_string(), customer);
        Ok(token)
    }

    async fn capture(&self, _token: &HoldToken, _amount: Money) -> Result<(), PaymentError> {
        self.check_available()
    }

    async fn charge_additional(
        &self,
        customer: UserId,
        amount: Money,
    ) -> Result<(), PaymentError> {
        self.check_available()?;
        self.charges.entry(customer).or_default().push(amount);
        Ok(())
    }

    async fn refund(&self, token: &HoldToken, amount: Money) -> Result<(), PaymentError> {
        self.check_available()?;
        let customer = self
            .holds
            .get(token.as_str())
            .map(|entry| *entry.value())
            .ok_or_else(|| PaymentError::Declined(format!("unknown hold {}", token.as_str())))?;
        self.refunds.entry(customer).or_default().push(amount);
        Ok(())
    }
}

// ─── Retrying Gateway (decorator) ────────────────────────────────────

/// Maximum number of retry attempts after the initial request.
const MAX_RETRIES: u32 = 3;

/// Base delay between retries (doubles each attempt: 200ms, 400ms, 800ms).
const BASE_DELAY_MS: u64 = 200;

/// Gateway decorator with exponential backoff on transient failures.
///
/// Only [`PaymentError::Unavailable`] triggers a retry; declines are
/// returned to the caller immediately.
pub struct RetryingGateway<G> {
    inner: G,
}

impl<G: PaymentGateway> RetryingGateway<G> {
    /// Wrap a gateway with the retry policy.
    pub fn new(inner: G) -> Self {
        Self { inner }
    }

    async fn retry<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, PaymentError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, PaymentError>>,
    {
        for attempt in 0..MAX_RETRIES {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    let delay = Duration::from_millis(BASE_DELAY_MS * 2u64.pow(attempt));
                    tracing::warn!(
                        op,
                        attempt = attempt + 1,
                        max_retries = MAX_RETRIES,
                        "payment call failed, retrying in {delay:?}: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        // Final attempt — no more retries.
        f().await
    }
}

#[async_trait]
impl<G: PaymentGateway> PaymentGateway for RetryingGateway<G> {
    async fn authorize(&self, customer: UserId, amount: Money) -> Result<HoldToken, PaymentError> {
        self.retry("authorize", || self.inner.authorize(customer, amount))
            .await
    }

    async fn capture(&self, token: &HoldToken, amount: Money) -> Result<(), PaymentError> {
        self.retry("capture", || self.inner.capture(token, amount))
            .await
    }

    async fn charge_additional(
        &self,
        customer: UserId,
        amount: Money,
    ) -> Result<(), PaymentError> {
        self.retry("charge_additional", || {
            self.inner.charge_additional(customer, amount)
        })
        .await
    }

    async fn refund(&self, token: &HoldToken, amount: Money) -> Result<(), PaymentError> {
        self.retry("refund", || self.inner.refund(token, amount)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn instant_gateway_authorizes_and_records_charges() {
        let gateway = InstantGateway::new();
        let customer = UserId::new();

        let token = gateway
            .authorize(customer, Money::from_minor(10_000))
            .await
            .unwrap();
        gateway
            .capture(&token, Money::from_minor(10_000))
            .await
            .unwrap();
        gateway
            .charge_additional(customer, Money::from_minor(2_000))
            .await
            .unwrap();

        assert_eq!(gateway.charged(customer), Money::from_minor(2_000));
        assert_eq!(gateway.charge_count(customer), 1);
    }

    #[tokio::test]
    async fn refund_resolves_back_to_the_hold_customer() {
        let gateway = InstantGateway::new();
        let customer = UserId::new();

        let token = gateway
            .authorize(customer, Money::from_minor(10_000))
            .await
            .unwrap();
        gateway
            .refund(&token, Money::from_minor(10_000))
            .await
            .unwrap();

        assert_eq!(gateway.refunded(customer), Money::from_minor(10_000));
    }

    #[tokio::test]
    async fn refund_of_unknown_hold_is_declined() {
        let gateway = InstantGateway::new();
        let err = gateway
            .refund(&HoldToken::new("hold-bogus"), Money::from_minor(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Declined(_)));
    }

    #[tokio::test]
    async fn offline_gateway_fails_transiently() {
        let gateway = InstantGateway::new();
        gateway.set_available(false);
        let err = gateway
            .authorize(UserId::new(), Money::from_minor(1))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn decline_is_not_transient() {
        assert!(!PaymentError::Declined("insufficient funds".into()).is_transient());
        assert!(PaymentError::Unavailable("timeout".into()).is_transient());
    }

    /// Gateway that fails transiently a fixed number of times, then succeeds.
    struct FlakyGateway {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl PaymentGateway for FlakyGateway {
        async fn authorize(
            &self,
            _customer: UserId,
            _amount: Money,
        ) -> Result<HoldToken, PaymentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            }).is_ok()
            {
                Err(PaymentError::Unavailable("flaky".to_string()))
            } else {
                Ok(HoldToken::new("hold-ok"))
            }
        }

        async fn capture(&self, _token: &HoldToken, _amount: Money) -> Result<(), PaymentError> {
            Ok(())
        }

        async fn charge_additional(
            &self,
            _customer: UserId,
            _amount: Money,
        ) -> Result<(), PaymentError> {
            Err(PaymentError::Declined("card expired".to_string()))
        }

        async fn refund(&self, _token: &HoldToken, _amount: Money) -> Result<(), PaymentError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_gateway_recovers_from_transient_failures() {
        let gateway = RetryingGateway::new(FlakyGateway {
            failures_left: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        });

        let token = gateway
            .authorize(UserId::new(), Money::from_minor(100))
            .await
            .unwrap();
        assert_eq!(token.as_str(), "hold-ok");
        assert_eq!(gateway.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_gateway_does_not_retry_declines() {
        let gateway = RetryingGateway::new(FlakyGateway {
            failures_left: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        });

        let err = gateway
            .charge_additional(UserId::new(), Money::from_minor(100))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Declined(_)));
    }
}
