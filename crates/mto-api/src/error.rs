//! # Application Error
//!
//! Maps engine errors to structured HTTP responses. Every error body
//! carries a stable `kind` so clients can distinguish "you can't do this
//! yet" from "this was already done" from "the system couldn't charge
//! you" without parsing messages.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use mto_order::{OrderError, PaymentError};

/// Application-level error type that maps to HTTP responses.
#[derive(Error, Debug)]
pub enum AppError {
    /// A domain rejection from the order engine.
    #[error(transparent)]
    Domain(#[from] OrderError),

    /// The request body failed validation before reaching the engine.
    #[error("validation error: {0}")]
    Validation(String),
}

/// Stable machine-readable kind for a domain error.
fn kind(error: &OrderError) -> &'static str {
    match error {
        OrderError::InvalidTransition { .. } => "invalid_transition",
        OrderError::ConsultationPending { .. } => "consultation_pending",
        OrderError::AlreadyActive { .. } => "already_active",
        OrderError::AlreadyPending { .. } => "already_pending",
        OrderError::AlreadyUsed { .. } => "already_used",
        OrderError::AlreadyResolved { .. } => "already_resolved",
        OrderError::AlreadyTerminal { .. } => "already_terminal",
        OrderError::AlreadyReleased { .. } => "already_released",
        OrderError::DuplicateHold { .. } => "duplicate_hold",
        OrderError::InvalidAmount { .. } => "invalid_amount",
        OrderError::NoOpAdjustment => "noop_adjustment",
        OrderError::InvalidJustification => "invalid_justification",
        OrderError::InvalidState { .. } => "invalid_state",
        OrderError::TopUpFailed { .. } => "top_up_failed",
        OrderError::NotHeld { .. } => "not_held",
        OrderError::Unauthorized { .. } => "unauthorized",
        OrderError::NotFound(_) => "not_found",
        OrderError::Payment(PaymentError::Declined(_)) => "payment_declined",
        OrderError::Payment(PaymentError::Unavailable(_)) => "payment_unavailable",
    }
}

fn status(error: &OrderError) -> StatusCode {
    match error {
        OrderError::NotFound(_) => StatusCode::NOT_FOUND,
        OrderError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        OrderError::InvalidAmount { .. }
        | OrderError::NoOpAdjustment
        | OrderError::InvalidJustification => StatusCode::UNPROCESSABLE_ENTITY,
        OrderError::TopUpFailed { .. } | OrderError::Payment(PaymentError::Declined(_)) => {
            StatusCode::PAYMENT_REQUIRED
        }
        OrderError::Payment(PaymentError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        // Ordering and duplicate-action guards: the request was
        // well-formed but conflicts with the order's current state.
        OrderError::InvalidTransition { .. }
        | OrderError::ConsultationPending { .. }
        | OrderError::AlreadyActive { .. }
        | OrderError::AlreadyPending { .. }
        | OrderError::AlreadyUsed { .. }
        | OrderError::AlreadyResolved { .. }
        | OrderError::AlreadyTerminal { .. }
        | OrderError::AlreadyReleased { .. }
        | OrderError::DuplicateHold { .. }
        | OrderError::InvalidState { .. }
        | OrderError::NotHeld { .. } => StatusCode::CONFLICT,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            AppError::Domain(error) => (status(error), kind(error), error.to_string()),
            AppError::Validation(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation",
                message.clone(),
            ),
        };
        let body = serde_json::json!({
            "error": {
                "code": status.as_u16(),
                "kind": kind,
                "message": message,
            }
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mto_core::OrderId;

    #[test]
    fn conflict_kinds_map_to_409() {
        let error = OrderError::ConsultationPending {
            order_id: OrderId::new(),
        };
        assert_eq!(status(&error), StatusCode::CONFLICT);
        assert_eq!(kind(&error), "consultation_pending");
    }

    #[test]
    fn top_up_failure_maps_to_402() {
        let error = OrderError::TopUpFailed {
            order_id: OrderId::new(),
            source: PaymentError::Declined("insufficient funds".to_string()),
        };
        assert_eq!(status(&error), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn transient_payment_failure_maps_to_503() {
        let error = OrderError::Payment(PaymentError::Unavailable("timeout".to_string()));
        assert_eq!(status(&error), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn not_found_maps_to_404() {
        let error = OrderError::NotFound("order:x".to_string());
        assert_eq!(status(&error), StatusCode::NOT_FOUND);
    }
}
