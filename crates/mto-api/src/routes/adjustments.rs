//! # Price Adjustment Routes
//!
//! - `POST /v1/orders/{order_id}/adjustments` — propose an adjustment
//! - `GET  /v1/orders/{order_id}/adjustments/pending` — pending record
//! - `POST /v1/adjustments/{adjustment_id}/resolve` — approve or reject

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use mto_core::{AdjustmentId, Money, OrderId, Timestamp, UserId};
use mto_order::{Decision, PriceAdjustment};

use crate::error::AppError;
use crate::AppState;

/// Routes for the price negotiation surface.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/orders/{order_id}/adjustments", post(propose_adjustment))
        .route(
            "/v1/orders/{order_id}/adjustments/pending",
            get(pending_adjustment),
        )
        .route(
            "/v1/adjustments/{adjustment_id}/resolve",
            post(resolve_adjustment),
        )
}

#[derive(Debug, Deserialize)]
pub struct ProposeAdjustmentRequest {
    pub actor_id: Uuid,
    /// Proposed replacement price in minor units.
    pub adjusted_price: i64,
    pub justification: String,
    /// RFC 3339 deadline for the customer's decision.
    pub response_deadline: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveAdjustmentRequest {
    pub actor_id: Uuid,
    pub decision: Decision,
}

async fn propose_adjustment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(body): Json<ProposeAdjustmentRequest>,
) -> Result<Json<PriceAdjustment>, AppError> {
    let deadline = Timestamp::parse_rfc3339(&body.response_deadline)
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let adjustment = state
        .engine
        .propose_adjustment(
            OrderId::from_uuid(order_id),
            UserId::from_uuid(body.actor_id),
            Money::from_minor(body.adjusted_price),
            body.justification,
            deadline,
        )
        .await?;
    Ok(Json(adjustment))
}

async fn pending_adjustment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Json<Option<PriceAdjustment>> {
    Json(state.engine.pending_adjustment(OrderId::from_uuid(order_id)))
}

async fn resolve_adjustment(
    State(state): State<AppState>,
    Path(adjustment_id): Path<Uuid>,
    Json(body): Json<ResolveAdjustmentRequest>,
) -> Result<Json<PriceAdjustment>, AppError> {
    let adjustment = state
        .engine
        .resolve_adjustment(
            AdjustmentId::from_uuid(adjustment_id),
            UserId::from_uuid(body.actor_id),
            body.decision,
        )
        .await?;
    Ok(Json(adjustment))
}
