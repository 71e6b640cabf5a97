//! # Order Lifecycle Routes
//!
//! - `POST /v1/orders` — create an order (captures escrow)
//! - `GET  /v1/orders/{order_id}` — order projection
//! - `POST /v1/orders/{order_id}/advance` — next status in the progression
//! - `POST /v1/orders/{order_id}/cancel` — cancel and refund
//! - `POST /v1/orders/{order_id}/confirm-delivery` — customer acknowledgement
//! - `GET  /v1/orders/{order_id}/timeline?limit=N` — recent audit events

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mto_core::{Money, OrderId, UserId};
use mto_order::{ProductionOrder, ShipmentInfo, TimelineEvent};

use crate::error::AppError;
use crate::AppState;

/// Routes for the order lifecycle surface.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/orders", post(create_order))
        .route("/v1/orders/{order_id}", get(get_order))
        .route("/v1/orders/{order_id}/advance", post(advance_order))
        .route("/v1/orders/{order_id}/cancel", post(cancel_order))
        .route(
            "/v1/orders/{order_id}/confirm-delivery",
            post(confirm_delivery),
        )
        .route("/v1/orders/{order_id}/timeline", get(get_timeline))
}

// ─── Request / response types ────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,
    pub provider_id: Uuid,
    /// Escrow amount in minor units.
    pub escrow_amount: i64,
    pub consultation_required: bool,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceRequest {
    pub actor_id: Uuid,
    /// Tracking fields are supplied together by the shipping
    /// collaborator when the order is being shipped.
    pub tracking_number: Option<String>,
    pub shipping_carrier: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub actor_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    pub limit: Option<usize>,
}

/// Order projection: the record plus its display progress.
#[derive(Debug, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: ProductionOrder,
    pub percent_complete: u8,
}

impl From<ProductionOrder> for OrderView {
    fn from(order: ProductionOrder) -> Self {
        let percent_complete = order.status.percent_complete();
        Self {
            order,
            percent_complete,
        }
    }
}

// ─── Handlers ────────────────────────────────────────────────────────

async fn create_order(
    State(state): State<AppState>,
    Json(body): Json<CreateOrderRequest>,
) -> Result<Json<OrderView>, AppError> {
    let order = state
        .engine
        .create(
            UserId::from_uuid(body.customer_id),
            UserId::from_uuid(body.provider_id),
            Money::from_minor(body.escrow_amount),
            body.consultation_required,
        )
        .await?;
    Ok(Json(order.into()))
}

async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderView>, AppError> {
    let order_id = OrderId::from_uuid(order_id);
    let order = state
        .engine
        .order(order_id)
        .await
        .ok_or_else(|| AppError::Domain(mto_order::OrderError::NotFound(order_id.to_string())))?;
    Ok(Json(order.into()))
}

async fn advance_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(body): Json<AdvanceRequest>,
) -> Result<Json<OrderView>, AppError> {
    let shipment = match (body.tracking_number, body.shipping_carrier) {
        (Some(tracking_number), Some(shipping_carrier)) => Some(ShipmentInfo {
            tracking_number,
            shipping_carrier,
        }),
        (None, None) => None,
        _ => {
            return Err(AppError::Validation(
                "tracking_number and shipping_carrier must be supplied together".to_string(),
            ))
        }
    };
    let order = state
        .engine
        .advance(
            OrderId::from_uuid(order_id),
            UserId::from_uuid(body.actor_id),
            shipment,
        )
        .await?;
    Ok(Json(order.into()))
}

async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(body): Json<CancelRequest>,
) -> Result<Json<OrderView>, AppError> {
    let order = state
        .engine
        .cancel(
            OrderId::from_uuid(order_id),
            UserId::from_uuid(body.actor_id),
            body.reason,
        )
        .await?;
    Ok(Json(order.into()))
}

async fn confirm_delivery(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(body): Json<ActorRequest>,
) -> Result<Json<OrderView>, AppError> {
    let order = state
        .engine
        .confirm_delivery(
            OrderId::from_uuid(order_id),
            UserId::from_uuid(body.actor_id),
        )
        .await?;
    Ok(Json(order.into()))
}

async fn get_timeline(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Query(query): Query<TimelineQuery>,
) -> Json<Vec<TimelineEvent>> {
    let limit = query.limit.unwrap_or(20);
    Json(state.engine.timeline(OrderId::from_uuid(order_id), limit))
}
