//! # Consultation Gate Routes
//!
//! - `POST /v1/orders/{order_id}/consultations` — request a consultation
//! - `GET  /v1/orders/{order_id}/consultations/active` — active record
//! - `POST /v1/orders/{order_id}/consultations/waive` — waive the gate
//! - `POST /v1/consultations/{consultation_id}/start` — start a session
//! - `POST /v1/consultations/{consultation_id}/complete` — complete it

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use mto_core::{ConsultationId, OrderId, UserId};
use mto_order::Consultation;

use crate::error::AppError;
use crate::routes::orders::OrderView;
use crate::AppState;

/// Routes for the consultation surface.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/orders/{order_id}/consultations",
            post(request_consultation),
        )
        .route(
            "/v1/orders/{order_id}/consultations/active",
            get(active_consultation),
        )
        .route(
            "/v1/orders/{order_id}/consultations/waive",
            post(waive_consultation),
        )
        .route(
            "/v1/consultations/{consultation_id}/start",
            post(start_consultation),
        )
        .route(
            "/v1/consultations/{consultation_id}/complete",
            post(complete_consultation),
        )
}

#[derive(Debug, Deserialize)]
pub struct RequestConsultationRequest {
    pub actor_id: Uuid,
    /// Seconds until the consultation expires; engine default if omitted.
    pub timeout_secs: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor_id: Uuid,
}

async fn request_consultation(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(body): Json<RequestConsultationRequest>,
) -> Result<Json<Consultation>, AppError> {
    if matches!(body.timeout_secs, Some(secs) if secs <= 0) {
        return Err(AppError::Validation(
            "timeout_secs must be positive".to_string(),
        ));
    }
    let consultation = state
        .engine
        .request_consultation(
            OrderId::from_uuid(order_id),
            UserId::from_uuid(body.actor_id),
            body.timeout_secs,
        )
        .await?;
    Ok(Json(consultation))
}

async fn active_consultation(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Json<Option<Consultation>> {
    Json(state.engine.active_consultation(OrderId::from_uuid(order_id)))
}

async fn waive_consultation(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(body): Json<ActorRequest>,
) -> Result<Json<OrderView>, AppError> {
    let order = state
        .engine
        .waive_consultation(
            OrderId::from_uuid(order_id),
            UserId::from_uuid(body.actor_id),
        )
        .await?;
    Ok(Json(order.into()))
}

async fn start_consultation(
    State(state): State<AppState>,
    Path(consultation_id): Path<Uuid>,
    Json(body): Json<ActorRequest>,
) -> Result<Json<Consultation>, AppError> {
    let consultation = state
        .engine
        .start_consultation(
            ConsultationId::from_uuid(consultation_id),
            UserId::from_uuid(body.actor_id),
        )
        .await?;
    Ok(Json(consultation))
}

async fn complete_consultation(
    State(state): State<AppState>,
    Path(consultation_id): Path<Uuid>,
    Json(body): Json<ActorRequest>,
) -> Result<Json<Consultation>, AppError> {
    let consultation = state
        .engine
        .complete_consultation(
            ConsultationId::from_uuid(consultation_id),
            UserId::from_uuid(body.actor_id),
        )
        .await?;
    Ok(Json(consultation))
}
