use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::CoreError;
use crate::middleware::RequestActor;
use crate::models::{Booking, BookingDraft, ExhibitionGate, Stall};
use crate::realtime::StallEvent;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/exhibitions/{id}/stalls", get(list_stalls).post(add_stall))
        .route("/exhibitions/{id}/gate", patch(set_gate))
        .route("/exhibitions/{id}/bookings", post(create_booking))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}/approve", patch(approve_booking))
        .route("/bookings/{id}/confirm", patch(confirm_booking))
        .route("/bookings/{id}/reject", patch(reject_booking))
        .route("/bookings/{id}/cancel", patch(cancel_booking))
}

// GET /api/exhibitions/{id}/stalls
//
// Also the resynchronization point for realtime clients after a reconnect:
// the snapshot carries versions, so stale broadcast events can be discarded.
async fn list_stalls(
    State(state): State<Arc<AppState>>,
    Path(exhibition_id): Path<i64>,
) -> Result<Json<Vec<Stall>>, CoreError> {
    let stalls = state.coordinator.stall_snapshot(exhibition_id).await?;
    Ok(Json(stalls))
}

// POST /api/exhibitions/{id}/bookings
#[derive(Debug, Deserialize, Validate)]
struct CreateBookingRequest {
    #[validate(length(min = 1, message = "at least one stall is required"))]
    stall_ids: Vec<i64>,
    #[validate(length(min = 1, max = 200))]
    customer_name: String,
    #[validate(email)]
    customer_email: String,
    customer_phone: Option<String>,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    Path(exhibition_id): Path<i64>,
    _actor: RequestActor,
    Json(req): Json<CreateBookingRequest>,
) -> Result<impl IntoResponse, CoreError> {
    req.validate()
        .map_err(|e| CoreError::Validation(e.to_string()))?;

    let booking = state
        .coordinator
        .claim(
            exhibition_id,
            req.stall_ids,
            BookingDraft {
                customer_name: req.customer_name,
                customer_email: req.customer_email,
                customer_phone: req.customer_phone,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings/{id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
    _actor: RequestActor,
) -> Result<Json<Booking>, CoreError> {
    let booking = state
        .store
        .booking(booking_id)
        .await
        .map_err(CoreError::from)?
        .ok_or(CoreError::NotFound)?;
    Ok(Json(booking))
}

async fn approve_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
    actor: RequestActor,
) -> Result<Json<Booking>, CoreError> {
    actor.require_operator()?;
    Ok(Json(state.coordinator.approve(booking_id).await?))
}

async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
    actor: RequestActor,
) -> Result<Json<Booking>, CoreError> {
    actor.require_operator()?;
    Ok(Json(state.coordinator.confirm(booking_id).await?))
}

async fn reject_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
    actor: RequestActor,
) -> Result<Json<Booking>, CoreError> {
    actor.require_operator()?;
    Ok(Json(state.coordinator.reject(booking_id).await?))
}

async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
    _actor: RequestActor,
) -> Result<Json<Booking>, CoreError> {
    Ok(Json(state.coordinator.cancel(booking_id).await?))
}

// POST /api/exhibitions/{id}/stalls — layout design time, operator only.
#[derive(Debug, Deserialize, Validate)]
struct AddStallRequest {
    id: i64,
    hall_id: i64,
    #[validate(length(min = 1, max = 32))]
    stall_number: String,
    #[validate(range(min = 0.0))]
    price: f64,
    #[validate(range(min = 0.0))]
    area_sqm: f64,
}

async fn add_stall(
    State(state): State<Arc<AppState>>,
    Path(exhibition_id): Path<i64>,
    actor: RequestActor,
    Json(req): Json<AddStallRequest>,
) -> Result<impl IntoResponse, CoreError> {
    actor.require_operator()?;
    req.validate()
        .map_err(|e| CoreError::Validation(e.to_string()))?;

    let stall = Stall::new(
        req.id,
        exhibition_id,
        req.hall_id,
        req.stall_number,
        req.price,
        req.area_sqm,
    );
    state
        .store
        .insert_stall(&stall)
        .await
        .map_err(CoreError::from)?;
    state
        .hub
        .publish(exhibition_id, StallEvent::layout_update(vec![stall.id]));
    Ok((StatusCode::CREATED, Json(stall)))
}

// PATCH /api/exhibitions/{id}/gate — operator publish/unpublish override.
#[derive(Debug, Deserialize)]
struct SetGateRequest {
    status: String,
    is_active: bool,
}

async fn set_gate(
    State(state): State<Arc<AppState>>,
    Path(exhibition_id): Path<i64>,
    actor: RequestActor,
    Json(req): Json<SetGateRequest>,
) -> Result<Json<ExhibitionGate>, CoreError> {
    actor.require_operator()?;
    let gate = ExhibitionGate {
        exhibition_id,
        status: req.status,
        is_active: req.is_active,
    };
    state
        .store
        .set_exhibition_gate(&gate)
        .await
        .map_err(CoreError::from)?;
    Ok(Json(gate))
}
