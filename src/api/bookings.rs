use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::warn;

use crate::api::{body_or_default, AppState};
use crate::auth::AuthUser;
use crate::domain::Booking;
use crate::error::CoreError;
use crate::scheduling::{BookingCreated, CreateBooking, CreateInquiry, PaymentProof};

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

/// A lost capacity race answers 409 with the refreshed grid so the client
/// can re-pick without another round trip.
async fn slot_full_response(state: &AppState, err: CoreError, service_id: i64, date: &str) -> Response {
    let mut body = err.to_body();
    match state.scheduling.availability.slot_grid(service_id, date).await {
        Ok(grid) => body["available_slots"] = serde_json::json!(grid.available_slots),
        Err(e) => warn!(service_id, date, error = %e, "Could not refresh grid after slot race"),
    }
    (err.status_code(), Json(body)).into_response()
}

pub async fn create_booking(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateBooking>,
) -> Result<(StatusCode, Json<BookingCreated>), Response> {
    let (service_id, date) = (req.service_id, req.date.clone());
    match state.scheduling.bookings.create(user.user_id(), req).await {
        Ok(created) => Ok((StatusCode::CREATED, Json(created))),
        Err(err @ CoreError::SlotFull(_)) => {
            Err(slot_full_response(&state, err, service_id, date.trim()).await)
        }
        Err(e) => Err(e.into_response()),
    }
}

pub async fn create_inquiry(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateInquiry>,
) -> Result<(StatusCode, Json<Booking>), CoreError> {
    let booking = state
        .scheduling
        .bookings
        .create_inquiry(user.user_id(), req)
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

pub async fn get_booking(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Booking>, CoreError> {
    Ok(Json(state.scheduling.bookings.get(user.actor(), id).await?))
}

pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(proof): Json<PaymentProof>,
) -> Result<Json<Booking>, CoreError> {
    let booking = state
        .scheduling
        .bookings
        .verify_payment(user.actor(), id, proof)
        .await?;
    Ok(Json(booking))
}

pub async fn confirm_booking(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Booking>, CoreError> {
    Ok(Json(state.scheduling.bookings.confirm(user.actor(), id).await?))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<Booking>, CoreError> {
    let req = body_or_default(body);
    let booking = state
        .scheduling
        .bookings
        .cancel(user.actor(), id, req.reason)
        .await?;
    Ok(Json(booking))
}
