use axum::extract::{Path, State};
use axum::Json;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::domain::Booking;
use crate::error::CoreError;
use crate::scheduling::{PayQuote, PaymentProof, ProvideQuote, QuotePayment};

pub async fn provide_quote(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<ProvideQuote>,
) -> Result<Json<Booking>, CoreError> {
    Ok(Json(state.scheduling.quotes.provide(user.actor(), id, req).await?))
}

pub async fn accept_quote(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Booking>, CoreError> {
    Ok(Json(state.scheduling.quotes.accept(user.actor(), id).await?))
}

pub async fn reject_quote(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Booking>, CoreError> {
    Ok(Json(state.scheduling.quotes.reject(user.actor(), id).await?))
}

pub async fn pay_quote(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<PayQuote>,
) -> Result<Json<QuotePayment>, CoreError> {
    Ok(Json(state.scheduling.quotes.pay(user.actor(), id, req).await?))
}

pub async fn verify_quote_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(proof): Json<PaymentProof>,
) -> Result<Json<Booking>, CoreError> {
    Ok(Json(state.scheduling.quotes.verify(user.actor(), id, proof).await?))
}
