use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::domain::{Money, Payment};
use crate::error::CoreError;
use crate::scheduling::RechargeStarted;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: i64,
    pub balance: Money,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: Money,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRechargeRequest {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
}

pub async fn get_balance(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<BalanceResponse>, CoreError> {
    let balance = state.scheduling.wallet.balance(user.user_id()).await?;
    Ok(Json(BalanceResponse {
        user_id: user.user_id(),
        balance,
    }))
}

pub async fn recharge(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<AmountRequest>,
) -> Result<(StatusCode, Json<RechargeStarted>), CoreError> {
    let started = state
        .scheduling
        .wallet
        .recharge(user.user_id(), req.amount)
        .await?;
    Ok((StatusCode::CREATED, Json(started)))
}

pub async fn verify_recharge(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<VerifyRechargeRequest>,
) -> Result<Json<Payment>, CoreError> {
    let payment = state
        .scheduling
        .wallet
        .verify_recharge(user.actor(), &req.order_id, &req.payment_id, &req.signature)
        .await?;
    Ok(Json(payment))
}

pub async fn request_withdrawal(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<AmountRequest>,
) -> Result<(StatusCode, Json<Payment>), CoreError> {
    let payment = state
        .scheduling
        .wallet
        .request_withdrawal(user.actor(), req.amount)
        .await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn complete_withdrawal(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Payment>, CoreError> {
    let payment = state
        .scheduling
        .wallet
        .complete_withdrawal(user.actor(), id)
        .await?;
    Ok(Json(payment))
}
