use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::api::{body_or_default, AppState};
use crate::auth::AuthUser;
use crate::db::AssignmentOutcome;
use crate::domain::{AssignmentStatus, WorkerAssignment};
use crate::error::CoreError;
use crate::scheduling::CompleteJob;

#[derive(Debug, Default, Deserialize)]
pub struct AssignRequest {
    /// Omit to let the auto-assigner pick.
    pub worker_id: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotesRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    pub reason: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub status: AssignmentStatus,
    pub reason: Option<String>,
}

pub async fn assign(
    State(state): State<AppState>,
    user: AuthUser,
    Path(booking_id): Path<i64>,
    body: Option<Json<AssignRequest>>,
) -> Result<(StatusCode, Json<WorkerAssignment>), CoreError> {
    let req = body_or_default(body);
    let assignment = state
        .scheduling
        .assignments
        .assign(user.actor(), booking_id, req.worker_id, req.notes)
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

pub async fn accept(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    body: Option<Json<NotesRequest>>,
) -> Result<Json<WorkerAssignment>, CoreError> {
    let req = body_or_default(body);
    let assignment = state
        .scheduling
        .assignments
        .accept(user.user_id(), id, req.notes)
        .await?;
    Ok(Json(assignment))
}

pub async fn reject(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    body: Option<Json<RejectRequest>>,
) -> Result<Json<WorkerAssignment>, CoreError> {
    let req = body_or_default(body);
    let assignment = state
        .scheduling
        .assignments
        .reject(user.user_id(), id, req.reason, req.notes)
        .await?;
    Ok(Json(assignment))
}

pub async fn start(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    body: Option<Json<NotesRequest>>,
) -> Result<Json<WorkerAssignment>, CoreError> {
    let req = body_or_default(body);
    let assignment = state
        .scheduling
        .assignments
        .start(user.user_id(), id, req.notes)
        .await?;
    Ok(Json(assignment))
}

pub async fn complete(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    body: Option<Json<CompleteJob>>,
) -> Result<Json<AssignmentOutcome>, CoreError> {
    let report = body_or_default(body);
    let outcome = state
        .scheduling
        .assignments
        .complete(user.user_id(), id, report)
        .await?;
    Ok(Json(outcome))
}

pub async fn admin_override(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<OverrideRequest>,
) -> Result<Json<WorkerAssignment>, CoreError> {
    let assignment = state
        .scheduling
        .assignments
        .admin_override(user.actor(), id, req.status, req.reason)
        .await?;
    Ok(Json(assignment))
}
