use axum::extract::{Path, State};
use axum::Json;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::CoreError;
use crate::scheduling::CallInitiated;

pub async fn initiate_call(
    State(state): State<AppState>,
    user: AuthUser,
    Path(booking_id): Path<i64>,
) -> Result<Json<CallInitiated>, CoreError> {
    let call = state
        .scheduling
        .comms
        .initiate_call(user.actor(), booking_id)
        .await?;
    Ok(Json(call))
}
