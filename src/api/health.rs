use axum::extract::State;
use axum::Json;

use crate::api::AppState;
use crate::error::CoreError;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Ready once the store answers.
pub async fn ready(State(state): State<AppState>) -> Result<Json<serde_json::Value>, CoreError> {
    state.repo.ping().await?;
    Ok(Json(serde_json::json!({"status": "ready"})))
}
