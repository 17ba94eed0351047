use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::api::AppState;
use crate::engine::SlotGrid;
use crate::error::CoreError;

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub service_id: i64,
    pub date: String,
}

pub async fn get_availability(
    Query(params): Query<AvailabilityQuery>,
    State(state): State<AppState>,
) -> Result<Json<SlotGrid>, CoreError> {
    let grid = state
        .scheduling
        .availability
        .slot_grid(params.service_id, params.date.trim())
        .await?;
    Ok(Json(grid))
}
