use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::domain::WorkerLocation;
use crate::error::CoreError;
use crate::scheduling::{LocationView, TrackingEvent, TrackingStopped};

#[derive(Debug, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
}

pub async fn start_tracking(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<WorkerLocation>, CoreError> {
    Ok(Json(state.scheduling.tracker.start(user.user_id(), id).await?))
}

pub async fn update_location(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(sample): Json<LocationSample>,
) -> Result<Json<LocationView>, CoreError> {
    let view = state
        .scheduling
        .tracker
        .update(
            user.user_id(),
            id,
            sample.latitude,
            sample.longitude,
            sample.accuracy,
        )
        .await?;
    Ok(Json(view))
}

pub async fn stop_tracking(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<TrackingStopped>, CoreError> {
    Ok(Json(state.scheduling.tracker.stop(user.user_id(), id).await?))
}

pub async fn get_location(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<LocationView>, CoreError> {
    Ok(Json(state.scheduling.tracker.get(user.actor(), id).await?))
}

/// Live location stream for everyone allowed to see the booking.
pub async fn tracking_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    user: AuthUser,
    Path(booking_id): Path<i64>,
) -> Result<Response, CoreError> {
    state.scheduling.bookings.get(user.actor(), booking_id).await?;
    let events = state.scheduling.tracker.subscribe(booking_id);
    Ok(ws.on_upgrade(move |socket| stream_events(socket, booking_id, events)))
}

/// Forward the latest event on every change. A slow client only ever sees
/// the newest position; the stream ends after `tracking_stopped`.
async fn stream_events(
    socket: WebSocket,
    booking_id: i64,
    mut events: watch::Receiver<Option<TrackingEvent>>,
) {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            changed = events.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(event) = events.borrow_and_update().clone() else {
                    continue;
                };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(booking_id, error = %e, "Failed to encode tracking event");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
                if matches!(event, TrackingEvent::TrackingStopped(_)) {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!(booking_id, "Tracking subscriber disconnected");
}
