pub mod assignments;
pub mod availability;
pub mod bookings;
pub mod calls;
pub mod health;
pub mod quotes;
pub mod tracking;
pub mod wallet;

use crate::auth::JwtKeys;
use crate::db::Repository;
use crate::scheduling::Scheduling;
use axum::extract::FromRef;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub scheduling: Arc<Scheduling>,
    pub jwt: JwtKeys,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, scheduling: Scheduling, jwt_secret: &str) -> Self {
        Self {
            repo,
            scheduling: Arc::new(scheduling),
            jwt: JwtKeys::new(jwt_secret),
        }
    }
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

/// Optional JSON body; a missing or empty body falls back to the default.
pub(crate) fn body_or_default<T: Default>(body: Option<axum::Json<T>>) -> T {
    body.map(|axum::Json(inner)| inner).unwrap_or_default()
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/availability", get(availability::get_availability))
        .route("/v1/bookings", post(bookings::create_booking))
        .route("/v1/inquiries", post(bookings::create_inquiry))
        .route("/v1/bookings/:id", get(bookings::get_booking))
        .route(
            "/v1/bookings/:id/verify-payment",
            post(bookings::verify_payment),
        )
        .route("/v1/bookings/:id/confirm", post(bookings::confirm_booking))
        .route("/v1/bookings/:id/cancel", post(bookings::cancel_booking))
        .route("/v1/bookings/:id/quote", post(quotes::provide_quote))
        .route("/v1/bookings/:id/quote/accept", post(quotes::accept_quote))
        .route("/v1/bookings/:id/quote/reject", post(quotes::reject_quote))
        .route("/v1/bookings/:id/quote/pay", post(quotes::pay_quote))
        .route(
            "/v1/bookings/:id/quote/verify-payment",
            post(quotes::verify_quote_payment),
        )
        .route("/v1/bookings/:id/assign", post(assignments::assign))
        .route("/v1/bookings/:id/call", post(calls::initiate_call))
        .route("/v1/bookings/:id/tracking/ws", get(tracking::tracking_ws))
        .route("/v1/assignments/:id/accept", post(assignments::accept))
        .route("/v1/assignments/:id/reject", post(assignments::reject))
        .route("/v1/assignments/:id/start", post(assignments::start))
        .route("/v1/assignments/:id/complete", post(assignments::complete))
        .route(
            "/v1/assignments/:id/override",
            post(assignments::admin_override),
        )
        .route(
            "/v1/assignments/:id/tracking",
            get(tracking::get_location),
        )
        .route(
            "/v1/assignments/:id/tracking/start",
            post(tracking::start_tracking),
        )
        .route(
            "/v1/assignments/:id/tracking/update",
            post(tracking::update_location),
        )
        .route(
            "/v1/assignments/:id/tracking/stop",
            post(tracking::stop_tracking),
        )
        .route("/v1/wallet", get(wallet::get_balance))
        .route("/v1/wallet/recharge", post(wallet::recharge))
        .route("/v1/wallet/recharge/verify", post(wallet::verify_recharge))
        .route("/v1/wallet/withdrawals", post(wallet::request_withdrawal))
        .route(
            "/v1/wallet/withdrawals/:id/complete",
            post(wallet::complete_withdrawal),
        )
        .layer(cors)
        .with_state(state)
}
