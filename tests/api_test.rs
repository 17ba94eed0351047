mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::setup_test_app;
use serde_json::{json, Value};
use tower::util::ServiceExt;

async fn send(
    app: axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let res = app.oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health_and_ready() {
    let app = setup_test_app().await;

    let (status, body) = send(app.router(), "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(app.router(), "GET", "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_protected_routes_require_access_token() {
    let app = setup_test_app().await;

    let (status, body) = send(app.router(), "GET", "/v1/bookings/1", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthenticated");

    let (status, _) = send(
        app.router(),
        "GET",
        "/v1/bookings/1",
        Some("not-a-jwt"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_availability_grid_is_public() {
    let app = setup_test_app().await;
    let service = app.fixed_service().await;

    let uri = format!("/v1/availability?service_id={}&date=2025-03-15", service.id);
    let (status, body) = send(app.router(), "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service_duration"], 60);
    let slots = body["available_slots"].as_array().unwrap();
    let two_pm = slots.iter().find(|s| s["time"] == "14:00").unwrap();
    assert_eq!(two_pm["available_workers"], 1);
    assert_eq!(two_pm["is_available"], true);

    let (status, body) = send(
        app.router(),
        "GET",
        "/v1/availability?service_id=9999&date=2025-03-15",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_losing_slot_race_returns_conflict_with_refreshed_grid() {
    let app = setup_test_app().await;
    let service = app.fixed_service().await;
    let other = app
        .add_user("Dev", "9000000010", fieldcore::UserType::Customer)
        .await;
    let request = json!({
        "service_id": service.id,
        "date": "2025-03-15",
        "time": "14:00",
        "address": {"city": "Siliguri"}
    });

    let token = app.token_for(&app.customer);
    let (status, body) = send(
        app.router(),
        "POST",
        "/v1/bookings",
        Some(&token),
        Some(request.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["booking"]["status"], "payment_pending");
    assert_eq!(body["payment_order"]["amount"], 180_000);

    let token = app.token_for(&other);
    let (status, body) = send(
        app.router(),
        "POST",
        "/v1/bookings",
        Some(&token),
        Some(request),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "slot_full");
    assert_eq!(body["error"], "slot no longer available");
    let slots = body["available_slots"].as_array().unwrap();
    let two_pm = slots.iter().find(|s| s["time"] == "14:00").unwrap();
    assert_eq!(two_pm["is_available"], false);
}

#[tokio::test]
async fn test_only_admins_provide_quotes_over_http() {
    let app = setup_test_app().await;
    let service = app.inquiry_service().await;
    let customer_token = app.token_for(&app.customer);

    let (status, inquiry) = send(
        app.router(),
        "POST",
        "/v1/inquiries",
        Some(&customer_token),
        Some(json!({"service_id": service.id, "notes": "kitchen"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = inquiry["id"].as_i64().unwrap();

    let uri = format!("/v1/bookings/{}/quote", id);
    let quote = json!({"amount": 2500, "expires_in_days": 3});
    let (status, body) = send(
        app.router(),
        "POST",
        &uri,
        Some(&customer_token),
        Some(quote.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "unauthorized");

    let admin_token = app.token_for(&app.admin);
    let (status, body) = send(app.router(), "POST", &uri, Some(&admin_token), Some(quote)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "quote_provided");

    let uri = format!("/v1/bookings/{}/quote/accept", id);
    let (status, body) = send(app.router(), "POST", &uri, Some(&customer_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "quote_accepted");
}

#[tokio::test]
async fn test_wallet_recharge_round_trip_over_http() {
    let app = setup_test_app().await;
    let token = app.token_for(&app.customer);

    let (status, body) = send(
        app.router(),
        "POST",
        "/v1/wallet/recharge",
        Some(&token),
        Some(json!({"amount": 50})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");

    let (status, started) = send(
        app.router(),
        "POST",
        "/v1/wallet/recharge",
        Some(&token),
        Some(json!({"amount": 500})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = started["order"]["id"].as_str().unwrap().to_string();

    let verify = json!({
        "order_id": order_id,
        "payment_id": "pay_http",
        "signature": app.gateway.sign(&order_id, "pay_http"),
    });
    let (status, payment) = send(
        app.router(),
        "POST",
        "/v1/wallet/recharge/verify",
        Some(&token),
        Some(verify),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["status"], "completed");

    let (status, body) = send(app.router(), "GET", "/v1/wallet", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"].as_f64(), Some(500.0));
}

#[tokio::test]
async fn test_call_requires_active_masking() {
    let app = setup_test_app().await;
    let service = app.fixed_service().await;
    let booking = app.paid_booking(&service, "14:00").await;
    let token = app.token_for(&app.customer);
    let uri = format!("/v1/bookings/{}/call", booking.id);

    let (status, body) = send(app.router(), "POST", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "illegal_transition");

    let assignment = app
        .scheduling
        .assignments
        .assign(fieldcore::Actor::admin(app.admin.id), booking.id, None, None)
        .await
        .unwrap();
    app.scheduling
        .assignments
        .accept(app.worker.id, assignment.id, None)
        .await
        .unwrap();

    let (status, body) = send(app.router(), "POST", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["booking_id"], booking.id);
    assert_eq!(app.masking.calls().len(), 1);
}
