mod common;

use chrono::{Duration, NaiveDate};
use common::{setup_test_app, TestApp};
use fieldcore::domain::{
    Actor, Booking, BookingStatus, BookingType, Money, PaymentStatus, PaymentType,
};
use fieldcore::scheduling::{CreateInquiry, PayQuote, PaymentProof, ProvideQuote};
use fieldcore::CoreError;

async fn inquiry(app: &TestApp) -> Booking {
    let service = app.inquiry_service().await;
    app.scheduling
        .bookings
        .create_inquiry(
            app.customer.id,
            CreateInquiry {
                service_id: service.id,
                address: Default::default(),
                contact_phone: None,
                notes: Some("two bedrooms".to_string()),
            },
        )
        .await
        .unwrap()
}

async fn provide(app: &TestApp, booking_id: i64, rupees: i64) -> Booking {
    app.scheduling
        .quotes
        .provide(
            Actor::admin(app.admin.id),
            booking_id,
            ProvideQuote {
                amount: Money::from_rupees(rupees),
                notes: None,
                expires_in_days: Some(3),
            },
        )
        .await
        .unwrap()
}

fn pay_request(rupees: i64) -> PayQuote {
    PayQuote {
        amount: Money::from_rupees(rupees),
        date: "2025-04-01".to_string(),
        time: "10:30".to_string(),
    }
}

#[tokio::test]
async fn test_quote_happy_path_confirms_scheduled_booking() {
    let app = setup_test_app().await;
    let booking = inquiry(&app).await;
    assert_eq!(booking.booking_type, BookingType::Inquiry);
    assert_eq!(booking.status, BookingStatus::Pending);

    let quoted = provide(&app, booking.id, 2500).await;
    assert_eq!(quoted.status, BookingStatus::QuoteProvided);

    let customer = Actor::customer(app.customer.id);
    let quotes = &app.scheduling.quotes;
    let accepted = quotes.accept(customer, booking.id).await.unwrap();
    assert_eq!(accepted.status, BookingStatus::QuoteAccepted);

    let payment = quotes.pay(customer, booking.id, pay_request(2500)).await.unwrap();
    assert_eq!(payment.payment_order.amount, 250_000);
    assert_eq!(payment.booking.status, BookingStatus::QuoteAccepted);

    let payment_id = "pay_quote_42";
    let confirmed = quotes
        .verify(
            customer,
            booking.id,
            PaymentProof {
                payment_id: payment_id.to_string(),
                signature: app.gateway.sign(&payment.payment_order.id, payment_id),
            },
        )
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(
        confirmed.scheduled_date,
        Some(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap())
    );
    assert_eq!(confirmed.scheduled_time, Some("10:30".parse().unwrap()));
    assert_eq!(confirmed.payment_status, PaymentStatus::Completed);
}

#[tokio::test]
async fn test_quote_amount_mismatch_leaves_booking_accepted() {
    let app = setup_test_app().await;
    let booking = inquiry(&app).await;
    provide(&app, booking.id, 2500).await;
    let customer = Actor::customer(app.customer.id);
    app.scheduling.quotes.accept(customer, booking.id).await.unwrap();

    let err = app
        .scheduling
        .quotes
        .pay(customer, booking.id, pay_request(2000))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::QuoteMismatch(_)));

    let booking = app.repo.get_booking(booking.id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::QuoteAccepted);
    assert!(booking.scheduled_date.is_none());
    assert!(app.gateway.orders().is_empty());
}

#[tokio::test]
async fn test_rejected_then_requoted_inquiry_completes_round_trip() {
    let app = setup_test_app().await;
    let booking = inquiry(&app).await;
    let customer = Actor::customer(app.customer.id);
    let quotes = &app.scheduling.quotes;

    provide(&app, booking.id, 3000).await;
    let rejected = quotes.reject(customer, booking.id).await.unwrap();
    assert_eq!(rejected.status, BookingStatus::Pending);
    assert!(rejected.quote.is_none());

    provide(&app, booking.id, 2500).await;
    quotes.accept(customer, booking.id).await.unwrap();
    let payment = quotes.pay(customer, booking.id, pay_request(2500)).await.unwrap();
    let confirmed = quotes
        .verify(
            customer,
            booking.id,
            PaymentProof {
                payment_id: "pay_rt".to_string(),
                signature: app.gateway.sign(&payment.payment_order.id, "pay_rt"),
            },
        )
        .await
        .unwrap();

    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    let quote = confirmed.quote.unwrap();
    assert_eq!(quote.amount, Money::from_rupees(2500));
    assert_eq!(quote.provided_by, app.admin.id);
    assert!(quote.accepted_at.is_some());

    let payments = app
        .repo
        .list_payments_for_entity("booking", booking.id)
        .await
        .unwrap();
    let completed: Vec<_> = payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Completed)
        .collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].payment_type, PaymentType::Booking);
    assert_eq!(completed[0].amount, Money::from_rupees(2500));
}

#[tokio::test]
async fn test_unpaid_quote_schedule_is_released_by_sweeper() {
    let app = setup_test_app().await;
    let booking = inquiry(&app).await;
    let customer = Actor::customer(app.customer.id);
    provide(&app, booking.id, 2500).await;
    app.scheduling.quotes.accept(customer, booking.id).await.unwrap();
    app.scheduling
        .quotes
        .pay(customer, booking.id, pay_request(2500))
        .await
        .unwrap();

    app.clock.advance(Duration::minutes(20));
    let report = app.scheduling.sweeper.run_once().await.unwrap();
    assert_eq!(report.released_schedules, 1);

    let booking = app.repo.get_booking(booking.id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::QuoteAccepted);
    assert!(booking.scheduled_date.is_none());
    assert!(booking.quote.is_some());
}
