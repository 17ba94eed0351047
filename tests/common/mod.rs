#![allow(dead_code)]

use chrono::{DateTime, Utc};
use fieldcore::api::{self, AppState};
use fieldcore::auth::{issue_access_token, JwtKeys};
use fieldcore::db::init_db;
use fieldcore::domain::{Actor, Booking, Coordinate, Money, PriceType, Service, User, UserType};
use fieldcore::integrations::{MockMaskingProvider, MockPaymentGateway};
use fieldcore::scheduling::{CreateBooking, PaymentProof, RecordingNotifier};
use fieldcore::{
    Collaborators, CoreContext, ManualClock, Repository, Scheduling, Settings, StaticSettings,
};
use std::sync::Arc;
use tempfile::TempDir;

pub const JWT_SECRET: &str = "integration-secret";

pub struct TestApp {
    pub scheduling: Scheduling,
    pub repo: Arc<Repository>,
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<MockPaymentGateway>,
    pub masking: Arc<MockMaskingProvider>,
    pub notifier: Arc<RecordingNotifier>,
    pub admin: User,
    pub worker: User,
    pub customer: User,
    _temp: TempDir,
}

/// 2025-03-15 11:00 IST.
pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-03-15T05:30:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// One admin, one worker (P = 1) and one customer over a fresh database.
pub async fn setup_test_app() -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");

    let repo = Arc::new(Repository::new(pool));
    let clock = Arc::new(ManualClock::new(t0()));
    let gateway = Arc::new(MockPaymentGateway::new("gateway_secret"));
    let masking = Arc::new(MockMaskingProvider::new());
    let notifier = Arc::new(RecordingNotifier::new());

    let ctx = CoreContext {
        repo: repo.clone(),
        settings: Settings::new(Arc::new(StaticSettings::new())),
        clock: clock.clone(),
        gateway: gateway.clone(),
        notifier: notifier.clone(),
    };
    let scheduling = Scheduling::new(
        ctx,
        Collaborators {
            geocoder: None,
            masking: Some(masking.clone()),
            caller_ids: vec!["08047112233".to_string(), "08047112244".to_string()],
            fallback_customer: Coordinate::new(26.7271, 88.3953).unwrap(),
        },
    );

    let admin = repo
        .insert_user("Admin", "9000000001", UserType::Admin, t0())
        .await
        .unwrap();
    let worker = repo
        .insert_user("Ravi", "9000000002", UserType::Worker, t0())
        .await
        .unwrap();
    let customer = repo
        .insert_user("Asha", "9000000003", UserType::Customer, t0())
        .await
        .unwrap();

    TestApp {
        scheduling,
        repo,
        clock,
        gateway,
        masking,
        notifier,
        admin,
        worker,
        customer,
        _temp: temp_dir,
    }
}

impl TestApp {
    pub fn router(&self) -> axum::Router {
        api::create_router(AppState::new(
            self.repo.clone(),
            self.scheduling.clone(),
            JWT_SECRET,
        ))
    }

    pub fn token_for(&self, user: &User) -> String {
        issue_access_token(
            &JwtKeys::new(JWT_SECRET),
            user.id,
            &user.phone,
            user.user_type,
            Utc::now(),
        )
        .unwrap()
    }

    pub async fn add_user(&self, name: &str, phone: &str, user_type: UserType) -> User {
        self.repo
            .insert_user(name, phone, user_type, t0())
            .await
            .unwrap()
    }

    /// Fixed-price service at 1800 taking an hour.
    pub async fn fixed_service(&self) -> Service {
        self.repo
            .insert_service(
                "Deep cleaning",
                Some(60),
                Some(Money::from_rupees(1800)),
                PriceType::Fixed,
            )
            .await
            .unwrap()
    }

    pub async fn inquiry_service(&self) -> Service {
        self.repo
            .insert_service("Renovation", Some(60), None, PriceType::Inquiry)
            .await
            .unwrap()
    }

    pub fn booking_request(service_id: i64, time: &str) -> CreateBooking {
        CreateBooking {
            service_id,
            date: "2025-03-15".to_string(),
            time: time.to_string(),
            address: Default::default(),
            contact_phone: None,
            notes: None,
            amount: None,
        }
    }

    /// Book and pay for `time` on 2025-03-15 as the customer.
    pub async fn paid_booking(&self, service: &Service, time: &str) -> Booking {
        let created = self
            .scheduling
            .bookings
            .create(self.customer.id, Self::booking_request(service.id, time))
            .await
            .unwrap();
        let order = created.payment_order.unwrap();
        let payment_id = format!("pay_{}", created.booking.id);
        self.scheduling
            .bookings
            .verify_payment(
                Actor::customer(self.customer.id),
                created.booking.id,
                PaymentProof {
                    signature: self.gateway.sign(&order.id, &payment_id),
                    payment_id,
                },
            )
            .await
            .unwrap()
    }
}
