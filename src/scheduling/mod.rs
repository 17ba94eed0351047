//! Stateful scheduling cores wired over one store, clock and config source.
//!
//! This module provides:
//! - Availability queries and booking creation with capacity serialization
//! - The inquiry/quote pipeline and worker assignments
//! - Live location tracking with arrival detection
//! - Wallet movements, chat and masked calling
//! - The periodic sweeper that expires holds, quotes and recharges

pub mod assignment;
pub mod availability;
pub mod booking;
pub mod comms;
pub mod notify;
pub mod quote;
pub mod sweeper;
pub mod tracking;
pub mod wallet;

pub use assignment::{AssignmentCore, CompleteJob};
pub use availability::{AvailabilityService, ServiceTiming};
pub use booking::{BookingCore, BookingCreated, CreateBooking, CreateInquiry, HoldExpiry, PaymentProof};
pub use comms::{CallInitiated, CommsCore};
pub use notify::{Notification, NotificationKind, Notifier, RecordingNotifier, TracingNotifier};
pub use quote::{PayQuote, ProvideQuote, QuoteCore, QuotePayment};
pub use sweeper::{SweepReport, Sweeper};
pub use tracking::{LocationTracker, LocationView, TrackingEvent, TrackingStopped};
pub use wallet::{RechargeStarted, WalletCore};

use crate::clock::Clock;
use crate::db::Repository;
use crate::domain::{Actor, Booking, Coordinate};
use crate::error::CoreError;
use crate::integrations::{Geocoder, MaskingProvider, PaymentGateway};
use crate::settings::Settings;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Shared handles every core reads through.
#[derive(Clone)]
pub struct CoreContext {
    pub repo: Arc<Repository>,
    pub settings: Settings,
    pub clock: Arc<dyn Clock>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
}

impl CoreContext {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) async fn notify(&self, notification: Notification) {
        notify::dispatch(self.notifier.as_ref(), notification).await;
    }

    pub(crate) async fn require_booking(&self, id: i64) -> Result<Booking, CoreError> {
        self.repo
            .get_booking(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("booking {}", id)))
    }

    /// Load a booking the actor owns; admins may act on any booking.
    pub(crate) async fn owned_booking(&self, actor: Actor, id: i64) -> Result<Booking, CoreError> {
        let booking = self.require_booking(id).await?;
        if !actor.is_admin() && !booking.is_owned_by(actor.user_id) {
            return Err(CoreError::Unauthorized(format!(
                "booking {} belongs to another user",
                id
            )));
        }
        Ok(booking)
    }
}

/// Optional collaborators beyond the payment gateway.
#[derive(Clone)]
pub struct Collaborators {
    pub geocoder: Option<Arc<dyn Geocoder>>,
    pub masking: Option<Arc<dyn MaskingProvider>>,
    pub caller_ids: Vec<String>,
    /// Used when neither the address nor the geocoder yields a position.
    pub fallback_customer: Coordinate,
}

/// The wired core graph.
#[derive(Clone)]
pub struct Scheduling {
    pub ctx: CoreContext,
    pub availability: AvailabilityService,
    pub bookings: BookingCore,
    pub quotes: QuoteCore,
    pub assignments: AssignmentCore,
    pub tracker: LocationTracker,
    pub wallet: WalletCore,
    pub comms: CommsCore,
    pub sweeper: Sweeper,
}

impl Scheduling {
    pub fn new(ctx: CoreContext, collaborators: Collaborators) -> Self {
        let availability = AvailabilityService::new(ctx.clone());
        let comms = CommsCore::new(
            ctx.clone(),
            collaborators.masking,
            collaborators.caller_ids,
        );
        let tracker = LocationTracker::new(
            ctx.clone(),
            collaborators.geocoder,
            collaborators.fallback_customer,
        );
        let bookings = BookingCore::new(
            ctx.clone(),
            availability.clone(),
            comms.clone(),
            tracker.clone(),
        );
        let quotes = QuoteCore::new(ctx.clone(), availability.clone(), bookings.clone());
        let assignments = AssignmentCore::new(ctx.clone(), comms.clone(), tracker.clone());
        let wallet = WalletCore::new(ctx.clone());
        let sweeper = Sweeper::new(ctx.clone(), bookings.clone(), quotes.clone());

        Self {
            ctx,
            availability,
            bookings,
            quotes,
            assignments,
            tracker,
            wallet,
            comms,
            sweeper,
        }
    }
}
