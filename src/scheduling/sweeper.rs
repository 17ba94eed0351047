//! Periodic cleanup of lapsed holds, quotes and wallet recharges.

use super::booking::{BookingCore, HoldExpiry};
use super::quote::QuoteCore;
use super::CoreContext;
use crate::domain::BookingStatus;
use crate::error::CoreError;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shortest allowed period between sweeps.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub cancelled_holds: u32,
    pub expired_holds: u32,
    pub released_schedules: u32,
    pub expired_quotes: u32,
    pub abandoned_recharges: u64,
    pub failures: u32,
    /// Another sweep was already running.
    pub skipped: bool,
}

#[derive(Clone)]
pub struct Sweeper {
    ctx: CoreContext,
    bookings: BookingCore,
    quotes: QuoteCore,
    running: Arc<AtomicBool>,
}

/// Clears the running flag however the sweep ends.
struct Lease(Arc<AtomicBool>);

impl Drop for Lease {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Sweeper {
    pub fn new(ctx: CoreContext, bookings: BookingCore, quotes: QuoteCore) -> Self {
        Self {
            ctx,
            bookings,
            quotes,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// One pass. Per-entity failures are logged and counted; only a failure
    /// to list work aborts the run.
    pub async fn run_once(&self) -> Result<SweepReport, CoreError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sweep already running, skipping");
            return Ok(SweepReport {
                skipped: true,
                ..Default::default()
            });
        }
        let _lease = Lease(self.running.clone());

        let now = self.ctx.now();
        let mut report = SweepReport::default();

        let lapsed = self
            .ctx
            .repo
            .list_expired_holds(
                &[
                    BookingStatus::PaymentPending,
                    BookingStatus::Pending,
                    BookingStatus::QuoteAccepted,
                ],
                now,
            )
            .await?;
        for booking in lapsed {
            match self.bookings.expire_hold(&booking).await {
                Ok(HoldExpiry::Cancelled) => report.cancelled_holds += 1,
                Ok(HoldExpiry::Expired) => report.expired_holds += 1,
                Ok(HoldExpiry::Released) => report.released_schedules += 1,
                // Settled by a concurrent verification between list and update.
                Err(CoreError::IllegalTransition(reason)) => {
                    debug!(booking_id = booking.id, %reason, "Hold already resolved");
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(booking_id = booking.id, error = %e, "Failed to expire hold");
                }
            }
        }

        for booking in self.ctx.repo.list_expired_quotes(now).await? {
            match self.quotes.expire(&booking).await {
                Ok(_) => report.expired_quotes += 1,
                Err(CoreError::IllegalTransition(reason)) => {
                    debug!(booking_id = booking.id, %reason, "Quote already resolved");
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(booking_id = booking.id, error = %e, "Failed to expire quote");
                }
            }
        }

        let timeout = self.ctx.settings.wallet_payment_timeout().await?;
        match self.ctx.repo.abandon_stale_recharges(now - timeout).await {
            Ok(n) => report.abandoned_recharges = n,
            Err(e) => {
                report.failures += 1;
                warn!(error = %e, "Failed to abandon stale recharges");
            }
        }

        info!(
            cancelled_holds = report.cancelled_holds,
            expired_holds = report.expired_holds,
            released_schedules = report.released_schedules,
            expired_quotes = report.expired_quotes,
            abandoned_recharges = report.abandoned_recharges,
            failures = report.failures,
            "Sweep finished"
        );
        Ok(report)
    }

    /// Run forever at `interval`, never faster than every five minutes.
    pub fn spawn(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let sweeper = self.clone();
        let period = interval.max(MIN_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = sweeper.run_once().await {
                    error!(error = %e, "Sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Actor, Money, PaymentStatus};
    use crate::scheduling::booking::{CreateBooking, CreateInquiry};
    use crate::scheduling::quote::ProvideQuote;
    use crate::scheduling::test_support::{harness, inquiry_service, service_with_duration};
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_unpaid_booking_is_cancelled_and_slot_freed() {
        let h = harness().await;
        let service = service_with_duration(&h, Some(60)).await;
        let created = h
            .scheduling
            .bookings
            .create(
                h.customer.id,
                CreateBooking {
                    service_id: service.id,
                    date: "2025-03-15".into(),
                    time: "14:00".into(),
                    address: Default::default(),
                    contact_phone: None,
                    notes: None,
                    amount: None,
                },
            )
            .await
            .unwrap();

        let early = h.scheduling.sweeper.run_once().await.unwrap();
        assert_eq!(early.cancelled_holds, 0);

        h.clock.advance(ChronoDuration::minutes(16));
        let report = h.scheduling.sweeper.run_once().await.unwrap();
        assert_eq!(report.cancelled_holds, 1);
        assert_eq!(report.failures, 0);

        let booking = h.repo.get_booking(created.booking.id).await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Cancelled);
        assert_eq!(booking.payment_status, PaymentStatus::Expired);

        let grid = h
            .scheduling
            .availability
            .slot_grid(service.id, "2025-03-15")
            .await
            .unwrap();
        assert!(grid.slot("14:00".parse().unwrap()).unwrap().is_available);

        // A second pass finds nothing left to do.
        let again = h.scheduling.sweeper.run_once().await.unwrap();
        assert_eq!(again, SweepReport::default());
    }

    #[tokio::test]
    async fn test_lapsed_quote_returns_to_pending() {
        let h = harness().await;
        let service = inquiry_service(&h).await;
        let inquiry = h
            .scheduling
            .bookings
            .create_inquiry(
                h.customer.id,
                CreateInquiry {
                    service_id: service.id,
                    address: Default::default(),
                    contact_phone: None,
                    notes: None,
                },
            )
            .await
            .unwrap();
        h.scheduling
            .quotes
            .provide(
                Actor::admin(h.admin.id),
                inquiry.id,
                ProvideQuote {
                    amount: Money::from_rupees(900),
                    notes: None,
                    expires_in_days: Some(1),
                },
            )
            .await
            .unwrap();

        h.clock.advance(ChronoDuration::days(1) + ChronoDuration::minutes(1));
        let report = h.scheduling.sweeper.run_once().await.unwrap();
        assert_eq!(report.expired_quotes, 1);
        let booking = h.repo.get_booking(inquiry.id).await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);
        assert!(booking.quote.is_none());
    }

    #[tokio::test]
    async fn test_stale_recharges_are_abandoned() {
        let h = harness().await;
        let started = h
            .scheduling
            .wallet
            .recharge(h.customer.id, Money::from_rupees(500))
            .await
            .unwrap();

        h.clock.advance(ChronoDuration::minutes(31));
        let report = h.scheduling.sweeper.run_once().await.unwrap();
        assert_eq!(report.abandoned_recharges, 1);
        let payment = h.repo.get_payment(started.payment.id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Abandoned);
    }
}
