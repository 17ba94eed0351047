//! BookingCore: creation with capacity reservation, payment verification,
//! cancellation and hold expiry.

use super::availability::{AvailabilityService, ServiceTiming};
use super::comms::CommsCore;
use super::notify::{Notification, NotificationKind};
use super::tracking::LocationTracker;
use super::CoreContext;
use crate::db::{BookingPatch, CancelOutcome, NewBooking, NewPayment, RefundIntent};
use crate::domain::payment::new_reference;
use crate::domain::{
    parse_date, Actor, Booking, BookingAddress, BookingStatus, BookingType, Money, PaymentMethod,
    PaymentStatus, PaymentType, SlotTime,
};
use crate::error::CoreError;
use crate::integrations::GatewayOrder;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBooking {
    pub service_id: i64,
    pub date: String,
    pub time: String,
    #[serde(default)]
    pub address: BookingAddress,
    pub contact_phone: Option<String>,
    pub notes: Option<String>,
    /// Ignored for fixed-price services, which always charge the list price.
    pub amount: Option<Money>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInquiry {
    pub service_id: i64,
    #[serde(default)]
    pub address: BookingAddress,
    pub contact_phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingCreated {
    pub booking: Booking,
    pub payment_order: Option<GatewayOrder>,
}

/// What the checkout hands back after a successful payment.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentProof {
    pub payment_id: String,
    pub signature: String,
}

/// What the sweeper did with a lapsed hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldExpiry {
    /// `payment_pending` moved to `cancelled`.
    Cancelled,
    /// Unpaid `pending` moved to `expired`.
    Expired,
    /// An accepted quote lost its schedule and stays `quote_accepted`.
    Released,
}

#[derive(Clone)]
pub struct BookingCore {
    ctx: CoreContext,
    availability: AvailabilityService,
    comms: CommsCore,
    tracker: LocationTracker,
}

impl BookingCore {
    pub fn new(
        ctx: CoreContext,
        availability: AvailabilityService,
        comms: CommsCore,
        tracker: LocationTracker,
    ) -> Self {
        Self {
            ctx,
            availability,
            comms,
            tracker,
        }
    }

    async fn active_timing(&self, service_id: i64) -> Result<ServiceTiming, CoreError> {
        let timing = self.availability.timing(service_id).await?;
        if !timing.service.is_active {
            return Err(CoreError::InvalidInput(format!(
                "service {} is not active",
                service_id
            )));
        }
        Ok(timing)
    }

    /// Create a regular booking holding one capacity unit.
    ///
    /// Fixed-price services additionally get a gateway order and move to
    /// `payment_pending`; other services stay `pending` until an admin
    /// confirms them.
    ///
    /// # Errors
    /// `SlotFull` when the window has no free unit; `InvalidInput` for bad
    /// dates, times or past starts.
    pub async fn create(&self, user_id: i64, req: CreateBooking) -> Result<BookingCreated, CoreError> {
        let timing = self.active_timing(req.service_id).await?;
        let date = parse_date(&req.date)?;
        let start: SlotTime = req.time.parse()?;
        timing.validate_start(start)?;
        let end = timing.end_time(start)?;

        let now = self.ctx.now();
        let zone = self.ctx.clock.zone();
        let starts_at = zone
            .to_utc(date, start)
            .ok_or_else(|| CoreError::InvalidInput(format!("{} {} does not exist", req.date, start)))?;
        if starts_at <= now {
            return Err(CoreError::InvalidInput(format!(
                "{} {} is in the past",
                req.date, start
            )));
        }

        let fixed = timing.service.is_fixed_price();
        let amount = if fixed {
            timing.service.price
        } else {
            req.amount
        };
        if fixed && amount.map_or(true, |a| !a.is_positive()) {
            return Err(CoreError::Internal(format!(
                "fixed-price service {} has no price",
                timing.service.id
            )));
        }

        let hold = now + self.ctx.settings.hold_ttl().await?;
        let booking = self
            .ctx
            .repo
            .insert_booking_with_capacity(
                &NewBooking {
                    reference: new_reference("BK"),
                    user_id,
                    service_id: timing.service.id,
                    booking_type: BookingType::Regular,
                    status: BookingStatus::Pending,
                    scheduled_date: Some(date),
                    scheduled_time: Some(start),
                    scheduled_end_time: Some(end),
                    buffer_minutes: timing.buffer_minutes,
                    address: req.address,
                    contact_phone: req.contact_phone,
                    notes: req.notes,
                    amount,
                    hold_expires_at: Some(hold),
                },
                timing.claim(date, start),
                now,
            )
            .await?;
        info!(
            booking_id = booking.id,
            reference = %booking.reference,
            date = %req.date,
            start = %start,
            "Booking created with capacity hold"
        );

        let (booking, payment_order) = match amount.filter(|_| fixed) {
            Some(amount) => {
                let (booking, order) = self.open_payment(booking, amount).await?;
                (booking, Some(order))
            }
            None => (booking, None),
        };

        self.ctx
            .notify(
                Notification::new(
                    user_id,
                    NotificationKind::BookingCreated,
                    format!("Booking {} created", booking.reference),
                )
                .for_booking(booking.id),
            )
            .await;
        Ok(BookingCreated {
            booking,
            payment_order,
        })
    }

    /// Create the gateway order and pending payment, then move the booking
    /// to `payment_pending`. A gateway failure releases the hold at once.
    async fn open_payment(
        &self,
        booking: Booking,
        amount: Money,
    ) -> Result<(Booking, GatewayOrder), CoreError> {
        let paise = amount
            .to_paise()
            .ok_or_else(|| CoreError::InvalidInput(format!("amount {} out of range", amount)))?;

        let order = match self
            .ctx
            .gateway
            .create_order(paise, &booking.reference, "booking")
            .await
        {
            Ok(order) => order,
            Err(e) => {
                warn!(booking_id = booking.id, error = %e, "Gateway order failed, releasing hold");
                let now = self.ctx.now();
                self.ctx
                    .repo
                    .cancel_booking(
                        booking.id,
                        &[BookingStatus::Pending],
                        BookingPatch::new()
                            .cancelled(now, "payment order failed")
                            .clear_hold(),
                        now,
                    )
                    .await?;
                return Err(e.into());
            }
        };

        let now = self.ctx.now();
        self.ctx
            .repo
            .insert_payment(
                &NewPayment {
                    reference: new_reference("PAY"),
                    user_id: booking.user_id,
                    amount,
                    payment_type: PaymentType::Booking,
                    method: PaymentMethod::Razorpay,
                    status: PaymentStatus::Pending,
                    related_entity_type: Some("booking".into()),
                    related_entity_id: Some(booking.id),
                    order_id: Some(order.id.clone()),
                    metadata: serde_json::json!({ "booking_ref": booking.reference }),
                },
                now,
            )
            .await?;

        let booking = self
            .ctx
            .repo
            .transition_booking(
                booking.id,
                &[BookingStatus::Pending],
                BookingStatus::PaymentPending,
                BookingPatch::new()
                    .order(&order.id)
                    .payment_status(PaymentStatus::Pending),
                now,
            )
            .await?;
        Ok((booking, order))
    }

    /// Record an inquiry. Inquiries hold no capacity until a quote is paid.
    pub async fn create_inquiry(&self, user_id: i64, req: CreateInquiry) -> Result<Booking, CoreError> {
        let timing = self.active_timing(req.service_id).await?;
        if timing.service.is_fixed_price() {
            return Err(CoreError::InvalidInput(format!(
                "service {} has a fixed price, book it directly",
                req.service_id
            )));
        }

        let booking = self
            .ctx
            .repo
            .insert_booking(
                &NewBooking {
                    reference: new_reference("BK"),
                    user_id,
                    service_id: timing.service.id,
                    booking_type: BookingType::Inquiry,
                    status: BookingStatus::Pending,
                    scheduled_date: None,
                    scheduled_time: None,
                    scheduled_end_time: None,
                    buffer_minutes: timing.buffer_minutes,
                    address: req.address,
                    contact_phone: req.contact_phone,
                    notes: req.notes,
                    amount: None,
                    hold_expires_at: None,
                },
                self.ctx.now(),
            )
            .await?;
        info!(booking_id = booking.id, "Inquiry created");
        Ok(booking)
    }

    /// Any party to the booking may read it: owner, admin, or the worker
    /// currently assigned.
    pub async fn get(&self, actor: Actor, booking_id: i64) -> Result<Booking, CoreError> {
        let booking = self.ctx.require_booking(booking_id).await?;
        if actor.is_admin() || booking.is_owned_by(actor.user_id) {
            return Ok(booking);
        }
        let assigned = self
            .ctx
            .repo
            .active_assignment_for_booking(booking_id)
            .await?
            .map_or(false, |a| a.worker_id == actor.user_id);
        if assigned {
            return Ok(booking);
        }
        Err(CoreError::Unauthorized(format!(
            "booking {} belongs to another user",
            booking_id
        )))
    }

    /// Verify the checkout signature and confirm a `payment_pending` booking.
    ///
    /// A bad signature leaves the booking untouched for the sweeper.
    pub async fn verify_payment(
        &self,
        actor: Actor,
        booking_id: i64,
        proof: PaymentProof,
    ) -> Result<Booking, CoreError> {
        let booking = self.ctx.owned_booking(actor, booking_id).await?;
        self.settle_gateway_payment(booking, BookingStatus::PaymentPending, proof)
            .await
    }

    /// Shared tail of booking and quote payment verification.
    ///
    /// The booking moves from `from` to `confirmed` under the capacity
    /// lock. When its hold lapsed and the slot was taken meanwhile, the
    /// paid booking is cancelled with a refund and `SlotFull` is returned.
    pub(crate) async fn settle_gateway_payment(
        &self,
        booking: Booking,
        from: BookingStatus,
        proof: PaymentProof,
    ) -> Result<Booking, CoreError> {
        if booking.status != from {
            return Err(CoreError::IllegalTransition(format!(
                "booking {} is {}, expected {}",
                booking.id, booking.status, from
            )));
        }
        let order_id = booking.payment_order_id.clone().ok_or_else(|| {
            CoreError::IllegalTransition(format!("booking {} has no open payment order", booking.id))
        })?;
        let (Some(date), Some(start)) = (booking.scheduled_date, booking.scheduled_time) else {
            return Err(CoreError::IllegalTransition(format!(
                "booking {} has no schedule",
                booking.id
            )));
        };

        if !self
            .ctx
            .gateway
            .verify(&order_id, &proof.payment_id, &proof.signature)
        {
            warn!(booking_id = booking.id, %order_id, "Payment signature mismatch");
            return Err(CoreError::PaymentVerificationFailed(format!(
                "signature does not match order {}",
                order_id
            )));
        }

        let timing = self.availability.timing(booking.service_id).await?;
        let now = self.ctx.now();
        let paid = BookingPatch::new().payment_completed(&proof.payment_id, now);

        let result = self
            .ctx
            .repo
            .transition_booking_with_capacity(
                booking.id,
                &[from],
                BookingStatus::Confirmed,
                paid.clone().clear_hold(),
                timing.claim(date, start),
                now,
            )
            .await;
        self.settle_payment_row(&order_id, &proof).await;

        match result {
            Ok(confirmed) => {
                info!(booking_id = confirmed.id, "Payment verified, booking confirmed");
                self.ctx
                    .notify(
                        Notification::new(
                            confirmed.user_id,
                            NotificationKind::BookingConfirmed,
                            format!("Booking {} confirmed", confirmed.reference),
                        )
                        .for_booking(confirmed.id),
                    )
                    .await;
                Ok(confirmed)
            }
            Err(CoreError::SlotFull(slot)) => {
                warn!(
                    booking_id = booking.id,
                    %slot,
                    "Hold lapsed and slot was taken before payment, refunding"
                );
                let outcome = self
                    .ctx
                    .repo
                    .cancel_booking(
                        booking.id,
                        &[from],
                        paid.cancelled(now, "slot taken after hold expiry").clear_hold(),
                        now,
                    )
                    .await?;
                self.after_cancel(&outcome).await;
                Err(CoreError::SlotFull(slot))
            }
            Err(e) => Err(e),
        }
    }

    /// Mark the pending payment row for `order_id` completed. The booking
    /// row is authoritative, so a failure here is logged only.
    async fn settle_payment_row(&self, order_id: &str, proof: &PaymentProof) {
        let payment = match self.ctx.repo.get_payment_by_order(order_id).await {
            Ok(Some(p)) if p.status == PaymentStatus::Pending => p,
            Ok(_) => return,
            Err(e) => {
                warn!(%order_id, error = %e, "Could not load payment row");
                return;
            }
        };
        if let Err(e) = self
            .ctx
            .repo
            .complete_payment(
                payment.id,
                Some(&proof.payment_id),
                Some(&proof.signature),
                self.ctx.now(),
            )
            .await
        {
            warn!(payment_id = payment.id, error = %e, "Could not complete payment row");
        }
    }

    /// Admin confirmation of an unpaid `pending` booking (no gateway).
    pub async fn confirm(&self, actor: Actor, booking_id: i64) -> Result<Booking, CoreError> {
        if !actor.is_admin() {
            return Err(CoreError::Unauthorized("only admins confirm bookings".into()));
        }
        let booking = self.ctx.require_booking(booking_id).await?;
        let (Some(date), Some(start)) = (booking.scheduled_date, booking.scheduled_time) else {
            return Err(CoreError::IllegalTransition(format!(
                "booking {} has no schedule",
                booking_id
            )));
        };
        let timing = self.availability.timing(booking.service_id).await?;
        let now = self.ctx.now();
        let confirmed = self
            .ctx
            .repo
            .transition_booking_with_capacity(
                booking_id,
                &[BookingStatus::Pending],
                BookingStatus::Confirmed,
                BookingPatch::new().clear_hold(),
                timing.claim(date, start),
                now,
            )
            .await?;
        self.ctx
            .notify(
                Notification::new(
                    confirmed.user_id,
                    NotificationKind::BookingConfirmed,
                    format!("Booking {} confirmed", confirmed.reference),
                )
                .for_booking(confirmed.id),
            )
            .await;
        Ok(confirmed)
    }

    /// Cancel from any non-terminal status; the owner or an admin may cancel.
    ///
    /// Releases the capacity unit, rejects an active assignment and records
    /// a refund intent when the booking was paid.
    pub async fn cancel(
        &self,
        actor: Actor,
        booking_id: i64,
        reason: Option<String>,
    ) -> Result<Booking, CoreError> {
        self.ctx.owned_booking(actor, booking_id).await?;
        let now = self.ctx.now();
        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "cancelled by user".to_string());

        let outcome = self
            .ctx
            .repo
            .cancel_booking(
                booking_id,
                BookingStatus::NON_TERMINAL,
                BookingPatch::new().cancelled(now, &reason).clear_hold(),
                now,
            )
            .await?;
        info!(booking_id, %reason, "Booking cancelled");
        self.after_cancel(&outcome).await;

        self.ctx
            .notify(
                Notification::new(
                    outcome.booking.user_id,
                    NotificationKind::BookingCancelled,
                    format!("Booking {} cancelled", outcome.booking.reference),
                )
                .for_booking(booking_id),
            )
            .await;
        Ok(outcome.booking)
    }

    async fn after_cancel(&self, outcome: &CancelOutcome) {
        if let Some(assignment_id) = outcome.rejected_assignment {
            self.comms
                .shut_down(outcome.booking.id, "booking cancelled")
                .await;
            match self.ctx.repo.get_assignment(assignment_id).await {
                Ok(Some(assignment)) => {
                    self.tracker.announce_stopped(&assignment).await;
                }
                Ok(None) => warn!(assignment_id, "Cancelled assignment vanished"),
                Err(e) => warn!(assignment_id, error = %e, "Could not load cancelled assignment"),
            }
        }
        if let Some(intent) = &outcome.refund {
            self.request_refund(intent).await;
        }
    }

    /// Best-effort refund; the intent row records the outcome.
    async fn request_refund(&self, intent: &RefundIntent) {
        let Some(payment_id) = intent.payment_id.as_deref() else {
            info!(refund_id = intent.id, "Refund recorded without gateway payment id");
            return;
        };
        let Some(paise) = intent.amount.to_paise() else {
            warn!(refund_id = intent.id, amount = %intent.amount, "Refund amount out of range");
            return;
        };

        let status = match self.ctx.gateway.refund(payment_id, paise).await {
            Ok(refund_id) => {
                info!(booking_id = intent.booking_id, %refund_id, "Refund requested");
                "requested"
            }
            Err(e) => {
                warn!(booking_id = intent.booking_id, error = %e, "Refund request failed");
                "failed"
            }
        };
        if let Err(e) = self.ctx.repo.mark_refund_intent(intent.id, status).await {
            warn!(refund_id = intent.id, error = %e, "Could not update refund intent");
        }
    }

    /// Expire one lapsed hold. The status guard makes a concurrent payment
    /// or a second sweeper run lose cleanly with `IllegalTransition`.
    pub async fn expire_hold(&self, booking: &Booking) -> Result<HoldExpiry, CoreError> {
        let now = self.ctx.now();
        if !booking.hold_expired_at(now) {
            return Err(CoreError::IllegalTransition(format!(
                "booking {} hold has not lapsed",
                booking.id
            )));
        }

        match booking.status {
            BookingStatus::PaymentPending => {
                let outcome = self
                    .ctx
                    .repo
                    .cancel_booking(
                        booking.id,
                        &[BookingStatus::PaymentPending],
                        BookingPatch::new()
                            .cancelled(now, "payment timeout")
                            .clear_hold()
                            .clear_order()
                            .payment_status(PaymentStatus::Expired),
                        now,
                    )
                    .await?;
                self.ctx
                    .notify(
                        Notification::new(
                            outcome.booking.user_id,
                            NotificationKind::BookingCancelled,
                            format!("Booking {} cancelled: payment not received", outcome.booking.reference),
                        )
                        .for_booking(booking.id),
                    )
                    .await;
                Ok(HoldExpiry::Cancelled)
            }
            BookingStatus::Pending => {
                let expired = self
                    .ctx
                    .repo
                    .transition_booking(
                        booking.id,
                        &[BookingStatus::Pending],
                        BookingStatus::Expired,
                        BookingPatch::new().clear_hold(),
                        now,
                    )
                    .await?;
                self.ctx.repo.expire_booking_payments(booking.id).await?;
                self.ctx
                    .notify(
                        Notification::new(
                            expired.user_id,
                            NotificationKind::BookingExpired,
                            format!("Booking {} expired", expired.reference),
                        )
                        .for_booking(booking.id),
                    )
                    .await;
                Ok(HoldExpiry::Expired)
            }
            BookingStatus::QuoteAccepted => {
                self.ctx
                    .repo
                    .transition_booking(
                        booking.id,
                        &[BookingStatus::QuoteAccepted],
                        BookingStatus::QuoteAccepted,
                        BookingPatch::new()
                            .clear_schedule()
                            .clear_hold()
                            .clear_order()
                            .payment_status(PaymentStatus::Pending),
                        now,
                    )
                    .await?;
                self.ctx.repo.expire_booking_payments(booking.id).await?;
                Ok(HoldExpiry::Released)
            }
            other => Err(CoreError::IllegalTransition(format!(
                "booking {} is {}, no hold to expire",
                booking.id, other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::domain::UserType;
    use crate::scheduling::test_support::{harness, service_with_duration, Harness};
    use chrono::Duration;

    fn request(service_id: i64, time: &str) -> CreateBooking {
        CreateBooking {
            service_id,
            date: "2025-03-15".into(),
            time: time.into(),
            address: BookingAddress::default(),
            contact_phone: None,
            notes: None,
            amount: None,
        }
    }

    async fn paid_booking(h: &Harness) -> Booking {
        let service = service_with_duration(h, Some(60)).await;
        let created = h
            .scheduling
            .bookings
            .create(h.customer.id, request(service.id, "14:00"))
            .await
            .unwrap();
        let order = created.payment_order.unwrap();
        h.scheduling
            .bookings
            .verify_payment(
                Actor::customer(h.customer.id),
                created.booking.id,
                PaymentProof {
                    payment_id: "pay_1".into(),
                    signature: h.gateway.sign(&order.id, "pay_1"),
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fixed_price_booking_opens_payment() {
        let h = harness().await;
        let service = service_with_duration(&h, Some(60)).await;
        let created = h
            .scheduling
            .bookings
            .create(h.customer.id, request(service.id, "14:00"))
            .await
            .unwrap();

        assert_eq!(created.booking.status, BookingStatus::PaymentPending);
        assert!(created.booking.reference.starts_with("BK"));
        let order = created.payment_order.unwrap();
        assert_eq!(order.amount, 180_000);
        assert_eq!(created.booking.payment_order_id.as_deref(), Some(order.id.as_str()));
        assert_eq!(
            created.booking.hold_expires_at,
            Some(h.clock.now() + Duration::minutes(15))
        );
    }

    #[tokio::test]
    async fn test_past_and_out_of_hours_starts_are_rejected() {
        let h = harness().await;
        let service = service_with_duration(&h, Some(60)).await;
        for time in ["10:00", "21:30", "7:00"] {
            let err = h
                .scheduling
                .bookings
                .create(h.customer.id, request(service.id, time))
                .await
                .unwrap_err();
            assert!(matches!(err, CoreError::InvalidInput(_)), "{}", time);
        }
    }

    #[tokio::test]
    async fn test_bad_signature_keeps_booking_pending() {
        let h = harness().await;
        let service = service_with_duration(&h, Some(60)).await;
        let created = h
            .scheduling
            .bookings
            .create(h.customer.id, request(service.id, "14:00"))
            .await
            .unwrap();

        let err = h
            .scheduling
            .bookings
            .verify_payment(
                Actor::customer(h.customer.id),
                created.booking.id,
                PaymentProof {
                    payment_id: "pay_1".into(),
                    signature: "deadbeef".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PaymentVerificationFailed(_)));

        let booking = h.repo.get_booking(created.booking.id).await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::PaymentPending);
    }

    #[tokio::test]
    async fn test_verify_confirms_and_completes_payment_row() {
        let h = harness().await;
        let booking = paid_booking(&h).await;

        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.payment_status, PaymentStatus::Completed);
        assert_eq!(booking.payment_id.as_deref(), Some("pay_1"));
        assert!(booking.hold_expires_at.is_none());

        let payments = h.repo.list_payments_for_entity("booking", booking.id).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_verify_after_lapsed_hold_and_lost_slot_refunds() {
        let h = harness().await;
        let service = service_with_duration(&h, Some(60)).await;
        let first = h
            .scheduling
            .bookings
            .create(h.customer.id, request(service.id, "14:00"))
            .await
            .unwrap();

        h.clock.advance(Duration::minutes(16));
        let rival = h
            .repo
            .insert_user("Rival", "9000000009", UserType::Customer, h.clock.now())
            .await
            .unwrap();
        h.scheduling
            .bookings
            .create(rival.id, request(service.id, "14:00"))
            .await
            .unwrap();

        let order = first.payment_order.unwrap();
        let err = h
            .scheduling
            .bookings
            .verify_payment(
                Actor::customer(h.customer.id),
                first.booking.id,
                PaymentProof {
                    payment_id: "pay_late".into(),
                    signature: h.gateway.sign(&order.id, "pay_late"),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SlotFull(_)));

        let booking = h.repo.get_booking(first.booking.id).await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Cancelled);
        let refunds = h.repo.list_refund_intents(booking.id).await.unwrap();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].amount, Money::from_rupees(1800));
        assert_eq!(h.gateway.refunds(), vec![("pay_late".to_string(), 180_000)]);
    }

    #[tokio::test]
    async fn test_cancel_paid_booking_records_and_requests_refund() {
        let h = harness().await;
        let booking = paid_booking(&h).await;

        let cancelled = h
            .scheduling
            .bookings
            .cancel(Actor::customer(h.customer.id), booking.id, None)
            .await
            .unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);

        let refunds = h.repo.list_refund_intents(booking.id).await.unwrap();
        assert_eq!(refunds[0].status, "requested");
        assert_eq!(h.gateway.refunds().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_by_stranger_is_unauthorized() {
        let h = harness().await;
        let booking = paid_booking(&h).await;
        let err = h
            .scheduling
            .bookings
            .cancel(Actor::customer(h.worker.id), booking.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_gateway_outage_releases_capacity() {
        let h = harness().await;
        let service = service_with_duration(&h, Some(60)).await;
        h.gateway.set_unavailable(true);
        let err = h
            .scheduling
            .bookings
            .create(h.customer.id, request(service.id, "14:00"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ExternalUnavailable(_)));

        h.gateway.set_unavailable(false);
        let retry = h
            .scheduling
            .bookings
            .create(h.customer.id, request(service.id, "14:00"))
            .await
            .unwrap();
        assert_eq!(retry.booking.status, BookingStatus::PaymentPending);
    }
}
