//! QuoteCore: the inquiry pipeline from admin quote to paid confirmation.

use super::availability::AvailabilityService;
use super::booking::{BookingCore, PaymentProof};
use super::notify::{Notification, NotificationKind};
use super::CoreContext;
use crate::db::{BookingPatch, NewPayment};
use crate::domain::payment::new_reference;
use crate::domain::{
    parse_date, Actor, Booking, BookingStatus, BookingType, Money, PaymentMethod, PaymentStatus,
    PaymentType, Quote, SlotTime,
};
use crate::error::CoreError;
use crate::integrations::GatewayOrder;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct ProvideQuote {
    pub amount: Money,
    pub notes: Option<String>,
    /// Calendar days from now; the configured default when absent.
    pub expires_in_days: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayQuote {
    pub amount: Money,
    pub date: String,
    pub time: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotePayment {
    pub booking: Booking,
    pub payment_order: GatewayOrder,
}

#[derive(Clone)]
pub struct QuoteCore {
    ctx: CoreContext,
    availability: AvailabilityService,
    bookings: BookingCore,
}

impl QuoteCore {
    pub fn new(ctx: CoreContext, availability: AvailabilityService, bookings: BookingCore) -> Self {
        Self {
            ctx,
            availability,
            bookings,
        }
    }

    /// Admin prices a pending inquiry.
    pub async fn provide(
        &self,
        actor: Actor,
        booking_id: i64,
        req: ProvideQuote,
    ) -> Result<Booking, CoreError> {
        if !actor.is_admin() {
            return Err(CoreError::Unauthorized("only admins provide quotes".into()));
        }
        if !req.amount.is_positive() {
            return Err(CoreError::InvalidInput("quote amount must be positive".into()));
        }
        let booking = self.ctx.require_booking(booking_id).await?;
        if booking.booking_type != BookingType::Inquiry {
            return Err(CoreError::InvalidInput(format!(
                "booking {} is not an inquiry",
                booking_id
            )));
        }

        let days = match req.expires_in_days {
            Some(d) if d > 0 => d,
            Some(d) => {
                return Err(CoreError::InvalidInput(format!(
                    "expires_in_days must be positive, got {}",
                    d
                )))
            }
            None => self.ctx.settings.quote_default_expiry_days().await?,
        };

        let now = self.ctx.now();
        let quote = Quote {
            amount: req.amount,
            notes: req.notes,
            expires_at: Some(self.ctx.clock.zone().add_calendar_days(now, days)),
            provided_at: now,
            provided_by: actor.user_id,
            accepted_at: None,
        };
        let quoted = self
            .ctx
            .repo
            .transition_booking(
                booking_id,
                &[BookingStatus::Pending],
                BookingStatus::QuoteProvided,
                BookingPatch::new().quote(&quote),
                now,
            )
            .await?;
        info!(booking_id, amount = %req.amount, days, "Quote provided");

        self.ctx
            .notify(
                Notification::new(
                    quoted.user_id,
                    NotificationKind::QuoteProvided,
                    format!("Quote of {} ready for {}", req.amount, quoted.reference),
                )
                .for_booking(booking_id),
            )
            .await;
        Ok(quoted)
    }

    /// Customer accepts a live quote. An expired quote is rolled back to
    /// `pending` and reported as `QuoteExpired`.
    pub async fn accept(&self, actor: Actor, booking_id: i64) -> Result<Booking, CoreError> {
        let booking = self.ctx.owned_booking(actor, booking_id).await?;
        if booking.status != BookingStatus::QuoteProvided {
            return Err(CoreError::IllegalTransition(format!(
                "booking {} is {}, no quote to accept",
                booking_id, booking.status
            )));
        }
        let now = self.ctx.now();
        let valid = booking.quote.as_ref().map_or(false, |q| q.is_valid_at(now));
        if !valid {
            self.expire(&booking).await?;
            return Err(CoreError::QuoteExpired(format!(
                "quote for booking {} has expired",
                booking_id
            )));
        }

        self.ctx
            .repo
            .transition_booking(
                booking_id,
                &[BookingStatus::QuoteProvided],
                BookingStatus::QuoteAccepted,
                BookingPatch::new().quote_accepted(now),
                now,
            )
            .await
    }

    /// Customer declines; the inquiry returns to `pending` for a new quote.
    pub async fn reject(&self, actor: Actor, booking_id: i64) -> Result<Booking, CoreError> {
        self.ctx.owned_booking(actor, booking_id).await?;
        let now = self.ctx.now();
        let booking = self
            .ctx
            .repo
            .transition_booking(
                booking_id,
                &[BookingStatus::QuoteProvided],
                BookingStatus::Pending,
                BookingPatch::new().clear_quote(),
                now,
            )
            .await?;
        info!(booking_id, "Quote rejected");
        Ok(booking)
    }

    /// Schedule an accepted quote and open its payment.
    ///
    /// The slot is reserved under the capacity lock with a hold while the
    /// booking stays `quote_accepted`; verification confirms it.
    ///
    /// # Errors
    /// `QuoteMismatch` when `amount` differs from the quote; `InvalidInput`
    /// for a start that is not strictly in the future; `SlotFull`.
    pub async fn pay(
        &self,
        actor: Actor,
        booking_id: i64,
        req: PayQuote,
    ) -> Result<QuotePayment, CoreError> {
        let booking = self.ctx.owned_booking(actor, booking_id).await?;
        if booking.status != BookingStatus::QuoteAccepted {
            return Err(CoreError::IllegalTransition(format!(
                "booking {} is {}, quote not accepted",
                booking_id, booking.status
            )));
        }
        let quote = booking.quote.as_ref().ok_or_else(|| {
            CoreError::IllegalTransition(format!("booking {} has no quote", booking_id))
        })?;
        if req.amount != quote.amount {
            return Err(CoreError::QuoteMismatch(format!(
                "submitted {} but quote is {}",
                req.amount, quote.amount
            )));
        }

        let date = parse_date(&req.date)?;
        let start: SlotTime = req.time.parse()?;
        let now = self.ctx.now();
        let starts_at = self
            .ctx
            .clock
            .zone()
            .to_utc(date, start)
            .ok_or_else(|| CoreError::InvalidInput(format!("{} {} does not exist", req.date, start)))?;
        if starts_at <= now {
            return Err(CoreError::InvalidInput(format!(
                "{} {} is not in the future",
                req.date, start
            )));
        }

        let timing = self.availability.timing(booking.service_id).await?;
        timing.validate_start(start)?;
        let end = timing.end_time(start)?;
        let hold = now + self.ctx.settings.hold_ttl().await?;

        let scheduled = self
            .ctx
            .repo
            .transition_booking_with_capacity(
                booking_id,
                &[BookingStatus::QuoteAccepted],
                BookingStatus::QuoteAccepted,
                BookingPatch::new()
                    .schedule(date, start, end, timing.buffer_minutes)
                    .hold_until(hold)
                    .amount(quote.amount),
                timing.claim(date, start),
                now,
            )
            .await?;

        let paise = quote
            .amount
            .to_paise()
            .ok_or_else(|| CoreError::InvalidInput(format!("amount {} out of range", quote.amount)))?;
        let order = match self
            .ctx
            .gateway
            .create_order(paise, &scheduled.reference, "quote")
            .await
        {
            Ok(order) => order,
            Err(e) => {
                warn!(booking_id, error = %e, "Gateway order failed, releasing schedule");
                self.ctx
                    .repo
                    .transition_booking(
                        booking_id,
                        &[BookingStatus::QuoteAccepted],
                        BookingStatus::QuoteAccepted,
                        BookingPatch::new().clear_schedule().clear_hold(),
                        self.ctx.now(),
                    )
                    .await?;
                return Err(e.into());
            }
        };

        self.ctx.repo.expire_booking_payments(booking_id).await?;
        self.ctx
            .repo
            .insert_payment(
                &NewPayment {
                    reference: new_reference("PAY"),
                    user_id: scheduled.user_id,
                    amount: quote.amount,
                    payment_type: PaymentType::Booking,
                    method: PaymentMethod::Razorpay,
                    status: PaymentStatus::Pending,
                    related_entity_type: Some("booking".into()),
                    related_entity_id: Some(booking_id),
                    order_id: Some(order.id.clone()),
                    metadata: serde_json::json!({ "source": "quote" }),
                },
                now,
            )
            .await?;
        let booking = self
            .ctx
            .repo
            .transition_booking(
                booking_id,
                &[BookingStatus::QuoteAccepted],
                BookingStatus::QuoteAccepted,
                BookingPatch::new()
                    .order(&order.id)
                    .payment_status(PaymentStatus::Pending),
                now,
            )
            .await?;
        info!(booking_id, date = %req.date, %start, "Quote scheduled, awaiting payment");

        Ok(QuotePayment {
            booking,
            payment_order: order,
        })
    }

    /// Verify the quote payment and confirm the booking.
    pub async fn verify(
        &self,
        actor: Actor,
        booking_id: i64,
        proof: PaymentProof,
    ) -> Result<Booking, CoreError> {
        let booking = self.ctx.owned_booking(actor, booking_id).await?;
        self.bookings
            .settle_gateway_payment(booking, BookingStatus::QuoteAccepted, proof)
            .await
    }

    /// Roll a lapsed quote back to `pending` with its fields cleared.
    pub async fn expire(&self, booking: &Booking) -> Result<Booking, CoreError> {
        let now = self.ctx.now();
        if booking.quote.as_ref().map_or(false, |q| q.is_valid_at(now)) {
            return Err(CoreError::IllegalTransition(format!(
                "quote for booking {} is still valid",
                booking.id
            )));
        }
        let reverted = self
            .ctx
            .repo
            .transition_booking(
                booking.id,
                &[BookingStatus::QuoteProvided],
                BookingStatus::Pending,
                BookingPatch::new().clear_quote(),
                now,
            )
            .await?;
        info!(booking_id = booking.id, "Quote expired");
        self.ctx
            .notify(
                Notification::new(
                    reverted.user_id,
                    NotificationKind::QuoteExpired,
                    format!("Quote for {} expired", reverted.reference),
                )
                .for_booking(booking.id),
            )
            .await;
        Ok(reverted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::scheduling::booking::CreateInquiry;
    use crate::scheduling::test_support::{harness, inquiry_service, Harness};
    use chrono::Duration;

    async fn inquiry(h: &Harness) -> Booking {
        let service = inquiry_service(h).await;
        h.scheduling
            .bookings
            .create_inquiry(
                h.customer.id,
                CreateInquiry {
                    service_id: service.id,
                    address: Default::default(),
                    contact_phone: None,
                    notes: Some("kitchen".into()),
                },
            )
            .await
            .unwrap()
    }

    fn quote(amount: i64, days: Option<i64>) -> ProvideQuote {
        ProvideQuote {
            amount: Money::from_rupees(amount),
            notes: None,
            expires_in_days: days,
        }
    }

    #[tokio::test]
    async fn test_only_admin_quotes_pending_inquiries() {
        let h = harness().await;
        let booking = inquiry(&h).await;
        let err = h
            .scheduling
            .quotes
            .provide(Actor::customer(h.customer.id), booking.id, quote(2500, Some(3)))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized(_)));

        let quoted = h
            .scheduling
            .quotes
            .provide(Actor::admin(h.admin.id), booking.id, quote(2500, Some(3)))
            .await
            .unwrap();
        assert_eq!(quoted.status, BookingStatus::QuoteProvided);
        let q = quoted.quote.unwrap();
        assert_eq!(q.provided_by, h.admin.id);
        assert_eq!(q.expires_at, Some(h.clock.now() + Duration::days(3)));

        // Already quoted.
        let err = h
            .scheduling
            .quotes
            .provide(Actor::admin(h.admin.id), booking.id, quote(2600, None))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::IllegalTransition(_)));
    }

    #[tokio::test]
    async fn test_accepting_an_expired_quote_reverts_it() {
        let h = harness().await;
        let booking = inquiry(&h).await;
        h.scheduling
            .quotes
            .provide(Actor::admin(h.admin.id), booking.id, quote(2500, Some(1)))
            .await
            .unwrap();

        h.clock.advance(Duration::days(2));
        let err = h
            .scheduling
            .quotes
            .accept(Actor::customer(h.customer.id), booking.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::QuoteExpired(_)));

        let reverted = h.repo.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(reverted.status, BookingStatus::Pending);
        assert!(reverted.quote.is_none());
    }

    #[tokio::test]
    async fn test_pay_rejects_past_start() {
        let h = harness().await;
        let booking = inquiry(&h).await;
        h.scheduling
            .quotes
            .provide(Actor::admin(h.admin.id), booking.id, quote(2500, None))
            .await
            .unwrap();
        h.scheduling
            .quotes
            .accept(Actor::customer(h.customer.id), booking.id)
            .await
            .unwrap();

        let err = h
            .scheduling
            .quotes
            .pay(
                Actor::customer(h.customer.id),
                booking.id,
                PayQuote {
                    amount: Money::from_rupees(2500),
                    date: "2025-03-15".into(),
                    time: "10:30".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_pay_holds_capacity_until_verified() {
        let h = harness().await;
        let booking = inquiry(&h).await;
        h.scheduling
            .quotes
            .provide(Actor::admin(h.admin.id), booking.id, quote(2500, None))
            .await
            .unwrap();
        h.scheduling
            .quotes
            .accept(Actor::customer(h.customer.id), booking.id)
            .await
            .unwrap();

        let paid = h
            .scheduling
            .quotes
            .pay(
                Actor::customer(h.customer.id),
                booking.id,
                PayQuote {
                    amount: Money::from_rupees(2500),
                    date: "2025-03-16".into(),
                    time: "10:30".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(paid.booking.status, BookingStatus::QuoteAccepted);
        assert_eq!(paid.payment_order.amount, 250_000);

        let grid = h
            .scheduling
            .availability
            .slot_grid(paid.booking.service_id, "2025-03-16")
            .await
            .unwrap();
        let slot = grid.slot("10:30".parse().unwrap()).unwrap();
        assert!(!slot.is_available);
    }
}
