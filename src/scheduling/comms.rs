//! Chat rooms and masked calling tied to a booking's assignment.

use super::CoreContext;
use crate::domain::{Actor, Booking, CallMasking, ChatRoom, User};
use crate::error::CoreError;
use crate::integrations::{CallerIdPool, MaskingProvider};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallInitiated {
    pub booking_id: i64,
    pub call_sid: String,
    pub caller_id: String,
}

#[derive(Clone)]
pub struct CommsCore {
    ctx: CoreContext,
    provider: Option<Arc<dyn MaskingProvider>>,
    caller_ids: Arc<CallerIdPool>,
}

impl CommsCore {
    pub fn new(
        ctx: CoreContext,
        provider: Option<Arc<dyn MaskingProvider>>,
        caller_ids: Vec<String>,
    ) -> Self {
        Self {
            ctx,
            provider,
            caller_ids: Arc::new(CallerIdPool::new(caller_ids)),
        }
    }

    /// Idempotent: a second call returns the existing room.
    pub async fn create_chat_room(&self, booking_id: i64) -> Result<ChatRoom, CoreError> {
        self.ctx.require_booking(booking_id).await?;
        self.ctx
            .repo
            .ensure_chat_room(booking_id, self.ctx.now())
            .await
    }

    pub async fn close_chat_room(&self, booking_id: i64, reason: &str) -> Result<bool, CoreError> {
        self.ctx
            .repo
            .close_chat_room(booking_id, reason, self.ctx.now())
            .await
    }

    /// Bind the customer's and the assigned worker's phones. Idempotent.
    ///
    /// # Errors
    /// `IllegalTransition` when the booking has no active assignment.
    pub async fn enable_call_masking(&self, booking_id: i64) -> Result<CallMasking, CoreError> {
        let booking = self.ctx.require_booking(booking_id).await?;
        let assignment = self
            .ctx
            .repo
            .active_assignment_for_booking(booking_id)
            .await?
            .ok_or_else(|| {
                CoreError::IllegalTransition(format!("booking {} has no assigned worker", booking_id))
            })?;
        let worker = self.user(assignment.worker_id).await?;
        self.bind_phones(&booking, &worker).await
    }

    pub async fn disable_call_masking(&self, booking_id: i64) -> Result<bool, CoreError> {
        self.ctx
            .repo
            .disable_call_masking(booking_id, self.ctx.now())
            .await
    }

    async fn user(&self, id: i64) -> Result<User, CoreError> {
        self.ctx
            .repo
            .get_user(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("user {}", id)))
    }

    async fn bind_phones(&self, booking: &Booking, worker: &User) -> Result<CallMasking, CoreError> {
        let customer_phone = match booking.contact_phone.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(phone) => phone.to_string(),
            None => self.user(booking.user_id).await?.phone,
        };
        self.ctx
            .repo
            .enable_call_masking(booking.id, &customer_phone, &worker.phone, self.ctx.now())
            .await
    }

    /// Side effects of a worker accepting: open chat and masking.
    /// Failures are logged and never fail the acceptance.
    pub(crate) async fn open_for(&self, booking: &Booking, worker_id: i64) {
        if let Err(e) = self.ctx.repo.ensure_chat_room(booking.id, self.ctx.now()).await {
            warn!(booking_id = booking.id, error = %e, "Could not open chat room");
        }
        let masked = match self.user(worker_id).await {
            Ok(worker) => self.bind_phones(booking, &worker).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = masked {
            warn!(booking_id = booking.id, error = %e, "Could not enable call masking");
        }
    }

    /// Disable masking only, as after a rejection.
    pub(crate) async fn mask_off(&self, booking_id: i64) {
        if let Err(e) = self.disable_call_masking(booking_id).await {
            warn!(booking_id, error = %e, "Could not disable call masking");
        }
    }

    /// Close chat and disable masking, as after completion or cancellation.
    pub(crate) async fn shut_down(&self, booking_id: i64, reason: &str) {
        if let Err(e) = self.close_chat_room(booking_id, reason).await {
            warn!(booking_id, error = %e, "Could not close chat room");
        }
        self.mask_off(booking_id).await;
    }

    /// Place a masked call from `actor` to the other party of the booking.
    ///
    /// # Errors
    /// `Unauthorized` when the actor is neither party; `IllegalTransition`
    /// when masking is not enabled; `ExternalUnavailable` when no provider
    /// or caller id is configured or the provider fails.
    pub async fn initiate_call(&self, actor: Actor, booking_id: i64) -> Result<CallInitiated, CoreError> {
        let masking = self
            .ctx
            .repo
            .get_call_masking(booking_id)
            .await?
            .filter(|m| m.is_active)
            .ok_or_else(|| {
                CoreError::IllegalTransition(format!("call masking is not enabled for booking {}", booking_id))
            })?;

        let caller = self.user(actor.user_id).await?;
        let callee = masking.counterpart_of(&caller.phone).ok_or_else(|| {
            CoreError::Unauthorized(format!("user {} is not a party to booking {}", caller.id, booking_id))
        })?;

        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| CoreError::ExternalUnavailable("call masking provider not configured".into()))?;
        let caller_id = self.caller_ids.next_id()?.to_string();

        let call_sid = provider.initiate(&caller.phone, callee, &caller_id).await?;
        info!(booking_id, %call_sid, %caller_id, "Masked call initiated");
        Ok(CallInitiated {
            booking_id,
            call_sid,
            caller_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewBooking;
    use crate::domain::{BookingStatus, BookingType};
    use crate::scheduling::test_support::{harness, service_with_duration};

    #[tokio::test]
    async fn test_call_requires_enabled_masking_and_party() {
        let h = harness().await;
        let now = chrono::Utc::now();
        let service = service_with_duration(&h, Some(60)).await;
        let booking = h
            .repo
            .insert_booking(
                &NewBooking {
                    reference: "BKCALL".into(),
                    user_id: h.customer.id,
                    service_id: service.id,
                    booking_type: BookingType::Regular,
                    status: BookingStatus::Confirmed,
                    scheduled_date: None,
                    scheduled_time: None,
                    scheduled_end_time: None,
                    buffer_minutes: 30,
                    address: Default::default(),
                    contact_phone: None,
                    notes: None,
                    amount: None,
                    hold_expires_at: None,
                },
                now,
            )
            .await
            .unwrap();

        let err = h
            .scheduling
            .comms
            .initiate_call(Actor::customer(h.customer.id), booking.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::IllegalTransition(_)));

        h.repo
            .enable_call_masking(booking.id, &h.customer.phone, &h.worker.phone, now)
            .await
            .unwrap();

        let call = h
            .scheduling
            .comms
            .initiate_call(Actor::customer(h.customer.id), booking.id)
            .await
            .unwrap();
        assert_eq!(call.caller_id, "08047112233");
        let placed = h.masking.calls();
        assert_eq!(placed[0].from, h.customer.phone);
        assert_eq!(placed[0].to, h.worker.phone);

        let err = h
            .scheduling
            .comms
            .initiate_call(Actor::customer(h.admin.id), booking.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized(_)));
    }
}
