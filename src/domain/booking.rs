//! The booking aggregate and its state machine.

use crate::domain::{BookingAddress, Money, PaymentStatus, SlotTime};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    pub enum BookingType {
        Regular => "regular",
        Inquiry => "inquiry",
    }
}

string_enum! {
    pub enum BookingStatus {
        Pending => "pending",
        PaymentPending => "payment_pending",
        QuoteProvided => "quote_provided",
        QuoteAccepted => "quote_accepted",
        Confirmed => "confirmed",
        Assigned => "assigned",
        InProgress => "in_progress",
        Completed => "completed",
        Cancelled => "cancelled",
        Expired => "expired",
    }
}

impl BookingStatus {
    /// Every status a booking can still leave.
    pub const NON_TERMINAL: &'static [BookingStatus] = &[
        BookingStatus::Pending,
        BookingStatus::PaymentPending,
        BookingStatus::QuoteProvided,
        BookingStatus::QuoteAccepted,
        BookingStatus::Confirmed,
        BookingStatus::Assigned,
        BookingStatus::InProgress,
    ];

    /// Statuses in which a scheduled booking occupies one capacity unit
    /// whenever no non-terminal assignment covers it.
    pub const RESERVING: &'static [BookingStatus] = &[
        BookingStatus::Pending,
        BookingStatus::PaymentPending,
        BookingStatus::QuoteAccepted,
        BookingStatus::Confirmed,
        BookingStatus::Assigned,
        BookingStatus::InProgress,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::Expired
        )
    }

    /// Whether `self -> next` is a legal edge of the booking state machine.
    ///
    /// Cancellation is legal from every non-terminal status. Worker accept and
    /// reject both return an `assigned` booking to `confirmed`.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;

        if self.is_terminal() {
            return false;
        }
        if next == Cancelled {
            return true;
        }
        matches!(
            (self, next),
            (Pending, PaymentPending)
                | (Pending, Confirmed)
                | (Pending, QuoteProvided)
                | (Pending, Expired)
                | (PaymentPending, Confirmed)
                | (PaymentPending, Expired)
                | (QuoteProvided, QuoteAccepted)
                | (QuoteProvided, Pending)
                | (QuoteAccepted, Confirmed)
                | (Confirmed, Assigned)
                | (Confirmed, InProgress)
                | (Assigned, Confirmed)
                | (InProgress, Completed)
        )
    }
}

/// Admin-issued price for an inquiry booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub amount: Money,
    pub notes: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub provided_at: DateTime<Utc>,
    pub provided_by: i64,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Quote {
    /// A quote is valid while it has no expiry or the expiry lies ahead.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |exp| exp > now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    #[serde(rename = "ref")]
    pub reference: String,
    pub user_id: i64,
    pub service_id: i64,
    pub booking_type: BookingType,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub scheduled_date: Option<NaiveDate>,
    pub scheduled_time: Option<SlotTime>,
    pub scheduled_end_time: Option<SlotTime>,
    pub address: BookingAddress,
    pub contact_phone: Option<String>,
    pub notes: Option<String>,
    pub quote: Option<Quote>,
    pub hold_expires_at: Option<DateTime<Utc>>,
    pub payment_order_id: Option<String>,
    pub payment_id: Option<String>,
    pub payment_completed_at: Option<DateTime<Utc>>,
    pub amount: Option<Money>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub actual_end_time: Option<DateTime<Utc>>,
    pub actual_duration_minutes: Option<i64>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn is_owned_by(&self, user_id: i64) -> bool {
        self.user_id == user_id
    }

    /// True when a soft hold exists and has lapsed.
    pub fn hold_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.hold_expires_at.map_or(false, |exp| exp <= now)
    }

    /// Price the worker is credited on completion: the quote when present,
    /// otherwise the service list price.
    pub fn earnings_amount(&self, service_price: Option<Money>) -> Option<Money> {
        self.quote
            .as_ref()
            .map(|q| q.amount)
            .or(service_price)
            .filter(|m| m.is_positive())
    }
}
