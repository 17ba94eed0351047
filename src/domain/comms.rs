//! Per-booking communication channels opened once a worker accepts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chat room for a booking. Participants derive from the booking and its
/// active assignment, so none are stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: i64,
    pub booking_id: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<String>,
}

/// Binding of the two parties' phone numbers to a masked channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMasking {
    pub id: i64,
    pub booking_id: i64,
    pub customer_phone: String,
    pub worker_phone: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallMasking {
    /// Phone of the other party when `phone` is one of the two bound numbers.
    pub fn counterpart_of(&self, phone: &str) -> Option<&str> {
        if phone == self.customer_phone {
            Some(&self.worker_phone)
        } else if phone == self.worker_phone {
            Some(&self.customer_phone)
        } else {
            None
        }
    }
}
