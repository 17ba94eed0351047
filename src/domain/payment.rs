//! Payment ledger rows.

use crate::domain::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    pub enum PaymentType {
        Booking => "booking",
        WalletRecharge => "wallet_recharge",
        WalletDebit => "wallet_debit",
        WorkerWithdrawal => "worker_withdrawal",
    }
}

string_enum! {
    pub enum PaymentStatus {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
        Refunded => "refunded",
        Expired => "expired",
        Abandoned => "abandoned",
    }
}

string_enum! {
    pub enum PaymentMethod {
        Razorpay => "razorpay",
        Wallet => "wallet",
        /// Platform-issued credit such as worker earnings.
        InternalCredit => "internal_credit",
        BankTransfer => "bank_transfer",
    }
}

impl PaymentType {
    /// Sign applied to the owner's wallet when a payment of this type completes.
    pub fn wallet_sign(&self) -> i8 {
        match self {
            PaymentType::WalletRecharge => 1,
            PaymentType::WalletDebit | PaymentType::WorkerWithdrawal => -1,
            PaymentType::Booking => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    #[serde(rename = "ref")]
    pub reference: String,
    pub user_id: i64,
    pub amount: Money,
    pub currency: String,
    pub payment_type: PaymentType,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub related_entity_type: Option<String>,
    pub related_entity_id: Option<i64>,
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub signature: Option<String>,
    pub balance_after: Option<Money>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Generate a unique human-facing reference such as `PAY3F9A0C1D22B4`.
pub fn new_reference(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    format!("{}{}", prefix, &id[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_sign() {
        assert_eq!(PaymentType::WalletRecharge.wallet_sign(), 1);
        assert_eq!(PaymentType::WorkerWithdrawal.wallet_sign(), -1);
        assert_eq!(PaymentType::WalletDebit.wallet_sign(), -1);
        assert_eq!(PaymentType::Booking.wallet_sign(), 0);
    }

    #[test]
    fn test_references_are_prefixed_and_distinct() {
        let a = new_reference("BK");
        let b = new_reference("BK");
        assert!(a.starts_with("BK"));
        assert_eq!(a.len(), 14);
        assert_ne!(a, b);
    }
}
