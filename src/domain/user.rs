//! Platform users and the acting principal of a request.

use crate::domain::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

string_enum! {
    /// Role carried in the access token and stored on the user row.
    pub enum UserType {
        Customer => "customer",
        Worker => "worker",
        Admin => "admin",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub phone: String,
    pub user_type: UserType,
    pub is_active: bool,
    pub wallet_balance: Money,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Active workers define the capacity pool.
    pub fn is_active_worker(&self) -> bool {
        self.user_type == UserType::Worker && self.is_active
    }
}

/// The authenticated principal performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    pub role: UserType,
}

impl Actor {
    pub fn new(user_id: i64, role: UserType) -> Self {
        Self { user_id, role }
    }

    pub fn customer(user_id: i64) -> Self {
        Self::new(user_id, UserType::Customer)
    }

    pub fn worker(user_id: i64) -> Self {
        Self::new(user_id, UserType::Worker)
    }

    pub fn admin(user_id: i64) -> Self {
        Self::new(user_id, UserType::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserType::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_type_roundtrip_strings() {
        for t in UserType::ALL {
            assert_eq!(t.as_str().parse::<UserType>().unwrap(), *t);
        }
        assert!("vendor".parse::<UserType>().is_err());
    }
}
