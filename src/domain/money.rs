//! Rupee amounts backed by rust_decimal.
//!
//! Amounts are stored as canonical decimal strings and cross the payment
//! gateway boundary as integer paise.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal as RustDecimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A monetary amount in rupees.
///
/// Serializes to a JSON number.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Money(#[serde(with = "rust_decimal::serde::float")] RustDecimal);

impl Money {
    pub fn new(value: RustDecimal) -> Self {
        Money(value)
    }

    /// Whole rupees.
    pub fn from_rupees(rupees: i64) -> Self {
        Money(RustDecimal::from(rupees))
    }

    /// Build from integer paise (1/100 rupee).
    pub fn from_paise(paise: i64) -> Self {
        Money(RustDecimal::new(paise, 2))
    }

    pub fn zero() -> Self {
        Money(RustDecimal::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    /// Amount in paise, rounded half away from zero.
    ///
    /// Returns `None` when the value does not fit an `i64`.
    pub fn to_paise(&self) -> Option<i64> {
        (self.0 * RustDecimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
    }

    /// Canonical string without trailing zeros or exponent.
    pub fn to_canonical_string(&self) -> String {
        self.0.normalize().to_string()
    }

    /// Lenient conversion from a float setting value.
    pub fn from_f64(value: f64) -> Option<Self> {
        RustDecimal::from_f64_retain(value).map(|d| Money(d.round_dp(2)))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RustDecimal::from_str(s.trim()).map(Money)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl std::ops::Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paise_conversion() {
        let m = Money::from_str("2500").unwrap();
        assert_eq!(m.to_paise(), Some(250_000));

        let fractional = Money::from_str("99.995").unwrap();
        assert_eq!(fractional.to_paise(), Some(10_000));

        assert_eq!(Money::from_paise(1234).to_canonical_string(), "12.34");
    }

    #[test]
    fn test_canonical_string_strips_trailing_zeros() {
        let m = Money::from_str("1800.00").unwrap();
        assert_eq!(m.to_canonical_string(), "1800");
        assert_eq!(m, Money::from_rupees(1800));
    }

    #[test]
    fn test_arithmetic_and_sign() {
        let a = Money::from_rupees(500);
        let b = Money::from_str("120.5").unwrap();
        assert_eq!((a - b).to_canonical_string(), "379.5");
        assert!((b - a).is_negative());
        assert!((a + b).is_positive());
        assert!(Money::zero().is_zero());
    }

    #[test]
    fn test_json_is_number() {
        let json = serde_json::to_value(Money::from_str("12.5").unwrap()).unwrap();
        assert!(json.is_number());
    }
}
