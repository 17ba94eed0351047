//! Bookable services and their scheduling overrides.

use crate::domain::Money;
use serde::{Deserialize, Serialize};

/// Duration used when neither the service nor its config specifies one.
pub const FALLBACK_SERVICE_DURATION_MINUTES: u32 = 120;

string_enum! {
    pub enum PriceType {
        /// Paid up front at booking time.
        Fixed => "fixed",
        /// Priced by an admin quote.
        Inquiry => "inquiry",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub duration_minutes: Option<u32>,
    pub price: Option<Money>,
    pub price_type: PriceType,
    pub is_active: bool,
}

/// Per-service overrides of scheduling parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service_id: i64,
    pub service_duration_minutes: Option<u32>,
    pub buffer_time_minutes: Option<u32>,
}

impl Service {
    /// Duration resolution order: service, then config, then the fallback.
    pub fn resolve_duration(&self, config: Option<&ServiceConfig>) -> u32 {
        self.duration_minutes
            .filter(|d| *d > 0)
            .or_else(|| config.and_then(|c| c.service_duration_minutes).filter(|d| *d > 0))
            .unwrap_or(FALLBACK_SERVICE_DURATION_MINUTES)
    }

    /// Buffer resolution: per-service override, else the platform default.
    pub fn resolve_buffer(config: Option<&ServiceConfig>, platform_default: u32) -> u32 {
        config
            .and_then(|c| c.buffer_time_minutes)
            .unwrap_or(platform_default)
    }

    pub fn is_fixed_price(&self) -> bool {
        self.price_type == PriceType::Fixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(duration: Option<u32>) -> Service {
        Service {
            id: 7,
            name: "Deep cleaning".to_string(),
            duration_minutes: duration,
            price: Some(Money::from_rupees(999)),
            price_type: PriceType::Fixed,
            is_active: true,
        }
    }

    #[test]
    fn test_duration_prefers_service_value() {
        let config = ServiceConfig {
            service_id: 7,
            service_duration_minutes: Some(90),
            buffer_time_minutes: None,
        };
        assert_eq!(service(Some(60)).resolve_duration(Some(&config)), 60);
        assert_eq!(service(None).resolve_duration(Some(&config)), 90);
        assert_eq!(service(None).resolve_duration(None), FALLBACK_SERVICE_DURATION_MINUTES);
        assert_eq!(service(Some(0)).resolve_duration(None), FALLBACK_SERVICE_DURATION_MINUTES);
    }

    #[test]
    fn test_buffer_override() {
        let config = ServiceConfig {
            service_id: 7,
            service_duration_minutes: None,
            buffer_time_minutes: Some(15),
        };
        assert_eq!(Service::resolve_buffer(Some(&config), 30), 15);
        assert_eq!(Service::resolve_buffer(None, 30), 30);
    }
}
