//! Service address captured on a booking.

use crate::domain::Coordinate;
use serde::{Deserialize, Serialize};

/// Booking address JSON. Coordinates are optional but preferred over geocoding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingAddress {
    pub formatted: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub postcode: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl BookingAddress {
    /// Embedded coordinates, if both are present and in range.
    pub fn coordinate(&self) -> Option<Coordinate> {
        Coordinate::new(self.latitude?, self.longitude?).ok()
    }

    /// Text suitable for a geocoder query: the formatted line when present,
    /// otherwise the non-empty components joined with commas.
    pub fn geocodable_text(&self) -> Option<String> {
        if let Some(formatted) = self.formatted.as_deref().map(str::trim) {
            if !formatted.is_empty() {
                return Some(formatted.to_string());
            }
        }

        let parts: Vec<&str> = [
            &self.address_line1,
            &self.address_line2,
            &self.city,
            &self.state,
            &self.postcode,
            &self.country,
        ]
        .iter()
        .filter_map(|p| p.as_deref())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

        (!parts.is_empty()).then(|| parts.join(", "))
    }
}
