//! Domain types for the scheduling and worker-assignment core.
//!
//! This module provides:
//! - Wall-clock slot primitives and lossless money
//! - Booking, assignment, payment and worker-location aggregates
//! - The status enums and their legal transitions

/// Error returned when a stored or submitted enum string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a fieldless enum with a fixed lowercase wire/storage spelling.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::domain::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err($crate::domain::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub mod address;
pub mod assignment;
pub mod booking;
pub mod comms;
pub mod location;
pub mod money;
pub mod payment;
pub mod primitives;
pub mod service;
pub mod user;

pub use address::BookingAddress;
pub use assignment::{AssignmentAction, AssignmentNotes, AssignmentStatus, CompletionDetails, WorkerAssignment};
pub use booking::{Booking, BookingStatus, BookingType, Quote};
pub use comms::{CallMasking, ChatRoom};
pub use location::{Coordinate, CoordinateError, TrackingStatus, WorkerLocation, ARRIVAL_RADIUS_METERS};
pub use money::Money;
pub use payment::{Payment, PaymentMethod, PaymentStatus, PaymentType};
pub use primitives::{format_date, parse_date, ParseError, SlotTime, SLOT_MINUTES};
pub use service::{PriceType, Service, ServiceConfig, FALLBACK_SERVICE_DURATION_MINUTES};
pub use user::{Actor, User, UserType};
