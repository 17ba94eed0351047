pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod integrations;
pub mod scheduling;
pub mod settings;

pub use auth::{AuthUser, JwtKeys};
pub use clock::{CalendarZone, Clock, ManualClock, SystemClock};
pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    Actor, Booking, BookingStatus, Money, Payment, SlotTime, User, UserType, WorkerAssignment,
};
pub use error::CoreError;
pub use scheduling::{Collaborators, CoreContext, Scheduling};
pub use settings::{Settings, StaticSettings, StoreSettings};
