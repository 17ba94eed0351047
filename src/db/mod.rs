//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and migrations
//! - SQLite pragma configuration
//! - Repository layer for bookings, assignments, payments and locations

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{
    AssignmentOutcome, AssignmentTransition, BookingPatch, CancelOutcome, CapacityClaim,
    EarningsCredit, NewBooking, NewPayment, RefundIntent, Repository,
};
