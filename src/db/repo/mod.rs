//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by aggregate:
//! - `catalog.rs` - Users, services, service configs and admin settings
//! - `bookings.rs` - Bookings, capacity-serialized writes and cancellation
//! - `assignments.rs` - Worker assignments and earnings credit
//! - `payments.rs` - Payment ledger, wallet movements and refund intents
//! - `locations.rs` - Live worker locations
//! - `comms.rs` - Chat rooms and call-masking bindings

mod assignments;
mod bookings;
mod catalog;
mod comms;
mod locations;
mod payments;

pub use assignments::{AssignmentOutcome, AssignmentTransition, EarningsCredit};
pub use bookings::{BookingPatch, CancelOutcome, CapacityClaim, NewBooking};
pub use payments::{NewPayment, RefundIntent};

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use sqlx::query_builder::QueryBuilder;
use sqlx::sqlite::{Sqlite, SqlitePool, SqliteRow};
use sqlx::Row;
use std::fmt::Display;
use std::str::FromStr;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap liveness probe used by `/ready`.
    pub async fn ping(&self) -> Result<(), CoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// =========================================================================
// Column codecs
// =========================================================================

pub(crate) fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn corrupt(column: &str, err: impl Display) -> CoreError {
    CoreError::Internal(format!("corrupt column {}: {}", column, err))
}

/// Read a required text column and parse it.
pub(crate) fn parse_col<T>(row: &SqliteRow, column: &str) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e| corrupt(column, e))
}

/// Read a nullable text column and parse it when present.
pub(crate) fn parse_opt_col<T>(row: &SqliteRow, column: &str) -> Result<Option<T>, CoreError>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| s.parse().map_err(|e| corrupt(column, e)))
        .transpose()
}

pub(crate) fn time_col(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, CoreError> {
    Ok(from_ms(row.try_get(column)?))
}

pub(crate) fn opt_time_col(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<DateTime<Utc>>, CoreError> {
    let raw: Option<i64> = row.try_get(column)?;
    Ok(raw.map(from_ms))
}

pub(crate) fn json_col<T: serde::de::DeserializeOwned>(
    row: &SqliteRow,
    column: &str,
) -> Result<T, CoreError> {
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw).map_err(|e| corrupt(column, e))
}

/// Comma-separated SQL literal list for a fixed set of enum spellings.
///
/// Only `'static` enum names are accepted, never user input.
pub(crate) fn sql_list<I>(values: I) -> String
where
    I: IntoIterator<Item = &'static str>,
{
    values
        .into_iter()
        .map(|v| format!("'{}'", v))
        .collect::<Vec<_>>()
        .join(", ")
}

// =========================================================================
// Partial updates
// =========================================================================

/// A bindable column value for dynamically built updates.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Int(to_ms(v))
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}

/// Ordered `column = value` assignments appended to an UPDATE.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ColumnSet {
    sets: Vec<(&'static str, SqlValue)>,
}

impl ColumnSet {
    pub(crate) fn set(&mut self, column: &'static str, value: impl Into<SqlValue>) {
        // Last write wins for a repeated column.
        self.sets.retain(|(c, _)| *c != column);
        self.sets.push((column, value.into()));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Append `, col = ?` for every assignment.
    pub(crate) fn push_to(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        for (column, value) in &self.sets {
            qb.push(", ");
            qb.push(*column);
            qb.push(" = ");
            match value {
                SqlValue::Null => {
                    qb.push("NULL");
                }
                SqlValue::Int(v) => {
                    qb.push_bind(*v);
                }
                SqlValue::Real(v) => {
                    qb.push_bind(*v);
                }
                SqlValue::Text(v) => {
                    qb.push_bind(v.clone());
                }
            }
        }
    }
}
