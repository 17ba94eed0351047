//! Booking persistence and capacity-serialized writes.
//!
//! Every write that can add an obligation on a date first upserts that date's
//! `capacity_locks` row. The upsert takes SQLite's write lock, so concurrent
//! contenders queue on `busy_timeout` and each re-derives the obligor units
//! only after the previous one committed.

use crate::domain::{
    format_date, AssignmentStatus, Booking, BookingAddress, BookingStatus, BookingType, Money,
    PaymentStatus, Quote, SlotTime,
};
use crate::engine::{check_capacity, Obligation};
use crate::error::CoreError;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::query_builder::QueryBuilder;
use sqlx::sqlite::{Sqlite, SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use super::catalog::count_active_workers_in;
use super::payments::{insert_refund_intent_in, RefundIntent};
use super::{
    json_col, opt_time_col, parse_col, parse_opt_col, sql_list, time_col, to_ms, ColumnSet,
    Repository,
};

const BOOKING_COLUMNS: &str = r#"
    id, ref, user_id, service_id, booking_type, status, payment_status,
    scheduled_date, scheduled_time, scheduled_end_time, address_json,
    contact_phone, notes, quote_amount, quote_notes, quote_expires_at,
    quote_provided_at, quote_accepted_at, quote_provided_by, hold_expires_at,
    payment_order_id, payment_id, payment_completed_at, amount,
    actual_start_time, actual_end_time, actual_duration_minutes,
    cancelled_at, cancellation_reason, created_at, updated_at
"#;

/// A booking about to be inserted.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub reference: String,
    pub user_id: i64,
    pub service_id: i64,
    pub booking_type: BookingType,
    pub status: BookingStatus,
    pub scheduled_date: Option<NaiveDate>,
    pub scheduled_time: Option<SlotTime>,
    pub scheduled_end_time: Option<SlotTime>,
    pub buffer_minutes: u32,
    pub address: BookingAddress,
    pub contact_phone: Option<String>,
    pub notes: Option<String>,
    pub amount: Option<Money>,
    pub hold_expires_at: Option<DateTime<Utc>>,
}

/// The capacity window a write wants to occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityClaim {
    pub date: NaiveDate,
    pub start: SlotTime,
    /// Duration plus buffer.
    pub unit_minutes: u32,
}

/// Column changes applied alongside a status transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingPatch {
    columns: ColumnSet,
}

impl BookingPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payment_status(mut self, status: PaymentStatus) -> Self {
        self.columns.set("payment_status", status.as_str());
        self
    }

    /// Record a verified gateway payment.
    pub fn payment_completed(mut self, payment_id: &str, at: DateTime<Utc>) -> Self {
        self.columns
            .set("payment_status", PaymentStatus::Completed.as_str());
        self.columns.set("payment_id", payment_id);
        self.columns.set("payment_completed_at", at);
        self
    }

    pub fn hold_until(mut self, at: DateTime<Utc>) -> Self {
        self.columns.set("hold_expires_at", at);
        self
    }

    pub fn clear_hold(mut self) -> Self {
        self.columns
            .set("hold_expires_at", Option::<DateTime<Utc>>::None);
        self
    }

    pub fn schedule(
        mut self,
        date: NaiveDate,
        start: SlotTime,
        end: SlotTime,
        buffer_minutes: u32,
    ) -> Self {
        self.columns.set("scheduled_date", format_date(date));
        self.columns.set("scheduled_time", start.to_string());
        self.columns.set("scheduled_end_time", end.to_string());
        self.columns.set("buffer_minutes", i64::from(buffer_minutes));
        self
    }

    pub fn clear_schedule(mut self) -> Self {
        self.columns.set("scheduled_date", Option::<String>::None);
        self.columns.set("scheduled_time", Option::<String>::None);
        self.columns
            .set("scheduled_end_time", Option::<String>::None);
        self
    }

    pub fn order(mut self, order_id: &str) -> Self {
        self.columns.set("payment_order_id", order_id);
        self
    }

    pub fn clear_order(mut self) -> Self {
        self.columns.set("payment_order_id", Option::<String>::None);
        self
    }

    pub fn amount(mut self, amount: Money) -> Self {
        self.columns.set("amount", amount.to_canonical_string());
        self
    }

    pub fn quote(mut self, quote: &Quote) -> Self {
        self.columns
            .set("quote_amount", quote.amount.to_canonical_string());
        self.columns.set("quote_notes", quote.notes.clone());
        self.columns.set("quote_expires_at", quote.expires_at);
        self.columns.set("quote_provided_at", quote.provided_at);
        self.columns.set("quote_provided_by", quote.provided_by);
        self.columns.set("quote_accepted_at", quote.accepted_at);
        self
    }

    pub fn clear_quote(mut self) -> Self {
        for column in [
            "quote_amount",
            "quote_notes",
            "quote_expires_at",
            "quote_provided_at",
            "quote_provided_by",
            "quote_accepted_at",
        ] {
            self.columns.set(column, Option::<String>::None);
        }
        self
    }

    pub fn quote_accepted(mut self, at: DateTime<Utc>) -> Self {
        self.columns.set("quote_accepted_at", at);
        self
    }

    pub fn started(mut self, at: DateTime<Utc>) -> Self {
        self.columns.set("actual_start_time", at);
        self
    }

    pub fn finished(mut self, at: DateTime<Utc>, duration_minutes: Option<i64>) -> Self {
        self.columns.set("actual_end_time", at);
        self.columns
            .set("actual_duration_minutes", duration_minutes);
        self
    }

    pub fn cancelled(mut self, at: DateTime<Utc>, reason: &str) -> Self {
        self.columns.set("cancelled_at", at);
        self.columns.set("cancellation_reason", reason);
        self
    }
}

/// Result of a cancellation transaction.
#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub booking: Booking,
    /// Assignment rejected as part of the cancel, if one was active.
    pub rejected_assignment: Option<i64>,
    /// Refund recorded for an already-paid booking.
    pub refund: Option<RefundIntent>,
}

pub(crate) fn booking_from_row(row: &SqliteRow) -> Result<Booking, CoreError> {
    let quote_amount: Option<Money> = parse_opt_col(row, "quote_amount")?;
    let created_at = time_col(row, "created_at")?;
    let quote = match quote_amount {
        Some(amount) => Some(Quote {
            amount,
            notes: row.try_get("quote_notes")?,
            expires_at: opt_time_col(row, "quote_expires_at")?,
            provided_at: opt_time_col(row, "quote_provided_at")?.unwrap_or(created_at),
            provided_by: row
                .try_get::<Option<i64>, _>("quote_provided_by")?
                .unwrap_or_default(),
            accepted_at: opt_time_col(row, "quote_accepted_at")?,
        }),
        None => None,
    };

    Ok(Booking {
        id: row.try_get("id")?,
        reference: row.try_get("ref")?,
        user_id: row.try_get("user_id")?,
        service_id: row.try_get("service_id")?,
        booking_type: parse_col(row, "booking_type")?,
        status: parse_col(row, "status")?,
        payment_status: parse_col(row, "payment_status")?,
        scheduled_date: parse_opt_col(row, "scheduled_date")?,
        scheduled_time: parse_opt_col(row, "scheduled_time")?,
        scheduled_end_time: parse_opt_col(row, "scheduled_end_time")?,
        address: json_col(row, "address_json")?,
        contact_phone: row.try_get("contact_phone")?,
        notes: row.try_get("notes")?,
        quote,
        hold_expires_at: opt_time_col(row, "hold_expires_at")?,
        payment_order_id: row.try_get("payment_order_id")?,
        payment_id: row.try_get("payment_id")?,
        payment_completed_at: opt_time_col(row, "payment_completed_at")?,
        amount: parse_opt_col(row, "amount")?,
        actual_start_time: opt_time_col(row, "actual_start_time")?,
        actual_end_time: opt_time_col(row, "actual_end_time")?,
        actual_duration_minutes: row.try_get("actual_duration_minutes")?,
        cancelled_at: opt_time_col(row, "cancelled_at")?,
        cancellation_reason: row.try_get("cancellation_reason")?,
        created_at,
        updated_at: time_col(row, "updated_at")?,
    })
}

pub(crate) async fn get_booking_in(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<Booking>, CoreError> {
    let sql = format!("SELECT {} FROM bookings WHERE id = ?", BOOKING_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;
    row.as_ref().map(booking_from_row).transpose()
}

/// Take the per-date write lock. Must be the first statement of the
/// transaction so the lock is acquired before any snapshot is read.
pub(crate) async fn lock_capacity_day(
    conn: &mut SqliteConnection,
    date: NaiveDate,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO capacity_locks (slot_date, version) VALUES (?, 1)
        ON CONFLICT(slot_date) DO UPDATE SET version = version + 1
        "#,
    )
    .bind(format_date(date))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn obligation_end(end: Option<SlotTime>, start: SlotTime, buffer: i64) -> SlotTime {
    end.unwrap_or(start)
        .saturating_add(u32::try_from(buffer).unwrap_or(0))
}

/// Assignments and pool reservations on `date` as seen at `now`.
///
/// Reservations are reserving-status bookings without an active assignment
/// whose hold, if any, has not lapsed.
pub(crate) async fn load_obligations_in(
    conn: &mut SqliteConnection,
    date: NaiveDate,
    now: DateTime<Utc>,
    exclude_booking: Option<i64>,
) -> Result<Vec<Obligation>, CoreError> {
    let active = sql_list(AssignmentStatus::ACTIVE.iter().map(|s| s.as_str()));
    let reserving = sql_list(BookingStatus::RESERVING.iter().map(|s| s.as_str()));
    let day = format_date(date);
    let exclude = exclude_booking.unwrap_or(-1);

    let assignment_sql = format!(
        r#"
        SELECT a.worker_id, a.booking_id, b.scheduled_time, b.scheduled_end_time, b.buffer_minutes
        FROM worker_assignments a
        JOIN bookings b ON b.id = a.booking_id
        WHERE b.scheduled_date = ? AND b.scheduled_time IS NOT NULL
          AND a.status IN ({}) AND a.booking_id != ?
        ORDER BY a.booking_id ASC
        "#,
        active
    );
    let rows = sqlx::query(&assignment_sql)
        .bind(&day)
        .bind(exclude)
        .fetch_all(&mut *conn)
        .await?;

    let mut obligations = Vec::with_capacity(rows.len());
    for row in &rows {
        let start: SlotTime = parse_col(row, "scheduled_time")?;
        let end = parse_opt_col(row, "scheduled_end_time")?;
        obligations.push(Obligation::assignment(
            row.try_get("worker_id")?,
            row.try_get("booking_id")?,
            start,
            obligation_end(end, start, row.try_get("buffer_minutes")?),
        ));
    }

    let reservation_sql = format!(
        r#"
        SELECT b.id, b.scheduled_time, b.scheduled_end_time, b.buffer_minutes
        FROM bookings b
        WHERE b.scheduled_date = ? AND b.scheduled_time IS NOT NULL
          AND b.status IN ({})
          AND (b.hold_expires_at IS NULL OR b.hold_expires_at > ?)
          AND b.id != ?
          AND NOT EXISTS (
              SELECT 1 FROM worker_assignments a
              WHERE a.booking_id = b.id AND a.status IN ({})
          )
        ORDER BY b.id ASC
        "#,
        reserving, active
    );
    let rows = sqlx::query(&reservation_sql)
        .bind(&day)
        .bind(to_ms(now))
        .bind(exclude)
        .fetch_all(&mut *conn)
        .await?;

    for row in &rows {
        let start: SlotTime = parse_col(row, "scheduled_time")?;
        let end = parse_opt_col(row, "scheduled_end_time")?;
        obligations.push(Obligation::reservation(
            row.try_get("id")?,
            start,
            obligation_end(end, start, row.try_get("buffer_minutes")?),
        ));
    }

    Ok(obligations)
}

/// Re-derive the day's obligor units and admit one more unit for `claim`.
pub(crate) async fn admit_in(
    conn: &mut SqliteConnection,
    claim: &CapacityClaim,
    now: DateTime<Utc>,
    exclude_booking: Option<i64>,
) -> Result<(), CoreError> {
    let pool_size = count_active_workers_in(conn).await?;
    let obligations = load_obligations_in(conn, claim.date, now, exclude_booking).await?;

    check_capacity(&obligations, pool_size, claim.start, claim.unit_minutes).map_err(
        |shortfall| {
            info!(
                date = %claim.date,
                start = %claim.start,
                slot = %shortfall.slot,
                busy_units = shortfall.busy_units,
                pool_size = shortfall.pool_size,
                "Capacity check rejected booking window"
            );
            CoreError::SlotFull(format!("{} {}", format_date(claim.date), claim.start))
        },
    )
}

async fn insert_booking_in(
    conn: &mut SqliteConnection,
    new: &NewBooking,
    now: DateTime<Utc>,
) -> Result<Booking, CoreError> {
    let address_json = serde_json::to_string(&new.address)
        .map_err(|e| CoreError::Internal(format!("address encode: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO bookings (
            ref, user_id, service_id, booking_type, status, payment_status,
            scheduled_date, scheduled_time, scheduled_end_time, buffer_minutes,
            address_json, contact_phone, notes, amount, hold_expires_at,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&new.reference)
    .bind(new.user_id)
    .bind(new.service_id)
    .bind(new.booking_type.as_str())
    .bind(new.status.as_str())
    .bind(new.scheduled_date.map(format_date))
    .bind(new.scheduled_time.map(|t| t.to_string()))
    .bind(new.scheduled_end_time.map(|t| t.to_string()))
    .bind(i64::from(new.buffer_minutes))
    .bind(address_json)
    .bind(new.contact_phone.as_deref())
    .bind(new.notes.as_deref())
    .bind(new.amount.map(|a| a.to_canonical_string()))
    .bind(new.hold_expires_at.map(to_ms))
    .bind(to_ms(now))
    .bind(to_ms(now))
    .execute(&mut *conn)
    .await?;

    get_booking_in(conn, result.last_insert_rowid())
        .await?
        .ok_or_else(|| CoreError::Internal("inserted booking vanished".into()))
}

/// Compare-and-set status transition.
///
/// Succeeds only when the row is currently in one of `from`. On a miss the
/// row is re-read to tell `NotFound` from `IllegalTransition`.
pub(crate) async fn transition_in(
    conn: &mut SqliteConnection,
    id: i64,
    from: &[BookingStatus],
    to: BookingStatus,
    patch: &BookingPatch,
    now: DateTime<Utc>,
) -> Result<Booking, CoreError> {
    debug_assert!(from.iter().all(|f| *f == to || f.can_transition_to(to)));

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE bookings SET status = ");
    qb.push_bind(to.as_str());
    qb.push(", updated_at = ");
    qb.push_bind(to_ms(now));
    patch.columns.push_to(&mut qb);
    qb.push(" WHERE id = ");
    qb.push_bind(id);
    qb.push(format!(
        " AND status IN ({})",
        sql_list(from.iter().map(|s| s.as_str()))
    ));

    let result = qb.build().execute(&mut *conn).await?;

    let current = get_booking_in(conn, id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("booking {}", id)))?;
    if result.rows_affected() == 0 {
        return Err(CoreError::IllegalTransition(format!(
            "booking {} is {}, cannot move to {}",
            id, current.status, to
        )));
    }
    debug!(booking_id = id, status = %to, "Booking transitioned");
    Ok(current)
}

impl Repository {
    /// Insert a booking that occupies no capacity (unscheduled inquiries).
    pub async fn insert_booking(
        &self,
        new: &NewBooking,
        now: DateTime<Utc>,
    ) -> Result<Booking, CoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_booking_in(&mut conn, new, now).await
    }

    /// Verify capacity for `claim` and insert the booking in one transaction.
    ///
    /// # Errors
    /// `SlotFull` when any grid position of the window is at capacity.
    pub async fn insert_booking_with_capacity(
        &self,
        new: &NewBooking,
        claim: CapacityClaim,
        now: DateTime<Utc>,
    ) -> Result<Booking, CoreError> {
        let mut tx = self.pool.begin().await?;
        lock_capacity_day(&mut tx, claim.date).await?;
        admit_in(&mut tx, &claim, now, None).await?;
        let booking = insert_booking_in(&mut tx, new, now).await?;
        tx.commit().await?;
        Ok(booking)
    }

    pub async fn get_booking(&self, id: i64) -> Result<Option<Booking>, CoreError> {
        let mut conn = self.pool.acquire().await?;
        get_booking_in(&mut conn, id).await
    }

    pub async fn get_booking_by_order(
        &self,
        order_id: &str,
    ) -> Result<Option<Booking>, CoreError> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE payment_order_id = ?",
            BOOKING_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(booking_from_row).transpose()
    }

    /// Compare-and-set transition outside any capacity lock.
    pub async fn transition_booking(
        &self,
        id: i64,
        from: &[BookingStatus],
        to: BookingStatus,
        patch: BookingPatch,
        now: DateTime<Utc>,
    ) -> Result<Booking, CoreError> {
        let mut conn = self.pool.acquire().await?;
        transition_in(&mut conn, id, from, to, &patch, now).await
    }

    /// Transition that (re)claims capacity for the booking's window.
    ///
    /// A booking still holding a live reservation for exactly `claim` is
    /// admitted without re-checking; otherwise the day is re-derived
    /// without the booking itself and one more unit must fit.
    pub async fn transition_booking_with_capacity(
        &self,
        id: i64,
        from: &[BookingStatus],
        to: BookingStatus,
        patch: BookingPatch,
        claim: CapacityClaim,
        now: DateTime<Utc>,
    ) -> Result<Booking, CoreError> {
        let mut tx = self.pool.begin().await?;
        lock_capacity_day(&mut tx, claim.date).await?;

        let current = get_booking_in(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("booking {}", id)))?;
        if !from.contains(&current.status) {
            return Err(CoreError::IllegalTransition(format!(
                "booking {} is {}, cannot move to {}",
                id, current.status, to
            )));
        }

        let holds_claim = BookingStatus::RESERVING.contains(&current.status)
            && current.scheduled_date == Some(claim.date)
            && current.scheduled_time == Some(claim.start)
            && !current.hold_expired_at(now);
        if !holds_claim {
            admit_in(&mut tx, &claim, now, Some(id)).await?;
        }

        let booking = transition_in(&mut tx, id, from, to, &patch, now).await?;
        tx.commit().await?;
        Ok(booking)
    }

    /// Cancel a booking with every dependent side effect in one transaction:
    /// the active assignment is rejected, live locations are deactivated,
    /// pending booking payments expire and a paid booking records a refund
    /// intent.
    pub async fn cancel_booking(
        &self,
        id: i64,
        from: &[BookingStatus],
        patch: BookingPatch,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome, CoreError> {
        let mut tx = self.pool.begin().await?;
        let booking = transition_in(&mut tx, id, from, BookingStatus::Cancelled, &patch, now).await?;

        let active = sql_list(AssignmentStatus::ACTIVE.iter().map(|s| s.as_str()));
        let rejected_assignment: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT id FROM worker_assignments WHERE booking_id = ? AND status IN ({})",
            active
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(assignment_id) = rejected_assignment {
            sqlx::query(
                r#"
                UPDATE worker_assignments
                SET status = 'rejected', rejected_at = ?, rejection_reason = 'booking cancelled'
                WHERE id = ?
                "#,
            )
            .bind(to_ms(now))
            .bind(assignment_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE worker_locations SET is_active = 0, status = 'stopped', last_updated = ?
            WHERE booking_id = ? AND is_active = 1
            "#,
        )
        .bind(to_ms(now))
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE payments SET status = 'expired'
            WHERE related_entity_type = 'booking' AND related_entity_id = ? AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let paid = booking
            .amount
            .or_else(|| booking.quote.as_ref().map(|q| q.amount))
            .filter(|a| a.is_positive());
        let refund = match (booking.payment_status, paid) {
            (PaymentStatus::Completed, Some(amount)) => Some(
                insert_refund_intent_in(&mut tx, id, booking.payment_id.as_deref(), amount, now)
                    .await?,
            ),
            _ => None,
        };

        tx.commit().await?;
        Ok(CancelOutcome {
            booking,
            rejected_assignment,
            refund,
        })
    }

    /// Bookings in `statuses` whose hold lapsed at or before `now`.
    pub async fn list_expired_holds(
        &self,
        statuses: &[BookingStatus],
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>, CoreError> {
        let sql = format!(
            r#"
            SELECT {} FROM bookings
            WHERE status IN ({}) AND hold_expires_at IS NOT NULL AND hold_expires_at <= ?
            ORDER BY id ASC
            "#,
            BOOKING_COLUMNS,
            sql_list(statuses.iter().map(|s| s.as_str()))
        );
        let rows = sqlx::query(&sql)
            .bind(to_ms(now))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(booking_from_row).collect()
    }

    /// Quoted bookings whose quote lapsed at or before `now`.
    pub async fn list_expired_quotes(&self, now: DateTime<Utc>) -> Result<Vec<Booking>, CoreError> {
        let sql = format!(
            r#"
            SELECT {} FROM bookings
            WHERE status = 'quote_provided' AND quote_expires_at IS NOT NULL AND quote_expires_at <= ?
            ORDER BY id ASC
            "#,
            BOOKING_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(to_ms(now))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(booking_from_row).collect()
    }

    /// Obligations on `date` as seen at `now`, outside any lock.
    pub async fn load_obligations(
        &self,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<Obligation>, CoreError> {
        let mut conn = self.pool.acquire().await?;
        load_obligations_in(&mut conn, date, now, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{seed_fixed_service, seed_user, setup_test_db, t0};
    use super::*;
    use crate::domain::{payment::new_reference, UserType};
    use crate::engine::ObligorKind;
    use chrono::Duration;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()
    }

    fn new_booking(user_id: i64, service_id: i64, start: &str, hold: Option<DateTime<Utc>>) -> NewBooking {
        let start: SlotTime = start.parse().unwrap();
        NewBooking {
            reference: new_reference("BK"),
            user_id,
            service_id,
            booking_type: BookingType::Regular,
            status: BookingStatus::Pending,
            scheduled_date: Some(date()),
            scheduled_time: Some(start),
            scheduled_end_time: start.checked_add(60),
            buffer_minutes: 30,
            address: BookingAddress::default(),
            contact_phone: None,
            notes: None,
            amount: Some(Money::from_rupees(499)),
            hold_expires_at: hold,
        }
    }

    fn claim(start: &str) -> CapacityClaim {
        CapacityClaim {
            date: date(),
            start: start.parse().unwrap(),
            unit_minutes: 90,
        }
    }

    #[tokio::test]
    async fn test_insert_with_capacity_respects_pool() {
        let (repo, _temp) = setup_test_db().await;
        seed_user(&repo, "w1", UserType::Worker).await;
        let customer = seed_user(&repo, "c1", UserType::Customer).await;
        let service = seed_fixed_service(&repo, 499).await;

        let first = repo
            .insert_booking_with_capacity(
                &new_booking(customer.id, service.id, "14:00", None),
                claim("14:00"),
                t0(),
            )
            .await
            .expect("first booking fits");
        assert_eq!(first.status, BookingStatus::Pending);
        assert!(first.reference.starts_with("BK"));

        // 15:00 overlaps the 14:00 booking's buffer tail.
        let err = repo
            .insert_booking_with_capacity(
                &new_booking(customer.id, service.id, "15:00", None),
                claim("15:00"),
                t0(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SlotFull(_)));

        repo.insert_booking_with_capacity(
            &new_booking(customer.id, service.id, "15:30", None),
            claim("15:30"),
            t0(),
        )
        .await
        .expect("window after buffer is free");
    }

    #[tokio::test]
    async fn test_lapsed_hold_no_longer_reserves() {
        let (repo, _temp) = setup_test_db().await;
        seed_user(&repo, "w1", UserType::Worker).await;
        let customer = seed_user(&repo, "c1", UserType::Customer).await;
        let service = seed_fixed_service(&repo, 499).await;

        let hold = t0() + Duration::minutes(15);
        repo.insert_booking_with_capacity(
            &new_booking(customer.id, service.id, "14:00", Some(hold)),
            claim("14:00"),
            t0(),
        )
        .await
        .unwrap();

        let live = repo.load_obligations(date(), t0()).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].kind, ObligorKind::Reservation);

        let lapsed = repo.load_obligations(date(), hold).await.unwrap();
        assert!(lapsed.is_empty());
    }

    #[tokio::test]
    async fn test_cas_transition_rejects_wrong_source() {
        let (repo, _temp) = setup_test_db().await;
        seed_user(&repo, "w1", UserType::Worker).await;
        let customer = seed_user(&repo, "c1", UserType::Customer).await;
        let service = seed_fixed_service(&repo, 499).await;
        let booking = repo
            .insert_booking_with_capacity(
                &new_booking(customer.id, service.id, "10:00", None),
                claim("10:00"),
                t0(),
            )
            .await
            .unwrap();

        let moved = repo
            .transition_booking(
                booking.id,
                &[BookingStatus::Pending],
                BookingStatus::PaymentPending,
                BookingPatch::new().order("order_X"),
                t0(),
            )
            .await
            .unwrap();
        assert_eq!(moved.status, BookingStatus::PaymentPending);
        assert_eq!(moved.payment_order_id.as_deref(), Some("order_X"));

        let err = repo
            .transition_booking(
                booking.id,
                &[BookingStatus::Pending],
                BookingStatus::PaymentPending,
                BookingPatch::new(),
                t0(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::IllegalTransition(_)));

        let err = repo
            .transition_booking(
                9999,
                &[BookingStatus::Pending],
                BookingStatus::Confirmed,
                BookingPatch::new(),
                t0(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cancel_paid_booking_records_refund() {
        let (repo, _temp) = setup_test_db().await;
        seed_user(&repo, "w1", UserType::Worker).await;
        let customer = seed_user(&repo, "c1", UserType::Customer).await;
        let service = seed_fixed_service(&repo, 499).await;
        let booking = repo
            .insert_booking_with_capacity(
                &new_booking(customer.id, service.id, "10:00", None),
                claim("10:00"),
                t0(),
            )
            .await
            .unwrap();
        repo.transition_booking(
            booking.id,
            &[BookingStatus::Pending],
            BookingStatus::Confirmed,
            BookingPatch::new().payment_completed("pay_1", t0()),
            t0(),
        )
        .await
        .unwrap();

        let outcome = repo
            .cancel_booking(
                booking.id,
                BookingStatus::NON_TERMINAL,
                BookingPatch::new().cancelled(t0(), "changed plans"),
                t0(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.booking.status, BookingStatus::Cancelled);
        assert_eq!(outcome.booking.cancellation_reason.as_deref(), Some("changed plans"));
        let refund = outcome.refund.expect("paid booking records a refund");
        assert_eq!(refund.amount, Money::from_rupees(499));
        assert_eq!(refund.payment_id.as_deref(), Some("pay_1"));

        // Capacity is released.
        assert!(repo.load_obligations(date(), t0()).await.unwrap().is_empty());
    }
}
