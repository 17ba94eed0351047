//! Worker assignments, their booking side effects and earnings credit.

use crate::domain::{
    AssignmentNotes, AssignmentStatus, Booking, BookingStatus, CompletionDetails, Money, Payment,
    PaymentMethod, PaymentStatus, PaymentType, SlotTime, WorkerAssignment,
};
use crate::engine::{Obligation, ObligorKind};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use sqlx::query_builder::QueryBuilder;
use sqlx::sqlite::{Sqlite, SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::debug;

use super::bookings::{load_obligations_in, lock_capacity_day, transition_in, BookingPatch};
use super::catalog::get_user_in;
use super::payments::{apply_wallet_delta_in, insert_payment_in, NewPayment};
use super::{opt_time_col, parse_col, sql_list, time_col, to_ms, ColumnSet, Repository};

const ASSIGNMENT_COLUMNS: &str = r#"
    id, booking_id, worker_id, assigned_by, status, assigned_at, accepted_at,
    rejected_at, started_at, completed_at, assign_notes, accept_notes,
    reject_notes, start_notes, complete_notes, rejection_reason, completion_json
"#;

/// Wallet credit written in the same transaction as a completion.
#[derive(Debug, Clone, PartialEq)]
pub struct EarningsCredit {
    pub reference: String,
    pub amount: Money,
}

/// One step of the assignment state machine with its booking side effect.
#[derive(Debug, Clone)]
pub struct AssignmentTransition {
    pub assignment_id: i64,
    /// Required owner; `None` for admin overrides.
    pub worker_id: Option<i64>,
    pub from: Vec<AssignmentStatus>,
    pub to: AssignmentStatus,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub completion: Option<CompletionDetails>,
    pub booking_from: Vec<BookingStatus>,
    pub booking_to: BookingStatus,
    pub booking_patch: BookingPatch,
    pub credit: Option<EarningsCredit>,
}

/// Rows touched by an assignment transition.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AssignmentOutcome {
    pub assignment: WorkerAssignment,
    pub booking: Booking,
    pub credit: Option<Payment>,
}

fn assignment_from_row(row: &SqliteRow) -> Result<WorkerAssignment, CoreError> {
    let completion: Option<String> = row.try_get("completion_json")?;
    let completion = completion
        .map(|raw| serde_json::from_str::<CompletionDetails>(&raw))
        .transpose()
        .map_err(|e| CoreError::Internal(format!("corrupt column completion_json: {}", e)))?;

    Ok(WorkerAssignment {
        id: row.try_get("id")?,
        booking_id: row.try_get("booking_id")?,
        worker_id: row.try_get("worker_id")?,
        assigned_by: row.try_get("assigned_by")?,
        status: parse_col(row, "status")?,
        assigned_at: time_col(row, "assigned_at")?,
        accepted_at: opt_time_col(row, "accepted_at")?,
        rejected_at: opt_time_col(row, "rejected_at")?,
        started_at: opt_time_col(row, "started_at")?,
        completed_at: opt_time_col(row, "completed_at")?,
        notes: AssignmentNotes {
            assign: row.try_get("assign_notes")?,
            accept: row.try_get("accept_notes")?,
            reject: row.try_get("reject_notes")?,
            start: row.try_get("start_notes")?,
            complete: row.try_get("complete_notes")?,
        },
        rejection_reason: row.try_get("rejection_reason")?,
        completion,
    })
}

pub(crate) async fn get_assignment_in(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<WorkerAssignment>, CoreError> {
    let sql = format!(
        "SELECT {} FROM worker_assignments WHERE id = ?",
        ASSIGNMENT_COLUMNS
    );
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;
    row.as_ref().map(assignment_from_row).transpose()
}

/// Timestamp and notes columns stamped when entering `status`.
fn stamp_columns(status: AssignmentStatus) -> Option<(&'static str, &'static str)> {
    match status {
        AssignmentStatus::Assigned => None,
        AssignmentStatus::Accepted => Some(("accepted_at", "accept_notes")),
        AssignmentStatus::Rejected => Some(("rejected_at", "reject_notes")),
        AssignmentStatus::InProgress => Some(("started_at", "start_notes")),
        AssignmentStatus::Completed => Some(("completed_at", "complete_notes")),
    }
}

fn windows_overlap(a: &Obligation, start: SlotTime, end: SlotTime) -> bool {
    a.start.snap_down() < end && start.snap_down() < a.end
}

impl Repository {
    /// Assign a worker to a confirmed booking.
    ///
    /// Runs under the booking date's capacity lock: the booking's pool
    /// reservation becomes the worker's unit, and a worker already obliged
    /// to an overlapping window is refused.
    pub async fn insert_assignment(
        &self,
        booking_id: i64,
        worker_id: i64,
        assigned_by: i64,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(WorkerAssignment, Booking), CoreError> {
        let scheduled = self
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("booking {}", booking_id)))?;
        let (Some(date), Some(start)) = (scheduled.scheduled_date, scheduled.scheduled_time)
        else {
            return Err(CoreError::InvalidInput(format!(
                "booking {} has no schedule",
                booking_id
            )));
        };

        let mut tx = self.pool.begin().await?;
        lock_capacity_day(&mut tx, date).await?;

        // An accepted job puts the booking back to confirmed.
        let active_sql = format!(
            "SELECT id FROM worker_assignments WHERE booking_id = ? AND status IN ({})",
            sql_list(AssignmentStatus::ACTIVE.iter().map(|s| s.as_str()))
        );
        let active: Option<i64> = sqlx::query_scalar(&active_sql)
            .bind(booking_id)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(active_id) = active {
            return Err(CoreError::IllegalTransition(format!(
                "booking {} already has active assignment {}",
                booking_id, active_id
            )));
        }

        let booking = transition_in(
            &mut tx,
            booking_id,
            &[BookingStatus::Confirmed],
            BookingStatus::Assigned,
            &BookingPatch::new(),
            now,
        )
        .await?;

        let worker = get_user_in(&mut tx, worker_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("worker {}", worker_id)))?;
        if !worker.is_active_worker() {
            return Err(CoreError::InvalidInput(format!(
                "user {} is not an active worker",
                worker_id
            )));
        }

        let buffer: i64 = sqlx::query_scalar("SELECT buffer_minutes FROM bookings WHERE id = ?")
            .bind(booking_id)
            .fetch_one(&mut *tx)
            .await?;
        let end = booking
            .scheduled_end_time
            .unwrap_or(start)
            .saturating_add(u32::try_from(buffer).unwrap_or(0));
        let obligations = load_obligations_in(&mut tx, date, now, Some(booking_id)).await?;
        if obligations
            .iter()
            .filter(|o| o.kind == ObligorKind::Assignment && o.id == worker_id)
            .any(|o| windows_overlap(o, start, end))
        {
            return Err(CoreError::Conflict(format!(
                "worker {} already has an overlapping assignment",
                worker_id
            )));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO worker_assignments (booking_id, worker_id, assigned_by, status, assigned_at, assign_notes)
            VALUES (?, ?, ?, 'assigned', ?, ?)
            "#,
        )
        .bind(booking_id)
        .bind(worker_id)
        .bind(assigned_by)
        .bind(to_ms(now))
        .bind(notes)
        .execute(&mut *tx)
        .await?;

        let assignment = get_assignment_in(&mut tx, result.last_insert_rowid())
            .await?
            .ok_or_else(|| CoreError::Internal("inserted assignment vanished".into()))?;
        tx.commit().await?;

        debug!(booking_id, worker_id, assignment_id = assignment.id, "Worker assigned");
        Ok((assignment, booking))
    }

    pub async fn get_assignment(&self, id: i64) -> Result<Option<WorkerAssignment>, CoreError> {
        let mut conn = self.pool.acquire().await?;
        get_assignment_in(&mut conn, id).await
    }

    /// The booking's single non-terminal assignment, if any.
    pub async fn active_assignment_for_booking(
        &self,
        booking_id: i64,
    ) -> Result<Option<WorkerAssignment>, CoreError> {
        let sql = format!(
            "SELECT {} FROM worker_assignments WHERE booking_id = ? AND status IN ({})",
            ASSIGNMENT_COLUMNS,
            sql_list(AssignmentStatus::ACTIVE.iter().map(|s| s.as_str()))
        );
        let row = sqlx::query(&sql)
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(assignment_from_row).transpose()
    }

    pub async fn list_assignments_for_booking(
        &self,
        booking_id: i64,
    ) -> Result<Vec<WorkerAssignment>, CoreError> {
        let sql = format!(
            "SELECT {} FROM worker_assignments WHERE booking_id = ? ORDER BY id ASC",
            ASSIGNMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(booking_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(assignment_from_row).collect()
    }

    /// Apply one assignment step, its booking transition, location
    /// deactivation on terminal states and any earnings credit, atomically.
    ///
    /// # Errors
    /// `Unauthorized` when `worker_id` does not own the assignment;
    /// `IllegalTransition` when either row is in an unexpected status.
    pub async fn transition_assignment(
        &self,
        step: &AssignmentTransition,
        now: DateTime<Utc>,
    ) -> Result<AssignmentOutcome, CoreError> {
        let mut columns = ColumnSet::default();
        if let Some((at_column, notes_column)) = stamp_columns(step.to) {
            columns.set(at_column, now);
            if let Some(notes) = &step.notes {
                columns.set(notes_column, notes.as_str());
            }
        }
        if let Some(reason) = &step.rejection_reason {
            columns.set("rejection_reason", reason.as_str());
        }
        if let Some(completion) = &step.completion {
            let json = serde_json::to_string(completion)
                .map_err(|e| CoreError::Internal(format!("completion encode: {}", e)))?;
            columns.set("completion_json", json);
        }

        let mut tx = self.pool.begin().await?;

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE worker_assignments SET status = ");
        qb.push_bind(step.to.as_str());
        columns.push_to(&mut qb);
        qb.push(" WHERE id = ");
        qb.push_bind(step.assignment_id);
        if let Some(worker_id) = step.worker_id {
            qb.push(" AND worker_id = ");
            qb.push_bind(worker_id);
        }
        qb.push(format!(
            " AND status IN ({})",
            sql_list(step.from.iter().map(|s| s.as_str()))
        ));
        let result = qb.build().execute(&mut *tx).await?;

        let assignment = get_assignment_in(&mut tx, step.assignment_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("assignment {}", step.assignment_id)))?;
        if result.rows_affected() == 0 {
            if step.worker_id.map_or(false, |w| w != assignment.worker_id) {
                return Err(CoreError::Unauthorized(format!(
                    "assignment {} belongs to another worker",
                    assignment.id
                )));
            }
            return Err(CoreError::IllegalTransition(format!(
                "assignment {} is {}, cannot move to {}",
                assignment.id, assignment.status, step.to
            )));
        }

        let booking = transition_in(
            &mut tx,
            assignment.booking_id,
            &step.booking_from,
            step.booking_to,
            &step.booking_patch,
            now,
        )
        .await?;

        if step.to.is_terminal() {
            sqlx::query(
                r#"
                UPDATE worker_locations SET is_active = 0, status = 'stopped', last_updated = ?
                WHERE assignment_id = ? AND is_active = 1
                "#,
            )
            .bind(to_ms(now))
            .bind(assignment.id)
            .execute(&mut *tx)
            .await?;
        }

        let credit = match &step.credit {
            Some(credit) => {
                let balance =
                    apply_wallet_delta_in(&mut tx, assignment.worker_id, credit.amount)
                        .await?;
                let payment = insert_payment_in(
                    &mut tx,
                    &NewPayment {
                        reference: credit.reference.clone(),
                        user_id: assignment.worker_id,
                        amount: credit.amount,
                        payment_type: PaymentType::WalletRecharge,
                        method: PaymentMethod::InternalCredit,
                        status: PaymentStatus::Completed,
                        related_entity_type: Some("booking".into()),
                        related_entity_id: Some(assignment.booking_id),
                        order_id: None,
                        metadata: serde_json::json!({
                            "source": "earnings",
                            "assignment_id": assignment.id,
                        }),
                    },
                    Some(balance),
                    now,
                )
                .await?;
                Some(payment)
            }
            None => None,
        };

        tx.commit().await?;
        debug!(
            assignment_id = assignment.id,
            booking_id = booking.id,
            status = %assignment.status,
            "Assignment transitioned"
        );
        Ok(AssignmentOutcome {
            assignment,
            booking,
            credit,
        })
    }
}
