//! Live worker locations.

use crate::domain::{Coordinate, TrackingStatus, WorkerLocation};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{parse_col, time_col, to_ms, Repository};

const LOCATION_COLUMNS: &str = r#"
    id, worker_id, assignment_id, booking_id, latitude, longitude, accuracy,
    status, last_updated, is_active
"#;

fn location_from_row(row: &SqliteRow) -> Result<WorkerLocation, CoreError> {
    Ok(WorkerLocation {
        id: row.try_get("id")?,
        worker_id: row.try_get("worker_id")?,
        assignment_id: row.try_get("assignment_id")?,
        booking_id: row.try_get("booking_id")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        accuracy: row.try_get("accuracy")?,
        status: parse_col(row, "status")?,
        last_updated: time_col(row, "last_updated")?,
        is_active: row.try_get("is_active")?,
    })
}

impl Repository {
    /// Open the active location row for an in-progress assignment.
    ///
    /// The insert is conditional on the assignment being `in_progress` and
    /// owned by `worker_id`, so an active row never outlives its job.
    ///
    /// # Errors
    /// `Conflict` when an active row already exists; `IllegalTransition`
    /// when the assignment is not in progress for this worker.
    pub async fn insert_location(
        &self,
        worker_id: i64,
        assignment_id: i64,
        position: Coordinate,
        accuracy: Option<f64>,
        status: TrackingStatus,
        now: DateTime<Utc>,
    ) -> Result<WorkerLocation, CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO worker_locations (
                worker_id, assignment_id, booking_id, latitude, longitude,
                accuracy, status, last_updated, is_active
            )
            SELECT a.worker_id, a.id, a.booking_id, ?, ?, ?, ?, ?, 1
            FROM worker_assignments a
            WHERE a.id = ? AND a.worker_id = ? AND a.status = 'in_progress'
            "#,
        )
        .bind(position.latitude)
        .bind(position.longitude)
        .bind(accuracy)
        .bind(status.as_str())
        .bind(to_ms(now))
        .bind(assignment_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::IllegalTransition(format!(
                "assignment {} is not in progress for worker {}",
                assignment_id, worker_id
            )));
        }

        self.get_location(result.last_insert_rowid())
            .await?
            .ok_or_else(|| CoreError::Internal("inserted location vanished".into()))
    }

    pub async fn get_location(&self, id: i64) -> Result<Option<WorkerLocation>, CoreError> {
        let sql = format!("SELECT {} FROM worker_locations WHERE id = ?", LOCATION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(location_from_row).transpose()
    }

    pub async fn active_location(
        &self,
        assignment_id: i64,
    ) -> Result<Option<WorkerLocation>, CoreError> {
        let sql = format!(
            "SELECT {} FROM worker_locations WHERE assignment_id = ? AND is_active = 1",
            LOCATION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(assignment_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(location_from_row).transpose()
    }

    /// Active row when present, otherwise the most recently updated one.
    pub async fn latest_location(
        &self,
        assignment_id: i64,
    ) -> Result<Option<WorkerLocation>, CoreError> {
        let sql = format!(
            r#"
            SELECT {} FROM worker_locations WHERE assignment_id = ?
            ORDER BY is_active DESC, last_updated DESC, id DESC LIMIT 1
            "#,
            LOCATION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(assignment_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(location_from_row).transpose()
    }

    /// Overwrite the position of an active row.
    pub async fn update_location(
        &self,
        id: i64,
        position: Coordinate,
        accuracy: Option<f64>,
        status: TrackingStatus,
        now: DateTime<Utc>,
    ) -> Result<WorkerLocation, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE worker_locations
            SET latitude = ?, longitude = ?, accuracy = ?, status = ?, last_updated = ?
            WHERE id = ? AND is_active = 1
            "#,
        )
        .bind(position.latitude)
        .bind(position.longitude)
        .bind(accuracy)
        .bind(status.as_str())
        .bind(to_ms(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        let location = self
            .get_location(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("location {}", id)))?;
        if result.rows_affected() == 0 {
            return Err(CoreError::IllegalTransition(format!(
                "location {} is no longer active",
                id
            )));
        }
        Ok(location)
    }

    /// Deactivate every live row of an assignment. Idempotent.
    pub async fn deactivate_locations(
        &self,
        assignment_id: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE worker_locations SET is_active = 0, status = 'stopped', last_updated = ?
            WHERE assignment_id = ? AND is_active = 1
            "#,
        )
        .bind(to_ms(now))
        .bind(assignment_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
