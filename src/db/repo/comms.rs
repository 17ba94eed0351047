//! Chat rooms and call-masking bindings.

use crate::domain::{CallMasking, ChatRoom};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{opt_time_col, time_col, to_ms, Repository};

fn chat_room_from_row(row: &SqliteRow) -> Result<ChatRoom, CoreError> {
    Ok(ChatRoom {
        id: row.try_get("id")?,
        booking_id: row.try_get("booking_id")?,
        is_active: row.try_get("is_active")?,
        created_at: time_col(row, "created_at")?,
        closed_at: opt_time_col(row, "closed_at")?,
        close_reason: row.try_get("close_reason")?,
    })
}

fn masking_from_row(row: &SqliteRow) -> Result<CallMasking, CoreError> {
    Ok(CallMasking {
        id: row.try_get("id")?,
        booking_id: row.try_get("booking_id")?,
        customer_phone: row.try_get("customer_phone")?,
        worker_phone: row.try_get("worker_phone")?,
        is_active: row.try_get("is_active")?,
        created_at: time_col(row, "created_at")?,
        updated_at: time_col(row, "updated_at")?,
    })
}

impl Repository {
    /// Create the booking's chat room, or return the existing one.
    pub async fn ensure_chat_room(
        &self,
        booking_id: i64,
        now: DateTime<Utc>,
    ) -> Result<ChatRoom, CoreError> {
        sqlx::query(
            r#"
            INSERT INTO chat_rooms (booking_id, is_active, created_at) VALUES (?, 1, ?)
            ON CONFLICT(booking_id) DO NOTHING
            "#,
        )
        .bind(booking_id)
        .bind(to_ms(now))
        .execute(&self.pool)
        .await?;

        self.get_chat_room(booking_id)
            .await?
            .ok_or_else(|| CoreError::Internal("chat room vanished".into()))
    }

    pub async fn get_chat_room(&self, booking_id: i64) -> Result<Option<ChatRoom>, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, booking_id, is_active, created_at, closed_at, close_reason
            FROM chat_rooms WHERE booking_id = ?
            "#,
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(chat_room_from_row).transpose()
    }

    /// Close an open chat room. Returns whether a room was closed.
    pub async fn close_chat_room(
        &self,
        booking_id: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE chat_rooms SET is_active = 0, closed_at = ?, close_reason = ?
            WHERE booking_id = ? AND is_active = 1
            "#,
        )
        .bind(to_ms(now))
        .bind(reason)
        .bind(booking_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Bind (or re-bind) the two parties of a booking and activate masking.
    pub async fn enable_call_masking(
        &self,
        booking_id: i64,
        customer_phone: &str,
        worker_phone: &str,
        now: DateTime<Utc>,
    ) -> Result<CallMasking, CoreError> {
        sqlx::query(
            r#"
            INSERT INTO call_masking (booking_id, customer_phone, worker_phone, is_active, created_at, updated_at)
            VALUES (?, ?, ?, 1, ?, ?)
            ON CONFLICT(booking_id) DO UPDATE SET
                customer_phone = excluded.customer_phone,
                worker_phone = excluded.worker_phone,
                is_active = 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(booking_id)
        .bind(customer_phone)
        .bind(worker_phone)
        .bind(to_ms(now))
        .bind(to_ms(now))
        .execute(&self.pool)
        .await?;

        self.get_call_masking(booking_id)
            .await?
            .ok_or_else(|| CoreError::Internal("call masking row vanished".into()))
    }

    pub async fn get_call_masking(
        &self,
        booking_id: i64,
    ) -> Result<Option<CallMasking>, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, booking_id, customer_phone, worker_phone, is_active, created_at, updated_at
            FROM call_masking WHERE booking_id = ?
            "#,
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(masking_from_row).transpose()
    }

    /// Deactivate masking. Idempotent; a missing row is not an error.
    pub async fn disable_call_masking(
        &self,
        booking_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "UPDATE call_masking SET is_active = 0, updated_at = ? WHERE booking_id = ? AND is_active = 1",
        )
        .bind(to_ms(now))
        .bind(booking_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
