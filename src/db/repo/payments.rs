//! Payment ledger, wallet movements and refund intents.

use crate::domain::{Money, Payment, PaymentMethod, PaymentStatus, PaymentType};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::debug;

use super::catalog::get_user_in;
use super::{json_col, opt_time_col, parse_col, parse_opt_col, time_col, to_ms, Repository};

const PAYMENT_COLUMNS: &str = r#"
    id, ref, user_id, amount, currency, payment_type, method, status,
    related_entity_type, related_entity_id, order_id, payment_id, signature,
    balance_after, metadata, created_at, completed_at
"#;

/// A ledger row about to be written.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub reference: String,
    pub user_id: i64,
    pub amount: Money,
    pub payment_type: PaymentType,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub related_entity_type: Option<String>,
    pub related_entity_id: Option<i64>,
    pub order_id: Option<String>,
    pub metadata: serde_json::Value,
}

/// A refund owed on a cancelled, already-paid booking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefundIntent {
    pub id: i64,
    pub booking_id: i64,
    pub payment_id: Option<String>,
    pub amount: Money,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

fn payment_from_row(row: &SqliteRow) -> Result<Payment, CoreError> {
    Ok(Payment {
        id: row.try_get("id")?,
        reference: row.try_get("ref")?,
        user_id: row.try_get("user_id")?,
        amount: parse_col(row, "amount")?,
        currency: row.try_get("currency")?,
        payment_type: parse_col(row, "payment_type")?,
        method: parse_col(row, "method")?,
        status: parse_col(row, "status")?,
        related_entity_type: row.try_get("related_entity_type")?,
        related_entity_id: row.try_get("related_entity_id")?,
        order_id: row.try_get("order_id")?,
        payment_id: row.try_get("payment_id")?,
        signature: row.try_get("signature")?,
        balance_after: parse_opt_col(row, "balance_after")?,
        metadata: json_col(row, "metadata")?,
        created_at: time_col(row, "created_at")?,
        completed_at: opt_time_col(row, "completed_at")?,
    })
}

fn refund_from_row(row: &SqliteRow) -> Result<RefundIntent, CoreError> {
    Ok(RefundIntent {
        id: row.try_get("id")?,
        booking_id: row.try_get("booking_id")?,
        payment_id: row.try_get("payment_id")?,
        amount: parse_col(row, "amount")?,
        status: row.try_get("status")?,
        created_at: time_col(row, "created_at")?,
    })
}

async fn get_payment_in(conn: &mut SqliteConnection, id: i64) -> Result<Option<Payment>, CoreError> {
    let sql = format!("SELECT {} FROM payments WHERE id = ?", PAYMENT_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;
    row.as_ref().map(payment_from_row).transpose()
}

pub(crate) async fn insert_payment_in(
    conn: &mut SqliteConnection,
    new: &NewPayment,
    balance_after: Option<Money>,
    now: DateTime<Utc>,
) -> Result<Payment, CoreError> {
    let completed_at = (new.status == PaymentStatus::Completed).then(|| to_ms(now));
    let result = sqlx::query(
        r#"
        INSERT INTO payments (
            ref, user_id, amount, currency, payment_type, method, status,
            related_entity_type, related_entity_id, order_id, balance_after,
            metadata, created_at, completed_at
        ) VALUES (?, ?, ?, 'INR', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&new.reference)
    .bind(new.user_id)
    .bind(new.amount.to_canonical_string())
    .bind(new.payment_type.as_str())
    .bind(new.method.as_str())
    .bind(new.status.as_str())
    .bind(new.related_entity_type.as_deref())
    .bind(new.related_entity_id)
    .bind(new.order_id.as_deref())
    .bind(balance_after.map(|b| b.to_canonical_string()))
    .bind(new.metadata.to_string())
    .bind(to_ms(now))
    .bind(completed_at)
    .execute(&mut *conn)
    .await?;

    get_payment_in(conn, result.last_insert_rowid())
        .await?
        .ok_or_else(|| CoreError::Internal("inserted payment vanished".into()))
}

/// Move `delta` into (or out of) a user's wallet and return the new balance.
///
/// Runs inside the caller's transaction, after its first write, so the
/// read-modify-write is serialized.
pub(crate) async fn apply_wallet_delta_in(
    conn: &mut SqliteConnection,
    user_id: i64,
    delta: Money,
) -> Result<Money, CoreError> {
    let user = get_user_in(conn, user_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("user {}", user_id)))?;

    let balance = user.wallet_balance + delta;
    if balance.is_negative() {
        return Err(CoreError::InsufficientBalance(format!(
            "balance {} cannot cover {}",
            user.wallet_balance, -delta
        )));
    }
    sqlx::query("UPDATE users SET wallet_balance = ? WHERE id = ?")
        .bind(balance.to_canonical_string())
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    debug!(user_id, %delta, %balance, "Wallet balance updated");
    Ok(balance)
}

pub(crate) async fn insert_refund_intent_in(
    conn: &mut SqliteConnection,
    booking_id: i64,
    payment_id: Option<&str>,
    amount: Money,
    now: DateTime<Utc>,
) -> Result<RefundIntent, CoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO refund_intents (booking_id, payment_id, amount, status, created_at)
        VALUES (?, ?, ?, 'recorded', ?)
        "#,
    )
    .bind(booking_id)
    .bind(payment_id)
    .bind(amount.to_canonical_string())
    .bind(to_ms(now))
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query(
        "SELECT id, booking_id, payment_id, amount, status, created_at FROM refund_intents WHERE id = ?",
    )
    .bind(result.last_insert_rowid())
    .fetch_one(&mut *conn)
    .await?;
    refund_from_row(&row)
}

impl Repository {
    pub async fn insert_payment(
        &self,
        new: &NewPayment,
        now: DateTime<Utc>,
    ) -> Result<Payment, CoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_payment_in(&mut conn, new, None, now).await
    }

    pub async fn get_payment(&self, id: i64) -> Result<Option<Payment>, CoreError> {
        let mut conn = self.pool.acquire().await?;
        get_payment_in(&mut conn, id).await
    }

    /// Most recent payment carrying a gateway order id.
    pub async fn get_payment_by_order(&self, order_id: &str) -> Result<Option<Payment>, CoreError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE order_id = ? ORDER BY id DESC LIMIT 1",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    pub async fn list_payments_for_user(&self, user_id: i64) -> Result<Vec<Payment>, CoreError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE user_id = ? ORDER BY id ASC",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(payment_from_row).collect()
    }

    pub async fn list_payments_for_entity(
        &self,
        entity_type: &str,
        entity_id: i64,
    ) -> Result<Vec<Payment>, CoreError> {
        let sql = format!(
            r#"
            SELECT {} FROM payments
            WHERE related_entity_type = ? AND related_entity_id = ?
            ORDER BY id ASC
            "#,
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(entity_type)
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(payment_from_row).collect()
    }

    /// Complete a pending payment and apply its wallet effect atomically.
    ///
    /// Recharges credit the owner, debits and withdrawals debit it; booking
    /// payments leave the wallet untouched. `balance_after` is written for
    /// every wallet-moving completion.
    ///
    /// # Errors
    /// `InsufficientBalance` when a debit would overdraw; `IllegalTransition`
    /// when the payment is no longer pending.
    pub async fn complete_payment(
        &self,
        id: i64,
        gateway_payment_id: Option<&str>,
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Payment, CoreError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'completed', completed_at = ?,
                payment_id = COALESCE(?, payment_id),
                signature = COALESCE(?, signature)
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(to_ms(now))
        .bind(gateway_payment_id)
        .bind(signature)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let payment = get_payment_in(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("payment {}", id)))?;
        if result.rows_affected() == 0 {
            return Err(CoreError::IllegalTransition(format!(
                "payment {} is {}",
                payment.reference, payment.status
            )));
        }

        let payment = match payment.payment_type.wallet_sign() {
            0 => payment,
            sign => {
                let delta = if sign > 0 {
                    payment.amount
                } else {
                    -payment.amount
                };
                let balance =
                    apply_wallet_delta_in(&mut tx, payment.user_id, delta).await?;
                sqlx::query("UPDATE payments SET balance_after = ? WHERE id = ?")
                    .bind(balance.to_canonical_string())
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                Payment {
                    balance_after: Some(balance),
                    ..payment
                }
            }
        };

        tx.commit().await?;
        Ok(payment)
    }

    /// Mark pending recharges created at or before `cutoff` as abandoned.
    ///
    /// Returns the number of rows changed.
    pub async fn abandon_stale_recharges(&self, cutoff: DateTime<Utc>) -> Result<u64, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET status = 'abandoned'
            WHERE payment_type = 'wallet_recharge' AND status = 'pending' AND created_at <= ?
            "#,
        )
        .bind(to_ms(cutoff))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Expire every pending payment tied to a booking.
    pub async fn expire_booking_payments(&self, booking_id: i64) -> Result<u64, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET status = 'expired'
            WHERE related_entity_type = 'booking' AND related_entity_id = ? AND status = 'pending'
            "#,
        )
        .bind(booking_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_refund_intents(&self, booking_id: i64) -> Result<Vec<RefundIntent>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, booking_id, payment_id, amount, status, created_at
            FROM refund_intents WHERE booking_id = ? ORDER BY id ASC
            "#,
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(refund_from_row).collect()
    }

    pub async fn mark_refund_intent(&self, id: i64, status: &str) -> Result<(), CoreError> {
        sqlx::query("UPDATE refund_intents SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
