//! Users, services, per-service overrides and admin settings.

use crate::domain::{Money, PriceType, Service, ServiceConfig, User, UserType};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;

use super::{parse_col, parse_opt_col, time_col, to_ms, Repository};

const USER_COLUMNS: &str = "id, name, phone, user_type, is_active, wallet_balance, created_at";

pub(crate) fn user_from_row(row: &SqliteRow) -> Result<User, CoreError> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        user_type: parse_col(row, "user_type")?,
        is_active: row.try_get("is_active")?,
        wallet_balance: parse_col(row, "wallet_balance")?,
        created_at: time_col(row, "created_at")?,
    })
}

fn service_from_row(row: &SqliteRow) -> Result<Service, CoreError> {
    let duration: Option<i64> = row.try_get("duration_minutes")?;
    Ok(Service {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        duration_minutes: duration.and_then(|d| u32::try_from(d).ok()),
        price: parse_opt_col(row, "price")?,
        price_type: parse_col(row, "price_type")?,
        is_active: row.try_get("is_active")?,
    })
}

/// Active workers at this instant: the capacity pool size P.
pub(crate) async fn count_active_workers_in(conn: &mut SqliteConnection) -> Result<u32, CoreError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM users WHERE user_type = 'worker' AND is_active = 1",
    )
    .fetch_one(&mut *conn)
    .await?;
    Ok(u32::try_from(count).unwrap_or(u32::MAX))
}

pub(crate) async fn get_user_in(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<User>, CoreError> {
    let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;
    row.as_ref().map(user_from_row).transpose()
}

impl Repository {
    // =========================================================================
    // Users
    // =========================================================================

    /// Insert a user with an empty wallet.
    ///
    /// # Errors
    /// Returns `Conflict` when the phone number is already registered.
    pub async fn insert_user(
        &self,
        name: &str,
        phone: &str,
        user_type: UserType,
        now: DateTime<Utc>,
    ) -> Result<User, CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (name, phone, user_type, is_active, wallet_balance, created_at)
            VALUES (?, ?, ?, 1, '0', ?)
            "#,
        )
        .bind(name)
        .bind(phone)
        .bind(user_type.as_str())
        .bind(to_ms(now))
        .execute(&self.pool)
        .await?;

        self.get_user(result.last_insert_rowid())
            .await?
            .ok_or_else(|| CoreError::Internal("inserted user vanished".into()))
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<User>, CoreError> {
        let mut conn = self.pool.acquire().await?;
        get_user_in(&mut conn, id).await
    }

    pub async fn set_user_active(&self, id: i64, is_active: bool) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE users SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("user {}", id)));
        }
        Ok(())
    }

    pub async fn count_active_workers(&self) -> Result<u32, CoreError> {
        let mut conn = self.pool.acquire().await?;
        count_active_workers_in(&mut conn).await
    }

    /// Active workers ordered by id.
    pub async fn list_active_workers(&self) -> Result<Vec<User>, CoreError> {
        let sql = format!(
            "SELECT {} FROM users WHERE user_type = 'worker' AND is_active = 1 ORDER BY id ASC",
            USER_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(user_from_row).collect()
    }

    pub async fn wallet_balance(&self, user_id: i64) -> Result<Money, CoreError> {
        self.get_user(user_id)
            .await?
            .map(|u| u.wallet_balance)
            .ok_or_else(|| CoreError::NotFound(format!("user {}", user_id)))
    }

    // =========================================================================
    // Services
    // =========================================================================

    pub async fn insert_service(
        &self,
        name: &str,
        duration_minutes: Option<u32>,
        price: Option<Money>,
        price_type: PriceType,
    ) -> Result<Service, CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO services (name, duration_minutes, price, price_type, is_active)
            VALUES (?, ?, ?, ?, 1)
            "#,
        )
        .bind(name)
        .bind(duration_minutes.map(i64::from))
        .bind(price.map(|p| p.to_canonical_string()))
        .bind(price_type.as_str())
        .execute(&self.pool)
        .await?;

        self.get_service(result.last_insert_rowid())
            .await?
            .ok_or_else(|| CoreError::Internal("inserted service vanished".into()))
    }

    pub async fn get_service(&self, id: i64) -> Result<Option<Service>, CoreError> {
        let row = sqlx::query(
            "SELECT id, name, duration_minutes, price, price_type, is_active FROM services WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(service_from_row).transpose()
    }

    pub async fn set_service_active(&self, id: i64, is_active: bool) -> Result<(), CoreError> {
        sqlx::query("UPDATE services SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_service_config(
        &self,
        service_id: i64,
    ) -> Result<Option<ServiceConfig>, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT service_id, service_duration_minutes, buffer_time_minutes
            FROM service_configs WHERE service_id = ?
            "#,
        )
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<ServiceConfig, CoreError> {
            let duration: Option<i64> = r.try_get("service_duration_minutes")?;
            let buffer: Option<i64> = r.try_get("buffer_time_minutes")?;
            Ok(ServiceConfig {
                service_id: r.try_get("service_id")?,
                service_duration_minutes: duration.and_then(|d| u32::try_from(d).ok()),
                buffer_time_minutes: buffer.and_then(|b| u32::try_from(b).ok()),
            })
        })
        .transpose()
    }

    pub async fn upsert_service_config(&self, config: &ServiceConfig) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO service_configs (service_id, service_duration_minutes, buffer_time_minutes)
            VALUES (?, ?, ?)
            ON CONFLICT(service_id) DO UPDATE SET
                service_duration_minutes = excluded.service_duration_minutes,
                buffer_time_minutes = excluded.buffer_time_minutes
            "#,
        )
        .bind(config.service_id)
        .bind(config.service_duration_minutes.map(i64::from))
        .bind(config.buffer_time_minutes.map(i64::from))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Admin settings
    // =========================================================================

    /// Snapshot of every admin setting.
    pub async fn load_settings(&self) -> Result<HashMap<String, String>, CoreError> {
        let rows = sqlx::query("SELECT key, value FROM admin_settings")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| -> Result<(String, String), CoreError> {
                Ok((r.try_get("key")?, r.try_get("value")?))
            })
            .collect()
    }

    pub async fn upsert_setting(
        &self,
        key: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO admin_settings (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(to_ms(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{seed_user, setup_test_db, t0};
    use super::*;

    #[tokio::test]
    async fn test_duplicate_phone_is_conflict() {
        let (repo, _temp) = setup_test_db().await;
        seed_user(&repo, "+919800000001", UserType::Customer).await;
        let err = repo
            .insert_user("dup", "+919800000001", UserType::Worker, t0())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_pool_counts_only_active_workers() {
        let (repo, _temp) = setup_test_db().await;
        let w1 = seed_user(&repo, "w1", UserType::Worker).await;
        seed_user(&repo, "w2", UserType::Worker).await;
        seed_user(&repo, "c1", UserType::Customer).await;
        assert_eq!(repo.count_active_workers().await.unwrap(), 2);

        repo.set_user_active(w1.id, false).await.unwrap();
        assert_eq!(repo.count_active_workers().await.unwrap(), 1);
        let workers = repo.list_active_workers().await.unwrap();
        assert_eq!(workers.len(), 1);
        assert_ne!(workers[0].id, w1.id);
    }

    #[tokio::test]
    async fn test_service_config_upsert() {
        let (repo, _temp) = setup_test_db().await;
        let service = repo
            .insert_service("Plumbing survey", None, None, PriceType::Inquiry)
            .await
            .unwrap();
        assert!(repo.get_service_config(service.id).await.unwrap().is_none());

        let mut config = ServiceConfig {
            service_id: service.id,
            service_duration_minutes: Some(90),
            buffer_time_minutes: None,
        };
        repo.upsert_service_config(&config).await.unwrap();
        config.buffer_time_minutes = Some(15);
        repo.upsert_service_config(&config).await.unwrap();

        let stored = repo.get_service_config(service.id).await.unwrap().unwrap();
        assert_eq!(stored, config);
    }

    #[tokio::test]
    async fn test_settings_upsert_and_load() {
        let (repo, _temp) = setup_test_db().await;
        repo.upsert_setting("working_hours_start", "08:00", t0())
            .await
            .unwrap();
        repo.upsert_setting("working_hours_start", "10:00", t0())
            .await
            .unwrap();
        let settings = repo.load_settings().await.unwrap();
        assert_eq!(settings.get("working_hours_start").map(String::as_str), Some("10:00"));
    }
}
