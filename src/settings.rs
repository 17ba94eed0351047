//! Read-only admin settings with typed accessors and defaults.
//!
//! Settings live as string key/value pairs. `StoreSettings` reads them from
//! the `admin_settings` table through a TTL cache; `StaticSettings` is an
//! in-memory map for tests and embedded use.

use crate::db::Repository;
use crate::domain::{Money, SlotTime};
use crate::engine::WorkingHours;
use crate::error::CoreError;
use async_trait::async_trait;
use chrono::Duration;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, warn};

/// Setting keys read by the core.
pub mod keys {
    pub const WORKING_HOURS_START: &str = "working_hours_start";
    pub const WORKING_HOURS_END: &str = "working_hours_end";
    pub const BOOKING_BUFFER_TIME_MINUTES: &str = "booking_buffer_time_minutes";
    pub const BOOKING_HOLD_MINUTES: &str = "booking_hold_minutes";
    pub const WALLET_PAYMENT_TIMEOUT_MINUTES: &str = "wallet_payment_timeout_minutes";
    pub const MAX_WALLET_BALANCE: &str = "max_wallet_balance";
    pub const MIN_RECHARGE_AMOUNT: &str = "min_recharge_amount";
    pub const MAX_RECHARGE_AMOUNT: &str = "max_recharge_amount";
    pub const QUOTE_DEFAULT_EXPIRY_DAYS: &str = "quote_default_expiry_days";
}

/// Cached settings expire after this long.
pub const SETTINGS_CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(24 * 3600);

/// A read-only key/value source.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError>;
}

/// In-memory settings.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    values: HashMap<String, String>,
}

impl StaticSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }
}

#[async_trait]
impl ConfigSource for StaticSettings {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        Ok(self.values.get(key).cloned())
    }
}

struct CachedSettings {
    values: HashMap<String, String>,
    loaded_at: Instant,
}

/// Settings backed by the `admin_settings` table.
pub struct StoreSettings {
    repo: Arc<Repository>,
    ttl: std::time::Duration,
    cache: RwLock<Option<CachedSettings>>,
}

impl StoreSettings {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self::with_ttl(repo, SETTINGS_CACHE_TTL)
    }

    pub fn with_ttl(repo: Arc<Repository>, ttl: std::time::Duration) -> Self {
        Self {
            repo,
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// Drop the cached snapshot; the next read reloads from the store.
    pub fn invalidate(&self) {
        let mut guard = self.cache.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    fn cached(&self, key: &str) -> Option<Option<String>> {
        let guard = self.cache.read().unwrap_or_else(|e| e.into_inner());
        let cached = guard.as_ref()?;
        if cached.loaded_at.elapsed() > self.ttl {
            return None;
        }
        Some(cached.values.get(key).cloned())
    }
}

#[async_trait]
impl ConfigSource for StoreSettings {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        if let Some(hit) = self.cached(key) {
            return Ok(hit);
        }

        // Load outside the lock, then publish.
        let values = self.repo.load_settings().await?;
        let value = values.get(key).cloned();
        debug!(count = values.len(), "Reloaded admin settings");

        let mut guard = self.cache.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(CachedSettings {
            values,
            loaded_at: Instant::now(),
        });
        Ok(value)
    }
}

/// Typed view over a [`ConfigSource`].
#[derive(Clone)]
pub struct Settings {
    source: Arc<dyn ConfigSource>,
}

impl Settings {
    pub const DEFAULT_OPEN: &'static str = "09:00";
    pub const DEFAULT_CLOSE: &'static str = "22:00";
    pub const DEFAULT_BUFFER_MINUTES: u32 = 30;
    pub const DEFAULT_HOLD_MINUTES: i64 = 15;
    pub const DEFAULT_WALLET_PAYMENT_TIMEOUT_MINUTES: i64 = 30;
    pub const DEFAULT_MAX_WALLET_BALANCE: i64 = 50_000;
    pub const DEFAULT_MIN_RECHARGE: i64 = 100;
    pub const DEFAULT_MAX_RECHARGE: i64 = 10_000;
    pub const DEFAULT_QUOTE_EXPIRY_DAYS: i64 = 7;

    pub fn new(source: Arc<dyn ConfigSource>) -> Self {
        Self { source }
    }

    async fn parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, CoreError> {
        let Some(raw) = self.source.get(key).await? else {
            return Ok(None);
        };
        match raw.trim().parse::<T>() {
            Ok(v) => Ok(Some(v)),
            Err(_) => {
                warn!(key, value = %raw, "Ignoring unparseable setting, using default");
                Ok(None)
            }
        }
    }

    async fn money(&self, key: &str, default: i64) -> Result<Money, CoreError> {
        let value = self
            .parsed::<f64>(key)
            .await?
            .and_then(Money::from_f64)
            .unwrap_or_else(|| Money::from_rupees(default));
        Ok(value)
    }

    /// `[open, close)` of the bookable day.
    pub async fn working_hours(&self) -> Result<WorkingHours, CoreError> {
        let default_open = SlotTime::from_hm(9, 0).unwrap_or(SlotTime::MIDNIGHT);
        let default_close = SlotTime::from_hm(22, 0).unwrap_or(SlotTime::MIDNIGHT);

        let open = self
            .parsed::<SlotTime>(keys::WORKING_HOURS_START)
            .await?
            .unwrap_or(default_open);
        let close = self
            .parsed::<SlotTime>(keys::WORKING_HOURS_END)
            .await?
            .unwrap_or(default_close);

        if close <= open {
            warn!(%open, %close, "Working hours end before they start, using defaults");
            return Ok(WorkingHours {
                start: default_open,
                end: default_close,
            });
        }
        Ok(WorkingHours {
            start: open,
            end: close,
        })
    }

    pub async fn buffer_minutes(&self) -> Result<u32, CoreError> {
        Ok(self
            .parsed(keys::BOOKING_BUFFER_TIME_MINUTES)
            .await?
            .unwrap_or(Self::DEFAULT_BUFFER_MINUTES))
    }

    /// How long a pending booking holds its capacity unit.
    pub async fn hold_ttl(&self) -> Result<Duration, CoreError> {
        let minutes = self
            .parsed::<i64>(keys::BOOKING_HOLD_MINUTES)
            .await?
            .filter(|m| *m > 0)
            .unwrap_or(Self::DEFAULT_HOLD_MINUTES);
        Ok(Duration::minutes(minutes))
    }

    /// After this long a pending wallet recharge is abandoned.
    pub async fn wallet_payment_timeout(&self) -> Result<Duration, CoreError> {
        let minutes = self
            .parsed::<i64>(keys::WALLET_PAYMENT_TIMEOUT_MINUTES)
            .await?
            .filter(|m| *m > 0)
            .unwrap_or(Self::DEFAULT_WALLET_PAYMENT_TIMEOUT_MINUTES);
        Ok(Duration::minutes(minutes))
    }

    pub async fn max_wallet_balance(&self) -> Result<Money, CoreError> {
        self.money(keys::MAX_WALLET_BALANCE, Self::DEFAULT_MAX_WALLET_BALANCE)
            .await
    }

    pub async fn min_recharge_amount(&self) -> Result<Money, CoreError> {
        self.money(keys::MIN_RECHARGE_AMOUNT, Self::DEFAULT_MIN_RECHARGE)
            .await
    }

    pub async fn max_recharge_amount(&self) -> Result<Money, CoreError> {
        self.money(keys::MAX_RECHARGE_AMOUNT, Self::DEFAULT_MAX_RECHARGE)
            .await
    }

    pub async fn quote_default_expiry_days(&self) -> Result<i64, CoreError> {
        Ok(self
            .parsed::<i64>(keys::QUOTE_DEFAULT_EXPIRY_DAYS)
            .await?
            .filter(|d| *d > 0)
            .unwrap_or(Self::DEFAULT_QUOTE_EXPIRY_DAYS))
    }
}
