//! Wall clock with a calendar zone for slot math.
//!
//! Instants are UTC; dates and slot times are interpreted in the platform
//! zone (Asia/Kolkata by default). An unknown zone name degrades to the fixed
//! +05:30 offset.

use crate::domain::SlotTime;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Mutex;
use tracing::warn;

/// IST offset in seconds east of UTC.
pub const IST_OFFSET_SECONDS: i32 = 5 * 3600 + 30 * 60;

/// The zone used to map instants to calendar dates and slot times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarZone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl CalendarZone {
    /// Fixed +05:30, used when the zone database lookup fails.
    pub fn ist_fixed() -> Self {
        match FixedOffset::east_opt(IST_OFFSET_SECONDS) {
            Some(offset) => CalendarZone::Fixed(offset),
            None => CalendarZone::Named(chrono_tz::Asia::Kolkata),
        }
    }

    /// Resolve an IANA zone name, falling back to fixed IST.
    pub fn from_name(name: &str) -> Self {
        match name.parse::<Tz>() {
            Ok(tz) => CalendarZone::Named(tz),
            Err(_) => {
                warn!(zone = %name, "Unknown timezone, falling back to fixed +05:30");
                Self::ist_fixed()
            }
        }
    }

    fn local_naive(&self, at: DateTime<Utc>) -> NaiveDateTime {
        match self {
            CalendarZone::Named(tz) => at.with_timezone(tz).naive_local(),
            CalendarZone::Fixed(offset) => at.with_timezone(offset).naive_local(),
        }
    }

    fn from_local(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            CalendarZone::Named(tz) => tz
                .from_local_datetime(&local)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc)),
            CalendarZone::Fixed(offset) => offset
                .from_local_datetime(&local)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }

    /// Calendar date of `at` in this zone.
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        self.local_naive(at).date()
    }

    /// Wall time of `at` in this zone, truncated to the minute.
    pub fn local_time(&self, at: DateTime<Utc>) -> SlotTime {
        SlotTime::from_naive_time(self.local_naive(at).time())
    }

    /// The instant at which `date` `time` occurs locally.
    pub fn to_utc(&self, date: NaiveDate, time: SlotTime) -> Option<DateTime<Utc>> {
        let local = date.and_hms_opt(0, 0, 0)? + Duration::minutes(i64::from(time.minutes()));
        self.from_local(local)
    }

    /// Advance by whole calendar days at the same local wall time.
    pub fn add_calendar_days(&self, at: DateTime<Utc>, days: i64) -> DateTime<Utc> {
        let local = self.local_naive(at) + Duration::days(days);
        self.from_local(local)
            .unwrap_or_else(|| at + Duration::days(days))
    }
}

impl Default for CalendarZone {
    fn default() -> Self {
        CalendarZone::Named(chrono_tz::Asia::Kolkata)
    }
}

/// Source of "now" for every core.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn zone(&self) -> CalendarZone;

    fn today(&self) -> NaiveDate {
        self.zone().local_date(self.now())
    }
}

/// Real time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    zone: CalendarZone,
}

impl SystemClock {
    pub fn new(zone: CalendarZone) -> Self {
        Self { zone }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn zone(&self) -> CalendarZone {
        self.zone
    }
}

/// Settable clock for deterministic tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    zone: CalendarZone,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
            zone: CalendarZone::default(),
        }
    }

    /// Start at a local wall time in the default zone.
    pub fn at_local(date: NaiveDate, time: SlotTime) -> Self {
        let zone = CalendarZone::default();
        let now = zone
            .to_utc(date, time)
            .unwrap_or_else(Utc::now);
        Self {
            now: Mutex::new(now),
            zone,
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn zone(&self) -> CalendarZone {
        self.zone
    }
}
