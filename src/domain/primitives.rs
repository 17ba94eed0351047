//! Scheduling primitives: wall-clock slot times and calendar dates.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Width of one grid position in minutes.
pub const SLOT_MINUTES: u32 = 30;

/// Minutes in a calendar day. `24:00` is a valid end-of-day marker.
pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Errors produced while parsing user-supplied dates and times.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    Date(String),
    #[error("invalid time '{0}', expected HH:MM")]
    Time(String),
}

/// Wall-clock time of day at minute resolution, in the platform calendar zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotTime(u32);

impl SlotTime {
    /// Midnight.
    pub const MIDNIGHT: SlotTime = SlotTime(0);

    /// Build from hours and minutes. Returns `None` past `24:00`.
    pub fn from_hm(hours: u32, minutes: u32) -> Option<Self> {
        if minutes >= 60 {
            return None;
        }
        Self::from_minutes(hours * 60 + minutes)
    }

    /// Build from minutes since midnight. Returns `None` past `24:00`.
    pub fn from_minutes(minutes: u32) -> Option<Self> {
        (minutes <= MINUTES_PER_DAY).then_some(SlotTime(minutes))
    }

    pub fn minutes(&self) -> u32 {
        self.0
    }

    pub fn hour(&self) -> u32 {
        self.0 / 60
    }

    pub fn minute(&self) -> u32 {
        self.0 % 60
    }

    /// Snap down to the enclosing grid boundary.
    pub fn snap_down(&self) -> Self {
        SlotTime(self.0 - self.0 % SLOT_MINUTES)
    }

    /// Add minutes, failing if the result leaves the day.
    pub fn checked_add(&self, minutes: u32) -> Option<Self> {
        Self::from_minutes(self.0.checked_add(minutes)?)
    }

    /// Subtract minutes, failing before midnight.
    pub fn checked_sub(&self, minutes: u32) -> Option<Self> {
        self.0.checked_sub(minutes).map(SlotTime)
    }

    /// Add minutes, clamping at `24:00`.
    pub fn saturating_add(&self, minutes: u32) -> Self {
        SlotTime(self.0.saturating_add(minutes).min(MINUTES_PER_DAY))
    }

    /// Convert to a `chrono` time. `24:00` maps to the last representable second.
    pub fn to_naive_time(&self) -> chrono::NaiveTime {
        chrono::NaiveTime::from_hms_opt(self.hour(), self.minute(), 0)
            .or_else(|| chrono::NaiveTime::from_hms_opt(23, 59, 59))
            .unwrap_or_default()
    }

    /// Truncate a `chrono` time to minute resolution.
    pub fn from_naive_time(time: chrono::NaiveTime) -> Self {
        use chrono::Timelike;
        SlotTime(time.hour() * 60 + time.minute())
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for SlotTime {
    type Err = ParseError;

    /// Accepts `HH:MM` and `HH:MM:SS`; seconds are discarded.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError::Time(s.to_string());
        let trimmed = s.trim();
        let mut parts = trimmed.split(':');

        let hours = parts.next().ok_or_else(err)?;
        let minutes = parts.next().ok_or_else(err)?;
        if let Some(seconds) = parts.next() {
            let secs: u32 = seconds.parse().map_err(|_| err())?;
            if secs >= 60 {
                return Err(err());
            }
        }
        if parts.next().is_some() || hours.len() != 2 || minutes.len() != 2 {
            return Err(err());
        }

        let h: u32 = hours.parse().map_err(|_| err())?;
        let m: u32 = minutes.parse().map_err(|_| err())?;
        if h > 23 && !(h == 24 && m == 0) {
            return Err(err());
        }
        SlotTime::from_hm(h, m).ok_or_else(err)
    }
}

impl Serialize for SlotTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(s: &str) -> Result<NaiveDate, ParseError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| ParseError::Date(s.to_string()))
}

/// Format a calendar date as `YYYY-MM-DD`.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
