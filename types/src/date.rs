//! Calendar days and time ranges.
//!
//! A [`StepDate`] is a local calendar day. It owns the two textual forms the
//! persistence layer relies on: the compact `YYYYMMDD` form and the
//! `steps_YYYYMMDD` storage key.

use std::fmt;

use chrono::{DateTime, Days, Local, NaiveDate, NaiveTime, TimeZone};
use serde::{Serialize, Serializer};
use thiserror::Error;

const COMPACT_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid compact date {0:?} (expected YYYYMMDD)")]
pub struct StepDateParseError(String);

/// A calendar day in the local time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepDate(NaiveDate);

impl StepDate {
    /// Prefix of every per-day storage key.
    pub const KEY_PREFIX: &'static str = "steps_";

    #[must_use]
    pub const fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    #[must_use]
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    #[must_use]
    pub const fn date(self) -> NaiveDate {
        self.0
    }

    /// `YYYYMMDD`.
    #[must_use]
    pub fn compact(self) -> String {
        self.0.format(COMPACT_FORMAT).to_string()
    }

    pub fn parse_compact(raw: &str) -> Result<Self, StepDateParseError> {
        let trimmed = raw.trim();
        if trimmed.len() != 8 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StepDateParseError(raw.to_string()));
        }
        NaiveDate::parse_from_str(trimmed, COMPACT_FORMAT)
            .map(Self)
            .map_err(|_| StepDateParseError(raw.to_string()))
    }

    /// `steps_YYYYMMDD`.
    #[must_use]
    pub fn storage_key(self) -> String {
        format!("{}{}", Self::KEY_PREFIX, self.compact())
    }

    /// The day `days` before this one. Saturates at the earliest representable date.
    #[must_use]
    pub fn days_back(self, days: u32) -> Self {
        Self(
            self.0
                .checked_sub_days(Days::new(u64::from(days)))
                .unwrap_or(NaiveDate::MIN),
        )
    }

    /// This day followed by the `len - 1` days before it, most recent first.
    pub fn window(self, len: usize) -> impl Iterator<Item = StepDate> {
        (0..len as u32).map(move |offset| self.days_back(offset))
    }
}

impl From<NaiveDate> for StepDate {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl fmt::Display for StepDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl Serialize for StepDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A half-open instant range `[start, end)` in local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    start: DateTime<Local>,
    end: DateTime<Local>,
}

impl TimeRange {
    /// Returns `None` when `end` precedes `start`.
    #[must_use]
    pub fn new(start: DateTime<Local>, end: DateTime<Local>) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Local midnight of `now`'s day up to `now`.
    ///
    /// When midnight does not exist locally (DST gap) the range starts at `now`.
    #[must_use]
    pub fn today_until(now: DateTime<Local>) -> Self {
        let midnight = now.date_naive().and_time(NaiveTime::MIN);
        let start = Local
            .from_local_datetime(&midnight)
            .earliest()
            .filter(|start| *start <= now)
            .unwrap_or(now);
        Self { start, end: now }
    }

    #[must_use]
    pub const fn start(&self) -> DateTime<Local> {
        self.start
    }

    #[must_use]
    pub const fn end(&self) -> DateTime<Local> {
        self.end
    }

    #[must_use]
    pub fn day(&self) -> StepDate {
        StepDate(self.start.date_naive())
    }
}
