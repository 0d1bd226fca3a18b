//! Domain types shared by every layer.
//!
//! - [`Assignment`]: a local academic item
//! - [`NormalizedCalendarEvent`]: a provider event in provider-neutral shape
//! - [`TimeWindow`]: the range a sync pass covers

mod assignment;
mod event;

pub use assignment::{Assignment, AssignmentCategory, ItemSyncStatus};
pub use event::{EventStatus, NormalizedCalendarEvent};

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// External calendar backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Google,
    Microsoft,
    /// In-process provider used for tests and offline runs.
    Memory,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Google => "google",
            ProviderKind::Microsoft => "microsoft",
            ProviderKind::Memory => "memory",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Some(ProviderKind::Google),
            "microsoft" | "outlook" => Some(ProviderKind::Microsoft),
            "memory" => Some(ProviderKind::Memory),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a reminder is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderMethod {
    Popup,
    Email,
}

/// A reminder relative to the event start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reminder {
    pub method: ReminderMethod,
    pub minutes_before: u32,
}

impl Reminder {
    pub fn popup(minutes_before: u32) -> Self {
        Self {
            method: ReminderMethod::Popup,
            minutes_before,
        }
    }

    pub fn email(minutes_before: u32) -> Self {
        Self {
            method: ReminderMethod::Email,
            minutes_before,
        }
    }
}

/// Provider-neutral event color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventColor {
    Blue,
    Green,
    Purple,
    Red,
    Yellow,
    Orange,
    Turquoise,
    Gray,
}

/// Recurrence frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// Simple recurrence rule covering what both providers can express.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default)]
    pub by_day: Vec<Weekday>,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub until: Option<NaiveDate>,
}

fn default_interval() -> u32 {
    1
}

impl RecurrenceRule {
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            interval: 1,
            by_day: Vec::new(),
            count: None,
            until: None,
        }
    }

    /// `by_day` sorted Monday-first with duplicates removed.
    pub fn normalized(&self) -> Self {
        let mut by_day = self.by_day.clone();
        by_day.sort_by_key(|d| d.num_days_from_monday());
        by_day.dedup();
        Self {
            by_day,
            interval: self.interval.max(1),
            ..self.clone()
        }
    }

    /// Upper bound on when the last occurrence of a series starting at
    /// `first_start` ends. `None` for a series without `count` or `until`.
    pub fn series_end(
        &self,
        first_start: DateTime<Utc>,
        first_end: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let length = (first_end - first_start).max(Duration::zero());
        let by_until = self.until.and_then(|date| {
            let midnight = Utc.from_utc_datetime(&date.and_time(NaiveTime::default()));
            midnight
                .checked_add_signed(Duration::days(1))?
                .checked_add_signed(length)
        });
        let by_count = self.count.and_then(|count| {
            let per_period = match self.frequency {
                Frequency::Weekly => self.by_day.len().max(1) as u32,
                _ => 1,
            };
            let steps = count
                .div_ceil(per_period)
                .checked_mul(self.interval.max(1))?;
            let last_start = match self.frequency {
                Frequency::Daily => {
                    first_start.checked_add_signed(Duration::try_days(i64::from(steps))?)
                }
                Frequency::Weekly => {
                    first_start.checked_add_signed(Duration::try_weeks(i64::from(steps))?)
                }
                Frequency::Monthly => first_start.checked_add_months(Months::new(steps)),
                Frequency::Yearly => {
                    first_start.checked_add_months(Months::new(steps.checked_mul(12)?))
                }
            }?;
            last_start.checked_add_signed(length)
        });
        match (by_until, by_count) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ValidationError> {
        if end <= start {
            return Err(ValidationError::InvalidTimeRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Window reaching `past_days` back and `future_days` ahead of `now`.
    /// Fails when either edge falls outside the representable date range.
    pub fn around(
        now: DateTime<Utc>,
        past_days: u32,
        future_days: u32,
    ) -> Result<Self, ValidationError> {
        let out_of_range = |field: &str, days: u32| ValidationError::InvalidValue {
            field: field.to_string(),
            message: format!("{days} days is out of range"),
        };
        let start = Duration::try_days(i64::from(past_days))
            .and_then(|d| now.checked_sub_signed(d))
            .ok_or_else(|| out_of_range("window_past_days", past_days))?;
        let end = Duration::try_days(i64::from(future_days.max(1)))
            .and_then(|d| now.checked_add_signed(d))
            .ok_or_else(|| out_of_range("window_future_days", future_days))?;
        Ok(Self { start, end })
    }

    /// Whether `[start, end)` overlaps this window.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && end > self.start
    }

    /// Like [`overlaps`](Self::overlaps) for the first occurrence `[start,
    /// end)`, but a recurring series counts while any later occurrence can
    /// still fall inside the window.
    pub fn overlaps_series(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        rule: Option<&RecurrenceRule>,
    ) -> bool {
        match rule {
            None => self.overlaps(start, end),
            Some(rule) => {
                start < self.end
                    && rule
                        .series_end(start, end)
                        .map_or(true, |last_end| last_end > self.start)
            }
        }
    }
}
