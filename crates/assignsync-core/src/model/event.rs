//! Provider-neutral calendar event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EventColor, ProviderKind, RecurrenceRule, Reminder};

/// Event status as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Confirmed,
    Tentative,
    Cancelled,
}

impl EventStatus {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "tentative" => EventStatus::Tentative,
            "cancelled" | "canceled" => EventStatus::Cancelled,
            _ => EventStatus::Confirmed,
        }
    }
}

/// A calendar event normalized from Google or Microsoft.
///
/// All-day events use UTC midnight of their date for `start` and the
/// following (exclusive) midnight for `end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCalendarEvent {
    /// Provider event id. Empty until the provider has created the event.
    pub id: String,
    pub provider: ProviderKind,
    pub calendar_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub all_day: bool,
    pub timezone: String,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
    #[serde(default)]
    pub reminders: Vec<Reminder>,
    #[serde(default)]
    pub color: Option<EventColor>,
    #[serde(default)]
    pub status: EventStatus,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub etag: Option<String>,
    /// Local item id stored in the provider's private properties.
    #[serde(default)]
    pub local_id: Option<String>,
}

impl NormalizedCalendarEvent {
    pub fn is_cancelled(&self) -> bool {
        self.status == EventStatus::Cancelled
    }
}
