//! Local academic item.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EventColor, RecurrenceRule, Reminder, TimeWindow};

/// Kind of academic item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentCategory {
    #[default]
    Assignment,
    Exam,
    Quiz,
    Project,
    Lecture,
    Lab,
    Reading,
    Other,
}

impl AssignmentCategory {
    pub const ALL: [AssignmentCategory; 8] = [
        AssignmentCategory::Assignment,
        AssignmentCategory::Exam,
        AssignmentCategory::Quiz,
        AssignmentCategory::Project,
        AssignmentCategory::Lecture,
        AssignmentCategory::Lab,
        AssignmentCategory::Reading,
        AssignmentCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentCategory::Assignment => "assignment",
            AssignmentCategory::Exam => "exam",
            AssignmentCategory::Quiz => "quiz",
            AssignmentCategory::Project => "project",
            AssignmentCategory::Lecture => "lecture",
            AssignmentCategory::Lab => "lab",
            AssignmentCategory::Reading => "reading",
            AssignmentCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Color used when the item has none of its own.
    pub fn default_color(&self) -> EventColor {
        match self {
            AssignmentCategory::Assignment => EventColor::Blue,
            AssignmentCategory::Exam => EventColor::Red,
            AssignmentCategory::Quiz => EventColor::Orange,
            AssignmentCategory::Project => EventColor::Purple,
            AssignmentCategory::Lecture => EventColor::Green,
            AssignmentCategory::Lab => EventColor::Turquoise,
            AssignmentCategory::Reading => EventColor::Yellow,
            AssignmentCategory::Other => EventColor::Gray,
        }
    }
}

/// Sync state of a local item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSyncStatus {
    /// Never synced, or unlinked.
    #[default]
    Local,
    Synced,
    Conflict,
    /// Tombstone kept until the deletion reaches the provider.
    Deleted,
    Error,
}

impl ItemSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemSyncStatus::Local => "local",
            ItemSyncStatus::Synced => "synced",
            ItemSyncStatus::Conflict => "conflict",
            ItemSyncStatus::Deleted => "deleted",
            ItemSyncStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(ItemSyncStatus::Local),
            "synced" => Some(ItemSyncStatus::Synced),
            "conflict" => Some(ItemSyncStatus::Conflict),
            "deleted" => Some(ItemSyncStatus::Deleted),
            "error" => Some(ItemSyncStatus::Error),
            _ => None,
        }
    }
}

/// Assignment, exam or schedule entry owned by the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Course code, e.g. "CS101".
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default)]
    pub category: AssignmentCategory,
    /// Start, or due time for items without a duration.
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub all_day: bool,
    /// IANA timezone the item was entered in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub reminders: Vec<Reminder>,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
    #[serde(default)]
    pub color: Option<EventColor>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub external_event_id: Option<String>,
    #[serde(default)]
    pub sync_status: ItemSyncStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Assignment {
    pub fn new(title: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: None,
            course: None,
            category: AssignmentCategory::default(),
            start_time,
            end_time: None,
            all_day: false,
            timezone: default_timezone(),
            location: None,
            reminders: Vec::new(),
            recurrence: None,
            color: None,
            completed: false,
            external_event_id: None,
            sync_status: ItemSyncStatus::Local,
            created_at: now,
            updated_at: now,
        }
    }

    /// End time, falling back to `default_minutes` after start (or one day for all-day items).
    pub fn effective_end(&self, default_minutes: u32) -> DateTime<Utc> {
        match self.end_time {
            Some(end) if end > self.start_time => end,
            _ if self.all_day => self.start_time + Duration::days(1),
            _ => self.start_time + Duration::minutes(i64::from(default_minutes.max(1))),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.sync_status == ItemSyncStatus::Deleted
    }

    /// Recurring items count while any occurrence can fall in `window`.
    pub fn in_window(&self, window: &TimeWindow, default_minutes: u32) -> bool {
        window.overlaps_series(
            self.start_time,
            self.effective_end(default_minutes),
            self.recurrence.as_ref(),
        )
    }

    pub fn effective_color(&self) -> EventColor {
        self.color.unwrap_or_else(|| self.category.default_color())
    }

    /// Bump `updated_at` to now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
