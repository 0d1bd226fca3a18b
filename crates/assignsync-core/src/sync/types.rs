//! Core types for calendar synchronization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DatabaseError, OAuthError, ValidationError};
use crate::model::{
    Assignment, AssignmentCategory, NormalizedCalendarEvent, ProviderKind, Reminder, TimeWindow,
};

/// Which stores a pass may write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Calendar -> local only.
    Import,
    /// Local -> calendar only.
    Export,
    #[default]
    Bidirectional,
}

impl SyncDirection {
    pub fn allows_import(&self) -> bool {
        matches!(self, SyncDirection::Import | SyncDirection::Bidirectional)
    }

    pub fn allows_export(&self) -> bool {
        matches!(self, SyncDirection::Export | SyncDirection::Bidirectional)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Import => "import",
            SyncDirection::Export => "export",
            SyncDirection::Bidirectional => "bidirectional",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "import" => Some(SyncDirection::Import),
            "export" => Some(SyncDirection::Export),
            "bidirectional" | "both" => Some(SyncDirection::Bidirectional),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How conflicts are closed without user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Leave every conflict pending.
    #[default]
    Manual,
    CalendarWins,
    AssignmentWins,
    /// Newer `updated_at` wins; ties go to the calendar.
    NewestWins,
}

impl ConflictPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "manual" => Some(ConflictPolicy::Manual),
            "calendar_wins" => Some(ConflictPolicy::CalendarWins),
            "assignment_wins" => Some(ConflictPolicy::AssignmentWins),
            "newest_wins" => Some(ConflictPolicy::NewestWins),
            _ => None,
        }
    }
}

/// Per-user sync policy, stored in the `[sync]` table of `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfiguration {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    /// Calendar to sync with; "primary" means the account's default calendar.
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,
    #[serde(default)]
    pub direction: SyncDirection,
    /// Categories that take part in sync.
    #[serde(default = "default_categories")]
    pub categories: Vec<AssignmentCategory>,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    #[serde(default = "default_past_days")]
    pub window_past_days: u32,
    #[serde(default = "default_future_days")]
    pub window_future_days: u32,
    #[serde(default = "default_duration_minutes")]
    pub default_duration_minutes: u32,
    #[serde(default = "default_reminders")]
    pub default_reminders: Vec<Reminder>,
    /// Export completed items too.
    #[serde(default)]
    pub sync_completed: bool,
    /// Only import calendar events the classifier recognizes as academic items.
    #[serde(default = "default_true")]
    pub import_requires_detection: bool,
    #[serde(default = "default_stale_lock_minutes")]
    pub stale_lock_minutes: u32,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_provider() -> ProviderKind {
    ProviderKind::Google
}
fn default_calendar_id() -> String {
    "primary".into()
}
fn default_categories() -> Vec<AssignmentCategory> {
    vec![
        AssignmentCategory::Assignment,
        AssignmentCategory::Exam,
        AssignmentCategory::Quiz,
        AssignmentCategory::Project,
    ]
}
fn default_past_days() -> u32 {
    14
}
fn default_future_days() -> u32 {
    120
}
fn default_duration_minutes() -> u32 {
    60
}
fn default_reminders() -> Vec<Reminder> {
    vec![Reminder::popup(24 * 60), Reminder::popup(60)]
}
fn default_true() -> bool {
    true
}
fn default_stale_lock_minutes() -> u32 {
    15
}
fn default_retry_attempts() -> u32 {
    3
}

impl Default for SyncConfiguration {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            calendar_id: default_calendar_id(),
            direction: SyncDirection::default(),
            categories: default_categories(),
            conflict_policy: ConflictPolicy::default(),
            window_past_days: default_past_days(),
            window_future_days: default_future_days(),
            default_duration_minutes: default_duration_minutes(),
            default_reminders: default_reminders(),
            sync_completed: false,
            import_requires_detection: true,
            stale_lock_minutes: default_stale_lock_minutes(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

impl SyncConfiguration {
    /// Whether an item takes part in sync at all.
    pub fn includes(&self, item: &Assignment) -> bool {
        self.categories.contains(&item.category) && (self.sync_completed || !item.completed)
    }

    pub fn window_at(&self, now: DateTime<Utc>) -> Result<TimeWindow, ValidationError> {
        TimeWindow::around(now, self.window_past_days, self.window_future_days)
    }
}

/// Kind of divergence between a local item and its external event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    TimeMismatch,
    ContentMismatch,
    DeletionConflict,
    CreationConflict,
    DuplicateMapping,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::TimeMismatch => "time_mismatch",
            ConflictType::ContentMismatch => "content_mismatch",
            ConflictType::DeletionConflict => "deletion_conflict",
            ConflictType::CreationConflict => "creation_conflict",
            ConflictType::DuplicateMapping => "duplicate_mapping",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "time_mismatch" => Some(ConflictType::TimeMismatch),
            "content_mismatch" => Some(ConflictType::ContentMismatch),
            "deletion_conflict" => Some(ConflictType::DeletionConflict),
            "creation_conflict" => Some(ConflictType::CreationConflict),
            "duplicate_mapping" => Some(ConflictType::DuplicateMapping),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

impl ConflictSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictSeverity::Low => "low",
            ConflictSeverity::Medium => "medium",
            ConflictSeverity::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(ConflictSeverity::Low),
            "medium" => Some(ConflictSeverity::Medium),
            "high" => Some(ConflictSeverity::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Pending,
    Resolved,
    Ignored,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Pending => "pending",
            ResolutionStatus::Resolved => "resolved",
            ResolutionStatus::Ignored => "ignored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ResolutionStatus::Pending),
            "resolved" => Some(ResolutionStatus::Resolved),
            "ignored" => Some(ResolutionStatus::Ignored),
            _ => None,
        }
    }
}

/// Which side a resolution keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionChoice {
    UseLocal,
    UseRemote,
    Merge,
}

impl ResolutionChoice {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "local" | "use_local" | "assignment" => Some(ResolutionChoice::UseLocal),
            "remote" | "use_remote" | "calendar" => Some(ResolutionChoice::UseRemote),
            "merge" => Some(ResolutionChoice::Merge),
            _ => None,
        }
    }
}

/// One diverging field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    pub local: serde_json::Value,
    pub remote: serde_json::Value,
}

/// A detected divergence between a local item and its external event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub id: String,
    pub local_id: Option<String>,
    pub external_id: Option<String>,
    pub provider: ProviderKind,
    pub conflict_type: ConflictType,
    pub severity: ConflictSeverity,
    #[serde(default)]
    pub fields: Vec<FieldDiff>,
    pub local_snapshot: Option<Assignment>,
    pub remote_snapshot: Option<NormalizedCalendarEvent>,
    pub status: ResolutionStatus,
    pub resolution: Option<ResolutionChoice>,
    #[serde(default)]
    pub auto_resolved: bool,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SyncConflict {
    pub fn new(
        provider: ProviderKind,
        conflict_type: ConflictType,
        severity: ConflictSeverity,
        local: Option<Assignment>,
        remote: Option<NormalizedCalendarEvent>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            local_id: local.as_ref().map(|a| a.id.clone()),
            external_id: remote.as_ref().map(|e| e.id.clone()),
            provider,
            conflict_type,
            severity,
            fields: Vec::new(),
            local_snapshot: local,
            remote_snapshot: remote,
            status: ResolutionStatus::Pending,
            resolution: None,
            auto_resolved: false,
            detected_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn with_fields(mut self, fields: Vec<FieldDiff>) -> Self {
        self.fields = fields;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == ResolutionStatus::Pending
    }
}

/// Overall result of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    #[default]
    Success,
    /// Some items failed; the rest were applied.
    Partial,
    Failed,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Success => "success",
            SyncOutcome::Partial => "partial",
            SyncOutcome::Failed => "failed",
        }
    }
}

/// A per-item failure inside a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItemError {
    pub local_id: Option<String>,
    pub external_id: Option<String>,
    pub message: String,
}

/// Counters and errors for one pass; persisted as a history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub id: String,
    pub provider: ProviderKind,
    pub direction: SyncDirection,
    pub window: TimeWindow,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: SyncOutcome,
    pub created_local: usize,
    pub updated_local: usize,
    pub deleted_local: usize,
    pub created_remote: usize,
    pub updated_remote: usize,
    pub deleted_remote: usize,
    pub relinked: usize,
    pub unchanged: usize,
    pub conflicts_detected: usize,
    pub conflicts_auto_resolved: usize,
    #[serde(default)]
    pub errors: Vec<SyncItemError>,
}

impl SyncReport {
    pub fn new(provider: ProviderKind, direction: SyncDirection, window: TimeWindow) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            provider,
            direction,
            window,
            started_at: now,
            finished_at: now,
            outcome: SyncOutcome::Success,
            created_local: 0,
            updated_local: 0,
            deleted_local: 0,
            created_remote: 0,
            updated_remote: 0,
            deleted_remote: 0,
            relinked: 0,
            unchanged: 0,
            conflicts_detected: 0,
            conflicts_auto_resolved: 0,
            errors: Vec::new(),
        }
    }

    /// Number of writes performed on either side.
    pub fn writes(&self) -> usize {
        self.created_local
            + self.updated_local
            + self.deleted_local
            + self.created_remote
            + self.updated_remote
            + self.deleted_remote
            + self.relinked
    }

    pub fn record_error(
        &mut self,
        local_id: Option<&str>,
        external_id: Option<&str>,
        err: &SyncError,
    ) {
        self.errors.push(SyncItemError {
            local_id: local_id.map(str::to_string),
            external_id: external_id.map(str::to_string),
            message: err.to_string(),
        });
    }
}

/// Current sync status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Last finished pass timestamp.
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<SyncOutcome>,
    /// Whether a pass currently holds the sync lock.
    pub in_progress: bool,
    pub pending_conflicts: usize,
    pub mapped_items: usize,
}

/// Sync error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Calendar API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Calendar not found: {0}")]
    CalendarNotFound(String),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Authentication required for {0}")]
    AuthenticationRequired(ProviderKind),

    #[error("Token expired")]
    TokenExpired,

    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid event data: {0}")]
    InvalidEvent(String),

    #[error("Duplicate mapping: {0}")]
    DuplicateMapping(String),

    #[error("A sync pass is already running (started {0})")]
    AlreadyRunning(DateTime<Utc>),

    #[error("Assignment not found: {0}")]
    AssignmentNotFound(String),

    #[error("Conflict not found: {0}")]
    ConflictNotFound(String),

    #[error("Conflict {0} is already closed")]
    ConflictClosed(String),

    #[error("Resolution {choice:?} does not apply to {conflict_type:?}")]
    UnsupportedResolution {
        conflict_type: ConflictType,
        choice: ResolutionChoice,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("OAuth error: {0}")]
    OAuth(#[from] OAuthError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl SyncError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::RateLimited(_) | SyncError::Unavailable(_) => true,
            SyncError::Network(e) => e.is_timeout() || e.is_connect(),
            SyncError::Api { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            SyncError::Database(DatabaseError::Locked) => true,
            _ => false,
        }
    }

    /// Whether this error should trigger a token refresh.
    pub fn should_refresh_token(&self) -> bool {
        matches!(self, SyncError::TokenExpired | SyncError::Api { status: 401, .. })
    }
}
