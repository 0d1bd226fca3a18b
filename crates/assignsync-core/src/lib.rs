//! # assignsync Core Library
//!
//! This library keeps a local store of academic items (assignments, exams,
//! lectures) in step with an external calendar provider. The CLI binary is a
//! thin layer over the same library.
//!
//! ## Architecture
//!
//! - **Provider adapters**: Google Calendar and Microsoft Graph clients that
//!   normalize vendor events into [`NormalizedCalendarEvent`]
//! - **Mapping**: field conversions (timezones, recurrence, reminders, colors)
//!   and the local-item <-> external-event key registry
//! - **Sync engine**: import, export and bidirectional passes over a time
//!   window with three-way change detection
//! - **Conflict resolution**: field-level divergence detection, classification
//!   and policy-driven or manual resolution
//! - **Storage**: SQLite for items, mappings, conflicts and history; TOML for
//!   configuration
//!
//! ## Key Components
//!
//! - [`CalendarSyncEngine`]: one sync pass over a window
//! - [`ConflictResolutionService`]: conflict detection and resolution
//! - [`AssignmentCalendarSyncService`]: assignment-facing entry point
//! - [`SyncDb`]: persistence
//! - [`Config`]: application configuration management

pub mod detection;
pub mod error;
pub mod mapping;
pub mod model;
pub mod provider;
pub mod storage;
pub mod sync;

pub use detection::{AcceptAll, EventClassifier, KeywordClassifier};
pub use error::{ConfigError, CoreError, DatabaseError, OAuthError, ValidationError};
pub use mapping::{AssignmentEventMapper, CalendarEventMapping, EventMappingService, MappingStatus};
pub use model::{
    Assignment, AssignmentCategory, EventColor, EventStatus, ItemSyncStatus,
    NormalizedCalendarEvent, ProviderKind, RecurrenceRule, Reminder, ReminderMethod, TimeWindow,
};
pub use provider::CalendarProvider;
pub use storage::{Config, SyncDb};
pub use sync::{
    AssignmentCalendarSyncService, CalendarSyncEngine, ConflictPolicy, ConflictResolutionService,
    ConflictSeverity, ConflictType, FieldDiff, ResolutionChoice, ResolutionStatus, RetryConfig,
    SyncConfiguration, SyncConflict, SyncDirection, SyncError, SyncOutcome, SyncReport,
    SyncStatus,
};
