//! Bidirectional synchronization between local assignments and a calendar.
//!
//! - [`CalendarSyncEngine`] runs windowed import/export/bidirectional passes
//! - [`ConflictResolutionService`] classifies and resolves divergences
//! - [`AssignmentCalendarSyncService`] pushes single saves and deletes
//! - [`retry`] wraps provider calls in exponential backoff

mod assignment_sync;
mod conflict;
mod engine;
pub mod retry;
mod types;
pub(crate) mod writer;

pub use assignment_sync::AssignmentCalendarSyncService;
pub use conflict::ConflictResolutionService;
pub use engine::CalendarSyncEngine;
pub use retry::{with_retry, RetryConfig};
pub use types::{
    ConflictPolicy, ConflictSeverity, ConflictType, FieldDiff, ResolutionChoice,
    ResolutionStatus, SyncConfiguration, SyncConflict, SyncDirection, SyncError, SyncItemError,
    SyncOutcome, SyncReport, SyncStatus,
};
