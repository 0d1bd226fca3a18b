//! In-process calendar.
//!
//! Deterministic ids (`mem-1`, `mem-2`, ...), strictly increasing
//! `updated_at` and an etag per revision. Deleted events stay behind as
//! cancelled entries, like Google's `showDeleted`. Failures can be injected
//! for tests. With a path it persists to a JSON file after every write.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::CalendarProvider;
use crate::error::CoreError;
use crate::model::{EventStatus, NormalizedCalendarEvent, ProviderKind, TimeWindow};
use crate::sync::SyncError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    events: BTreeMap<String, NormalizedCalendarEvent>,
    next_id: u64,
    revision: u64,
    last_stamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct State {
    data: Snapshot,
    fail_next: u32,
    fail_listing: bool,
    rejected_local_ids: HashSet<String>,
    writes: usize,
}

impl State {
    /// Next `updated_at`, strictly after the previous one.
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.data.last_stamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.data.last_stamp = Some(stamp);
        stamp
    }

    fn revise(&mut self, event: &mut NormalizedCalendarEvent) {
        self.data.revision += 1;
        event.updated_at = self.stamp();
        event.etag = Some(format!("\"{}\"", self.data.revision));
    }

    fn take_failure(&mut self) -> Result<(), SyncError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(SyncError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryProvider {
    state: Mutex<State>,
    path: Option<PathBuf>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider backed by `path`; loads it when present.
    pub fn persistent(path: PathBuf) -> Result<Self, CoreError> {
        let data = match std::fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            state: Mutex::new(State {
                data,
                ..State::default()
            }),
            path: Some(path),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, SyncError> {
        self.state
            .lock()
            .map_err(|_| SyncError::Unavailable("memory calendar poisoned".into()))
    }

    fn persist(&self, state: &State) -> Result<(), SyncError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&state.data)?;
        write_file(path, &json).map_err(|e| SyncError::Unavailable(e.to_string()))
    }

    /// Make the next `n` calls fail with a retryable error.
    pub fn fail_next_calls(&self, n: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next = n;
        }
    }

    /// Make `list_events` fail until turned off.
    pub fn fail_listing(&self, on: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_listing = on;
        }
    }

    /// Reject writes for events tagged with `local_id` (HTTP 400).
    pub fn reject_local_id(&self, local_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.rejected_local_ids.insert(local_id.to_string());
        }
    }

    /// Add an event as if created in the calendar UI.
    pub fn insert_event(&self, mut event: NormalizedCalendarEvent) -> NormalizedCalendarEvent {
        let Ok(mut state) = self.state.lock() else {
            return event;
        };
        if event.id.is_empty() {
            state.data.next_id += 1;
            event.id = format!("mem-{}", state.data.next_id);
        }
        event.provider = ProviderKind::Memory;
        state.revise(&mut event);
        state.data.events.insert(event.id.clone(), event.clone());
        event
    }

    /// Edit an event in place as a calendar user would.
    pub fn modify_event(
        &self,
        id: &str,
        edit: impl FnOnce(&mut NormalizedCalendarEvent),
    ) -> Option<NormalizedCalendarEvent> {
        let mut state = self.state.lock().ok()?;
        let mut event = state.data.events.get(id)?.clone();
        edit(&mut event);
        state.revise(&mut event);
        state.data.events.insert(id.to_string(), event.clone());
        Some(event)
    }

    /// Drop an event without leaving a cancelled entry.
    pub fn remove_event_hard(&self, id: &str) -> bool {
        self.state
            .lock()
            .map(|mut s| s.data.events.remove(id).is_some())
            .unwrap_or(false)
    }

    pub fn event(&self, id: &str) -> Option<NormalizedCalendarEvent> {
        self.state.lock().ok()?.data.events.get(id).cloned()
    }

    pub fn events(&self) -> Vec<NormalizedCalendarEvent> {
        self.state
            .lock()
            .map(|s| s.data.events.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Events that are not cancelled.
    pub fn live_events(&self) -> Vec<NormalizedCalendarEvent> {
        self.events()
            .into_iter()
            .filter(|e| !e.is_cancelled())
            .collect()
    }

    /// Create/update/delete calls served so far.
    pub fn writes(&self) -> usize {
        self.state.lock().map(|s| s.writes).unwrap_or(0)
    }

    fn check_write(state: &mut State, event: &NormalizedCalendarEvent) -> Result<(), SyncError> {
        state.take_failure()?;
        if let Some(local_id) = &event.local_id {
            if state.rejected_local_ids.contains(local_id) {
                return Err(SyncError::Api {
                    status: 400,
                    message: format!("event for {local_id} rejected"),
                });
            }
        }
        Ok(())
    }
}

fn write_file(path: &Path, json: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, json)
}

fn overlaps(event: &NormalizedCalendarEvent, window: &TimeWindow) -> bool {
    if let Some(rule) = &event.recurrence {
        return window.overlaps_series(event.start, event.end, Some(rule));
    }
    // Zero-length events still count when they start inside the window.
    window.overlaps(event.start, event.end.max(event.start + Duration::seconds(1)))
}

#[async_trait]
impl CalendarProvider for MemoryProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Memory
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        window: &TimeWindow,
    ) -> Result<Vec<NormalizedCalendarEvent>, SyncError> {
        let mut state = self.lock()?;
        if state.fail_listing {
            return Err(SyncError::Api {
                status: 403,
                message: "listing disabled".into(),
            });
        }
        state.take_failure()?;
        Ok(state
            .data
            .events
            .values()
            .filter(|e| e.calendar_id == calendar_id && overlaps(e, window))
            .cloned()
            .collect())
    }

    async fn get_event(
        &self,
        _calendar_id: &str,
        id: &str,
    ) -> Result<Option<NormalizedCalendarEvent>, SyncError> {
        let mut state = self.lock()?;
        state.take_failure()?;
        Ok(state.data.events.get(id).cloned())
    }

    async fn create_event(
        &self,
        calendar_id: &str,
        event: &NormalizedCalendarEvent,
    ) -> Result<NormalizedCalendarEvent, SyncError> {
        let mut state = self.lock()?;
        Self::check_write(&mut state, event)?;

        state.data.next_id += 1;
        let mut created = event.clone();
        created.id = format!("mem-{}", state.data.next_id);
        created.provider = ProviderKind::Memory;
        created.calendar_id = calendar_id.to_string();
        created.status = EventStatus::Confirmed;
        state.revise(&mut created);
        state.data.events.insert(created.id.clone(), created.clone());
        state.writes += 1;
        self.persist(&state)?;
        tracing::debug!(event_id = %created.id, "created memory event");
        Ok(created)
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event: &NormalizedCalendarEvent,
    ) -> Result<NormalizedCalendarEvent, SyncError> {
        let mut state = self.lock()?;
        Self::check_write(&mut state, event)?;

        let live = state
            .data
            .events
            .get(&event.id)
            .is_some_and(|e| !e.is_cancelled());
        if !live {
            return Err(SyncError::EventNotFound(event.id.clone()));
        }
        let mut updated = event.clone();
        updated.provider = ProviderKind::Memory;
        updated.calendar_id = calendar_id.to_string();
        updated.status = EventStatus::Confirmed;
        state.revise(&mut updated);
        state.data.events.insert(updated.id.clone(), updated.clone());
        state.writes += 1;
        self.persist(&state)?;
        tracing::debug!(event_id = %updated.id, "updated memory event");
        Ok(updated)
    }

    async fn delete_event(&self, _calendar_id: &str, id: &str) -> Result<(), SyncError> {
        let mut state = self.lock()?;
        state.take_failure()?;

        let Some(mut event) = state.data.events.get(id).cloned() else {
            return Ok(());
        };
        if event.is_cancelled() {
            return Ok(());
        }
        event.status = EventStatus::Cancelled;
        state.revise(&mut event);
        state.data.events.insert(id.to_string(), event);
        state.writes += 1;
        self.persist(&state)?;
        tracing::debug!(event_id = id, "deleted memory event");
        Ok(())
    }
}
