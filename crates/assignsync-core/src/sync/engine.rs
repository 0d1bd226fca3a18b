//! One sync pass over a time window.
//!
//! A pass lists the calendar once, then walks the mapping registry with
//! three-way change detection (current local version, current remote
//! version, and the versions recorded at the last sync). Unmapped items and
//! events are paired, relinked, exported or imported afterwards. Every write
//! is paired with its registry update, so an interrupted pass is repaired by
//! the next one.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::detection::{EventClassifier, KeywordClassifier};
use crate::mapping::{normalize_text, AssignmentEventMapper, CalendarEventMapping, MappingStatus};
use crate::model::{
    Assignment, AssignmentCategory, ItemSyncStatus, NormalizedCalendarEvent, TimeWindow,
};
use crate::provider::CalendarProvider;
use crate::storage::{format_ts, SyncDb};

use super::conflict::ConflictResolutionService;
use super::retry::{with_retry, RetryConfig};
use super::writer::SyncWriter;
use super::{
    ConflictPolicy, ConflictSeverity, ConflictType, SyncConfiguration, SyncConflict,
    SyncDirection, SyncError, SyncOutcome, SyncReport, SyncStatus,
};

const LOCK_KEY: &str = "sync_lock";
const LAST_SYNC_KEY: &str = "last_sync_at";

/// Max start-time distance for an unmapped item and event to count as the
/// same thing created twice.
const PAIRING_TOLERANCE_SECS: i64 = 60;

fn parse_kv_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Start time of the pass holding the lock. Lock values are
/// `"<rfc3339> <pass id>"`.
fn lock_started(raw: &str) -> Option<DateTime<Utc>> {
    let ts = raw.split_once(' ').map_or(raw, |(ts, _)| ts);
    parse_kv_ts(ts)
}

/// Held for the duration of a pass. On drop the kv lock row is removed,
/// unless another pass has taken it over since.
struct SyncLock<'a> {
    db: &'a SyncDb,
    token: String,
}

impl Drop for SyncLock<'_> {
    fn drop(&mut self) {
        match self.db.kv_delete_if(LOCK_KEY, &self.token) {
            Ok(true) => {}
            Ok(false) => tracing::warn!("sync lock was taken over before this pass finished"),
            Err(e) => tracing::error!(error = %e, "failed to release sync lock"),
        }
    }
}

/// Working state of one pass.
struct Pass<'a> {
    direction: SyncDirection,
    writer: SyncWriter<'a>,
    conflicts: ConflictResolutionService<'a>,
    report: SyncReport,
    /// Conflicts raised by this pass, in detection order.
    raised: Vec<String>,
    /// Events that must not be paired, exported over or imported.
    handled_events: HashSet<String>,
    handled_locals: HashSet<String>,
}

/// Runs sync passes between the local store and one calendar.
pub struct CalendarSyncEngine<'a> {
    db: &'a SyncDb,
    provider: &'a dyn CalendarProvider,
    config: SyncConfiguration,
    classifier: Box<dyn EventClassifier>,
    retry: RetryConfig,
}

impl<'a> CalendarSyncEngine<'a> {
    pub fn new(
        db: &'a SyncDb,
        provider: &'a dyn CalendarProvider,
        config: SyncConfiguration,
    ) -> Self {
        let retry = RetryConfig {
            max_retries: config.retry_attempts,
            ..RetryConfig::default()
        };
        Self {
            db,
            provider,
            config,
            classifier: Box::new(KeywordClassifier::default()),
            retry,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn EventClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &SyncConfiguration {
        &self.config
    }

    /// Conflict service sharing this engine's store, provider and settings.
    pub fn conflicts(&self) -> ConflictResolutionService<'a> {
        ConflictResolutionService::new(self.db, self.provider, &self.config)
            .with_retry(self.retry.clone())
    }

    pub async fn import(&self, window: TimeWindow) -> Result<SyncReport, SyncError> {
        self.run(SyncDirection::Import, window).await
    }

    pub async fn export(&self, window: TimeWindow) -> Result<SyncReport, SyncError> {
        self.run(SyncDirection::Export, window).await
    }

    pub async fn bidirectional(&self, window: TimeWindow) -> Result<SyncReport, SyncError> {
        self.run(SyncDirection::Bidirectional, window).await
    }

    fn stale_after(&self) -> Duration {
        Duration::minutes(i64::from(self.config.stale_lock_minutes.max(1)))
    }

    fn acquire_lock(&self) -> Result<SyncLock<'a>, SyncError> {
        self.acquire_lock_at(Utc::now())
    }

    /// Take the lock for a pass starting at `now`. A stale holder is
    /// replaced only if its row is unchanged since it was read.
    fn acquire_lock_at(&self, now: DateTime<Utc>) -> Result<SyncLock<'a>, SyncError> {
        let token = format!("{} {}", format_ts(&now), Uuid::new_v4());
        if self.db.kv_insert_if_absent(LOCK_KEY, &token)? {
            return Ok(SyncLock { db: self.db, token });
        }
        let Some(held) = self.db.kv_get(LOCK_KEY)? else {
            // Released between the two statements.
            return if self.db.kv_insert_if_absent(LOCK_KEY, &token)? {
                Ok(SyncLock { db: self.db, token })
            } else {
                Err(SyncError::AlreadyRunning(now))
            };
        };
        let held_since = lock_started(&held);
        if let Some(started) = held_since {
            if now - started < self.stale_after() {
                return Err(SyncError::AlreadyRunning(started));
            }
        }
        if !self.db.kv_replace_if(LOCK_KEY, &held, &token)? {
            return Err(SyncError::AlreadyRunning(now));
        }
        tracing::warn!(held_since = ?held_since, "took over stale sync lock");
        Ok(SyncLock { db: self.db, token })
    }

    /// Run one pass. The report is recorded in history even when the pass
    /// fails; a failed pass returns the error instead of the report.
    pub async fn run(
        &self,
        direction: SyncDirection,
        window: TimeWindow,
    ) -> Result<SyncReport, SyncError> {
        let _lock = self.acquire_lock()?;
        let mut pass = Pass {
            direction,
            writer: SyncWriter::new(self.db, self.provider, &self.config, self.retry.clone()),
            conflicts: self.conflicts(),
            report: SyncReport::new(self.provider.kind(), direction, window),
            raised: Vec::new(),
            handled_events: HashSet::new(),
            handled_locals: HashSet::new(),
        };
        tracing::info!(
            provider = %self.provider.kind(),
            %direction,
            window_start = %window.start,
            window_end = %window.end,
            "sync pass started"
        );

        let result = self.execute(&mut pass, &window).await;

        let mut report = pass.report;
        report.finished_at = Utc::now();
        report.outcome = match &result {
            Ok(()) if report.errors.is_empty() => SyncOutcome::Success,
            Ok(()) => SyncOutcome::Partial,
            Err(e) => {
                tracing::error!(error = %e, "sync pass failed");
                report.record_error(None, None, e);
                SyncOutcome::Failed
            }
        };
        self.db.insert_history(&report)?;
        if report.outcome != SyncOutcome::Failed {
            self.db.kv_set(LAST_SYNC_KEY, &format_ts(&report.finished_at))?;
        }
        tracing::info!(
            outcome = report.outcome.as_str(),
            created_local = report.created_local,
            updated_local = report.updated_local,
            deleted_local = report.deleted_local,
            created_remote = report.created_remote,
            updated_remote = report.updated_remote,
            deleted_remote = report.deleted_remote,
            relinked = report.relinked,
            unchanged = report.unchanged,
            conflicts = report.conflicts_detected,
            errors = report.errors.len(),
            "sync pass finished"
        );
        result.map(|()| report)
    }

    async fn execute(&self, pass: &mut Pass<'a>, window: &TimeWindow) -> Result<(), SyncError> {
        let calendar_id = self.config.calendar_id.as_str();
        let remote: BTreeMap<String, NormalizedCalendarEvent> =
            with_retry(&self.retry, || self.provider.list_events(calendar_id, window))
                .await?
                .into_iter()
                .map(|e| (e.id.clone(), e))
                .collect();

        let default_minutes = self.config.default_duration_minutes;
        let mut locals: BTreeMap<String, Assignment> = BTreeMap::new();
        for item in self.db.list_assignments()? {
            if self.config.includes(&item) && item.in_window(window, default_minutes) {
                locals.insert(item.id.clone(), item);
            }
        }
        for item in self.db.list_deleted_assignments()? {
            locals.insert(item.id.clone(), item);
        }

        let all_mappings = pass.writer.mappings().list_for_provider(self.provider.kind())?;
        for m in &all_mappings {
            pass.handled_locals.insert(m.local_id.clone());
            pass.handled_events.insert(m.external_id.clone());
        }
        tracing::debug!(
            remote = remote.len(),
            local = locals.len(),
            mappings = all_mappings.len(),
            "loaded both sides"
        );

        self.detect_duplicates(pass, &remote)?;

        for mapping in all_mappings {
            if mapping.calendar_id != calendar_id {
                continue;
            }
            let listed = remote.get(&mapping.external_id).cloned();
            if listed.is_none() && !locals.contains_key(&mapping.local_id) {
                continue;
            }
            let local_id = mapping.local_id.clone();
            let external_id = mapping.external_id.clone();
            if let Err(e) = self.reconcile(pass, mapping, listed).await {
                self.record_failure(pass, Some(&local_id), Some(&external_id), &e)?;
                let mappings = pass.writer.mappings();
                if let Some(mut m) = mappings.find_by_local(&local_id)? {
                    mappings.mark_status(&mut m, MappingStatus::Error)?;
                }
            }
        }

        let orphans = self.find_orphans(pass, &remote)?;
        self.pair_creations(pass, &locals, &remote, &orphans)?;
        for (event_id, local_id) in orphans {
            let Some(event) = remote.get(&event_id) else {
                continue;
            };
            if pass.handled_locals.contains(&local_id) {
                continue;
            }
            let Some(item) = self.db.get_assignment(&local_id)? else {
                continue;
            };
            pass.handled_events.insert(event_id.clone());
            pass.handled_locals.insert(local_id.clone());
            if let Err(e) = self.relink_orphan(pass, event, item).await {
                self.record_failure(pass, Some(&local_id), Some(&event_id), &e)?;
            }
        }

        self.export_unmapped(pass, &locals).await?;
        self.import_unmapped(pass, &remote)?;
        self.apply_policy(pass).await;
        Ok(())
    }

    fn raise(&self, pass: &mut Pass<'a>, conflict: SyncConflict) -> Result<(), SyncError> {
        let conflict = pass.conflicts.record(conflict)?;
        pass.report.conflicts_detected += 1;
        pass.raised.push(conflict.id);
        Ok(())
    }

    fn record_failure(
        &self,
        pass: &mut Pass<'a>,
        local_id: Option<&str>,
        external_id: Option<&str>,
        err: &SyncError,
    ) -> Result<(), SyncError> {
        tracing::warn!(?local_id, ?external_id, error = %err, "sync item failed");
        pass.report.record_error(local_id, external_id, err);
        if let Some(id) = local_id {
            if let Some(item) = self.db.get_assignment(id)? {
                if !item.is_deleted() {
                    self.db.set_assignment_status(id, ItemSyncStatus::Error)?;
                }
            }
        }
        Ok(())
    }

    /// Unmapped live events carrying a local id that is already mapped, or
    /// carried by more than one event.
    fn detect_duplicates(
        &self,
        pass: &mut Pass<'a>,
        remote: &BTreeMap<String, NormalizedCalendarEvent>,
    ) -> Result<(), SyncError> {
        let mut claims: BTreeMap<&str, Vec<&NormalizedCalendarEvent>> = BTreeMap::new();
        for event in remote.values() {
            if event.is_cancelled() || pass.handled_events.contains(&event.id) {
                continue;
            }
            if let Some(local_id) = event.local_id.as_deref() {
                claims.entry(local_id).or_default().push(event);
            }
        }

        for (local_id, claimants) in claims {
            let mapped = pass.handled_locals.contains(local_id);
            if !mapped && claimants.len() < 2 {
                continue;
            }
            let Some(local) = self.db.get_assignment(local_id)? else {
                continue;
            };
            for event in claimants {
                pass.handled_events.insert(event.id.clone());
                if pass
                    .conflicts
                    .was_ignored(local_id, &event.id, ConflictType::DuplicateMapping)?
                {
                    continue;
                }
                let conflict = SyncConflict::new(
                    self.provider.kind(),
                    ConflictType::DuplicateMapping,
                    ConflictSeverity::High,
                    Some(local.clone()),
                    Some(event.clone()),
                );
                self.raise(pass, conflict)?;
            }
            pass.handled_locals.insert(local_id.to_string());
        }
        Ok(())
    }

    async fn reconcile(
        &self,
        pass: &mut Pass<'a>,
        mut mapping: CalendarEventMapping,
        listed: Option<NormalizedCalendarEvent>,
    ) -> Result<(), SyncError> {
        let local = self.db.get_assignment(&mapping.local_id)?;
        let remote = match listed {
            Some(event) => Some(event),
            // Moved out of the window, or deleted.
            None => pass.writer.fetch_remote(&mapping.external_id).await?,
        };
        let local_live = local.clone().filter(|i| !i.is_deleted());
        let remote_live = remote.clone().filter(|e| !e.is_cancelled());
        let direction = pass.direction;

        match (local_live, remote_live) {
            (None, None) => {
                pass.writer.remove_local(&mapping.local_id)?;
            }
            (None, Some(event)) => {
                if mapping.remote_changed(&event) {
                    self.raise_deletion(pass, &mut mapping, local, remote)?;
                } else if direction.allows_export() {
                    pass.writer
                        .remove_remote(&event.id, Some(&mapping.local_id))
                        .await?;
                    pass.report.deleted_remote += 1;
                } else {
                    pass.report.unchanged += 1;
                }
            }
            (Some(mut item), None) => {
                if mapping.local_changed(item.updated_at) {
                    self.raise_deletion(pass, &mut mapping, local, remote)?;
                } else if direction.allows_import() {
                    pass.writer.remove_local(&item.id)?;
                    pass.report.deleted_local += 1;
                } else {
                    pass.writer.recreate_remote(&mut item, Some(mapping)).await?;
                    pass.report.created_remote += 1;
                }
            }
            (Some(mut item), Some(event)) => {
                let local_changed = mapping.local_changed(item.updated_at);
                let remote_changed = mapping.remote_changed(&event);
                match (local_changed, remote_changed) {
                    (true, false) if direction.allows_export() => {
                        pass.writer
                            .export_to(&mut item, &event.id, Some(mapping))
                            .await?;
                        pass.report.updated_remote += 1;
                    }
                    (false, true) if direction.allows_import() => {
                        pass.writer.import_into(&mut item, &event, Some(mapping))?;
                        pass.report.updated_local += 1;
                    }
                    (true, true) => {
                        let diffs = pass.conflicts.compare(&item, &event)?;
                        if diffs.is_empty() {
                            pass.writer
                                .mappings()
                                .record_synced(&mut mapping, item.updated_at, &event)?;
                            if item.sync_status != ItemSyncStatus::Synced {
                                self.db.set_assignment_status(&item.id, ItemSyncStatus::Synced)?;
                            }
                            pass.report.unchanged += 1;
                        } else {
                            let (kind, severity) = ConflictResolutionService::classify(
                                &diffs,
                                ConflictType::ContentMismatch,
                            );
                            let conflict = SyncConflict::new(
                                self.provider.kind(),
                                kind,
                                severity,
                                Some(item.clone()),
                                Some(event),
                            )
                            .with_fields(diffs);
                            self.raise(pass, conflict)?;
                            self.db.set_assignment_status(&item.id, ItemSyncStatus::Conflict)?;
                            pass.writer
                                .mappings()
                                .mark_status(&mut mapping, MappingStatus::Conflict)?;
                        }
                    }
                    // Unchanged, or the change may not be propagated this way.
                    _ => pass.report.unchanged += 1,
                }
            }
        }
        Ok(())
    }

    fn raise_deletion(
        &self,
        pass: &mut Pass<'a>,
        mapping: &mut CalendarEventMapping,
        local: Option<Assignment>,
        remote: Option<NormalizedCalendarEvent>,
    ) -> Result<(), SyncError> {
        let mut conflict = SyncConflict::new(
            self.provider.kind(),
            ConflictType::DeletionConflict,
            ConflictSeverity::High,
            local.clone(),
            remote,
        );
        conflict.local_id = Some(mapping.local_id.clone());
        conflict.external_id = Some(mapping.external_id.clone());
        self.raise(pass, conflict)?;

        if local.is_some_and(|i| !i.is_deleted()) {
            self.db
                .set_assignment_status(&mapping.local_id, ItemSyncStatus::Conflict)?;
        }
        pass.writer
            .mappings()
            .mark_status(mapping, MappingStatus::Conflict)
    }

    /// Unhandled live events tagged with an unmapped local item that still
    /// exists: event id -> local id.
    fn find_orphans(
        &self,
        pass: &Pass<'a>,
        remote: &BTreeMap<String, NormalizedCalendarEvent>,
    ) -> Result<BTreeMap<String, String>, SyncError> {
        let mut orphans = BTreeMap::new();
        for event in remote.values() {
            if event.is_cancelled() || pass.handled_events.contains(&event.id) {
                continue;
            }
            let Some(local_id) = event.local_id.as_deref() else {
                continue;
            };
            if !pass.handled_locals.contains(local_id) && self.db.get_assignment(local_id)?.is_some()
            {
                orphans.insert(event.id.clone(), local_id.to_string());
            }
        }
        Ok(orphans)
    }

    /// Unmapped item and unmapped event with the same title and start.
    fn pair_creations(
        &self,
        pass: &mut Pass<'a>,
        locals: &BTreeMap<String, Assignment>,
        remote: &BTreeMap<String, NormalizedCalendarEvent>,
        orphans: &BTreeMap<String, String>,
    ) -> Result<(), SyncError> {
        for item in locals.values() {
            if item.is_deleted() || pass.handled_locals.contains(&item.id) {
                continue;
            }
            let start = match pass.writer.mapper.to_event(item) {
                Ok(event) => event.start,
                Err(e) => {
                    pass.handled_locals.insert(item.id.clone());
                    self.record_failure(pass, Some(&item.id), None, &SyncError::from(e))?;
                    continue;
                }
            };
            let title = normalize_text(&AssignmentEventMapper::event_title(item));

            for event in remote.values() {
                if event.is_cancelled()
                    || pass.handled_events.contains(&event.id)
                    || orphans.contains_key(&event.id)
                    || normalize_text(&event.title) != title
                    || (event.start - start).num_seconds().abs() > PAIRING_TOLERANCE_SECS
                {
                    continue;
                }
                if pass
                    .conflicts
                    .was_ignored(&item.id, &event.id, ConflictType::CreationConflict)?
                {
                    continue;
                }
                let diffs = pass.conflicts.compare(item, event)?;
                let conflict = SyncConflict::new(
                    self.provider.kind(),
                    ConflictType::CreationConflict,
                    ConflictSeverity::Medium,
                    Some(item.clone()),
                    Some(event.clone()),
                )
                .with_fields(diffs);
                self.raise(pass, conflict)?;
                self.db
                    .set_assignment_status(&item.id, ItemSyncStatus::Conflict)?;
                pass.handled_locals.insert(item.id.clone());
                pass.handled_events.insert(event.id.clone());
                break;
            }
        }
        Ok(())
    }

    /// Link an event we created whose mapping was never saved.
    async fn relink_orphan(
        &self,
        pass: &mut Pass<'a>,
        event: &NormalizedCalendarEvent,
        mut item: Assignment,
    ) -> Result<(), SyncError> {
        if item.is_deleted() {
            if pass.direction.allows_export() {
                pass.writer.remove_remote(&event.id, Some(&item.id)).await?;
                pass.report.deleted_remote += 1;
            }
            return Ok(());
        }

        let diffs = pass.conflicts.compare(&item, event)?;
        if diffs.is_empty() {
            pass.writer.adopt(&mut item, event)?;
        } else if pass.direction.allows_export() {
            pass.writer.export_to(&mut item, &event.id, None).await?;
        } else {
            pass.writer.import_into(&mut item, event, None)?;
        }
        pass.report.relinked += 1;
        Ok(())
    }

    async fn export_unmapped(
        &self,
        pass: &mut Pass<'a>,
        locals: &BTreeMap<String, Assignment>,
    ) -> Result<(), SyncError> {
        for item in locals.values() {
            if pass.handled_locals.contains(&item.id) {
                continue;
            }
            if item.is_deleted() {
                // Deleted before it was ever exported.
                self.db.purge_assignment(&item.id)?;
                continue;
            }
            if !pass.direction.allows_export() {
                continue;
            }
            let mut item = item.clone();
            match pass.writer.export_new(&mut item).await {
                Ok(_) => pass.report.created_remote += 1,
                Err(e) => self.record_failure(pass, Some(&item.id), None, &e)?,
            }
        }
        Ok(())
    }

    fn import_unmapped(
        &self,
        pass: &mut Pass<'a>,
        remote: &BTreeMap<String, NormalizedCalendarEvent>,
    ) -> Result<(), SyncError> {
        if !pass.direction.allows_import() {
            return Ok(());
        }
        for event in remote.values() {
            if event.is_cancelled() || pass.handled_events.contains(&event.id) {
                continue;
            }
            let category = match self.classifier.classify(event) {
                Some(category) => category,
                None if !self.config.import_requires_detection => AssignmentCategory::Other,
                None => continue,
            };
            if !self.config.categories.contains(&category) {
                continue;
            }
            match pass.writer.import_new(event, category) {
                Ok(_) => pass.report.created_local += 1,
                Err(e) => self.record_failure(pass, None, Some(&event.id), &e)?,
            }
        }
        Ok(())
    }

    /// Resolve this pass's conflicts with the configured policy. Failures
    /// leave the conflict pending.
    async fn apply_policy(&self, pass: &mut Pass<'a>) {
        let policy = self.config.conflict_policy;
        if policy == ConflictPolicy::Manual {
            return;
        }
        for id in std::mem::take(&mut pass.raised) {
            let Ok(conflict) = pass.conflicts.get(&id) else {
                continue;
            };
            let Some(choice) = ConflictResolutionService::decide(&conflict, policy) else {
                continue;
            };
            match pass.conflicts.resolve_with(&id, choice, true).await {
                Ok(_) => pass.report.conflicts_auto_resolved += 1,
                Err(e) => {
                    tracing::warn!(conflict_id = %id, error = %e, "automatic resolution failed")
                }
            }
        }
    }

    pub fn status(&self) -> Result<SyncStatus, SyncError> {
        let in_progress = self
            .db
            .kv_get(LOCK_KEY)?
            .as_deref()
            .and_then(lock_started)
            .is_some_and(|started| Utc::now() - started < self.stale_after());
        Ok(SyncStatus {
            last_sync_at: self.db.kv_get(LAST_SYNC_KEY)?.as_deref().and_then(parse_kv_ts),
            last_outcome: self.db.last_history()?.map(|r| r.outcome),
            in_progress,
            pending_conflicts: self.db.count_pending_conflicts()?,
            mapped_items: self.db.count_mappings(self.provider.kind())?,
        })
    }

    /// Most recent passes first.
    pub fn history(&self, limit: usize) -> Result<Vec<SyncReport>, SyncError> {
        Ok(self.db.list_history(limit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProviderKind;
    use crate::provider::MemoryProvider;

    fn config() -> SyncConfiguration {
        SyncConfiguration {
            provider: ProviderKind::Memory,
            ..SyncConfiguration::default()
        }
    }

    fn window() -> TimeWindow {
        TimeWindow::around(Utc::now(), 7, 30).unwrap()
    }

    #[tokio::test]
    async fn second_pass_is_rejected_while_lock_is_held() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        let engine = CalendarSyncEngine::new(&db, &cal, config());

        let lock = engine.acquire_lock().unwrap();
        assert!(engine.status().unwrap().in_progress);
        assert!(matches!(
            engine.bidirectional(window()).await,
            Err(SyncError::AlreadyRunning(_))
        ));

        drop(lock);
        assert!(!engine.status().unwrap().in_progress);
        engine.bidirectional(window()).await.unwrap();
        assert!(db.kv_get(LOCK_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_lock_is_taken_over() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        let engine = CalendarSyncEngine::new(&db, &cal, config());

        let old = Utc::now() - Duration::hours(2);
        db.kv_set(LOCK_KEY, &format_ts(&old)).unwrap();
        assert!(!engine.status().unwrap().in_progress);

        let report = engine.bidirectional(window()).await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::Success);
    }

    #[test]
    fn overtaken_pass_does_not_release_successor_lock() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        let engine = CalendarSyncEngine::new(&db, &cal, config());

        let first = engine
            .acquire_lock_at(Utc::now() - Duration::hours(2))
            .unwrap();
        let second = engine.acquire_lock().unwrap();
        assert_ne!(first.token, second.token);

        drop(first);
        assert_eq!(db.kv_get(LOCK_KEY).unwrap(), Some(second.token.clone()));
        assert!(engine.status().unwrap().in_progress);
        assert!(matches!(
            engine.acquire_lock(),
            Err(SyncError::AlreadyRunning(_))
        ));

        drop(second);
        assert!(db.kv_get(LOCK_KEY).unwrap().is_none());
    }

    #[test]
    fn takeover_fails_when_lock_changed_after_read() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        let engine = CalendarSyncEngine::new(&db, &cal, config());

        let stale = format!("{} old-pass", format_ts(&(Utc::now() - Duration::hours(2))));
        db.kv_set(LOCK_KEY, &stale).unwrap();
        let winner = engine.acquire_lock().unwrap();

        // A second process that read the stale value before the takeover.
        assert!(!db.kv_replace_if(LOCK_KEY, &stale, "late-pass").unwrap());
        assert_eq!(db.kv_get(LOCK_KEY).unwrap(), Some(winner.token.clone()));
    }

    #[tokio::test]
    async fn failed_listing_is_recorded_and_returned() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        cal.fail_listing(true);
        let engine = CalendarSyncEngine::new(&db, &cal, config())
            .with_retry_config(RetryConfig::immediate(1));

        assert!(engine.bidirectional(window()).await.is_err());
        let status = engine.status().unwrap();
        assert_eq!(status.last_outcome, Some(SyncOutcome::Failed));
        assert!(status.last_sync_at.is_none());
        assert!(!status.in_progress);

        let history = engine.history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].errors.len(), 1);
    }

    #[tokio::test]
    async fn empty_pass_succeeds_and_sets_last_sync() {
        let db = SyncDb::open_memory().unwrap();
        let cal = MemoryProvider::new();
        let engine = CalendarSyncEngine::new(&db, &cal, config());

        let report = engine.import(window()).await.unwrap();
        assert_eq!(report.writes(), 0);
        assert_eq!(report.direction, SyncDirection::Import);
        let status = engine.status().unwrap();
        assert_eq!(status.last_outcome, Some(SyncOutcome::Success));
        assert!(status.last_sync_at.is_some());
        assert_eq!(status.mapped_items, 0);
    }
}
