//! Google Calendar v3 adapter.
//!
//! Lists with `singleEvents=false` so recurring series arrive as one master
//! event; modified instances of a series are skipped. The local id lives in
//! `extendedProperties.private`.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::oauth::Authenticator;
use super::{ApiClient, CalendarProvider, LOCAL_ID_PROPERTY};
use crate::mapping::timezone::{self, date_start_utc};
use crate::mapping::{fields, recurrence};
use crate::model::{EventStatus, NormalizedCalendarEvent, ProviderKind, TimeWindow};
use crate::sync::SyncError;

const DEFAULT_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const PAGE_SIZE: &str = "250";

pub struct GoogleProvider {
    api: ApiClient,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventList {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    next_page_token: Option<String>,
    time_zone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    start: Option<EventTime>,
    #[serde(default)]
    end: Option<EventTime>,
    #[serde(default)]
    recurrence: Vec<String>,
    #[serde(default)]
    recurring_event_id: Option<String>,
    #[serde(default)]
    reminders: Value,
    #[serde(default)]
    color_id: Option<String>,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    extended_properties: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    date: Option<NaiveDate>,
    date_time: Option<DateTime<chrono::FixedOffset>>,
    time_zone: Option<String>,
}

impl GoogleProvider {
    pub fn new(auth: Authenticator) -> Self {
        Self {
            api: ApiClient::new(ProviderKind::Google, auth),
            base_url: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Point the client at another API root (tests use a mock server).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id)
        )
    }

    fn event_url(&self, calendar_id: &str, id: &str) -> String {
        format!("{}/{}", self.events_url(calendar_id), urlencoding::encode(id))
    }
}

/// Google event -> normalized event. `fallback_tz` is the calendar's zone.
fn from_google(
    calendar_id: &str,
    ev: GoogleEvent,
    fallback_tz: &str,
) -> Result<NormalizedCalendarEvent, SyncError> {
    let status = ev
        .status
        .as_deref()
        .map(EventStatus::parse)
        .unwrap_or_default();
    let updated_at = ev.updated.unwrap_or_else(Utc::now);

    let timezone = ev
        .start
        .as_ref()
        .and_then(|t| t.time_zone.as_deref())
        .and_then(timezone::normalize_timezone)
        .unwrap_or_else(|| timezone::normalize_or_utc(fallback_tz));

    let parse_time = |t: &Option<EventTime>| -> Option<(DateTime<Utc>, bool)> {
        let t = t.as_ref()?;
        if let Some(date) = t.date {
            return Some((date_start_utc(date), true));
        }
        t.date_time.map(|dt| (dt.with_timezone(&Utc), false))
    };

    let (start, end, all_day) = match (parse_time(&ev.start), parse_time(&ev.end)) {
        (Some((start, all_day)), Some((end, _))) => (start, end, all_day),
        (Some((start, all_day)), None) => (start, start, all_day),
        // Deleted events may come back stripped down to id and status.
        _ if status == EventStatus::Cancelled => (updated_at, updated_at, false),
        _ => {
            return Err(SyncError::InvalidEvent(format!(
                "event {} has no start time",
                ev.id
            )))
        }
    };

    let recurrence = recurrence::from_google_recurrence(&ev.recurrence)?;
    let local_id = ev.extended_properties["private"][LOCAL_ID_PROPERTY]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(String::from);

    Ok(NormalizedCalendarEvent {
        id: ev.id,
        provider: ProviderKind::Google,
        calendar_id: calendar_id.to_string(),
        title: ev.summary.unwrap_or_default(),
        description: ev.description.filter(|d| !d.is_empty()),
        location: ev.location.filter(|l| !l.is_empty()),
        start,
        end,
        all_day,
        timezone,
        recurrence,
        reminders: fields::from_google_reminders(&ev.reminders),
        color: ev.color_id.as_deref().and_then(fields::from_google_color_id),
        status,
        updated_at,
        etag: ev.etag,
        local_id,
    })
}

/// Normalized event -> Google request body.
fn to_google(event: &NormalizedCalendarEvent) -> Result<Value, SyncError> {
    let (start, end) = if event.all_day {
        let (first, last) = timezone::all_day_dates(event.start, event.end);
        (
            json!({ "date": first.to_string() }),
            json!({ "date": last.to_string() }),
        )
    } else {
        (
            json!({
                "dateTime": timezone::format_local(event.start, &event.timezone)?,
                "timeZone": event.timezone,
            }),
            json!({
                "dateTime": timezone::format_local(event.end, &event.timezone)?,
                "timeZone": event.timezone,
            }),
        )
    };

    let recurrence: Vec<String> = match &event.recurrence {
        Some(rule) => {
            let weekday = timezone::to_local(event.start, &event.timezone)?.weekday();
            vec![recurrence::to_rrule(&recurrence::canonical(rule, weekday))]
        }
        None => Vec::new(),
    };

    let mut body = json!({
        "summary": event.title,
        "description": event.description.clone().unwrap_or_default(),
        "location": event.location.clone().unwrap_or_default(),
        "start": start,
        "end": end,
        "recurrence": recurrence,
        "reminders": fields::to_google_reminders(&event.reminders),
    });
    if let Some(color) = event.color {
        body["colorId"] = json!(fields::to_google_color_id(color));
    }
    if let Some(local_id) = &event.local_id {
        body["extendedProperties"] = json!({ "private": { LOCAL_ID_PROPERTY: local_id } });
    }
    Ok(body)
}

#[async_trait]
impl CalendarProvider for GoogleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        window: &TimeWindow,
    ) -> Result<Vec<NormalizedCalendarEvent>, SyncError> {
        let url = self.events_url(calendar_id);
        let time_min = window.start.to_rfc3339();
        let time_max = window.end.to_rfc3339();
        let mut page_token: Option<String> = None;
        let mut events = Vec::new();

        loop {
            let mut query = vec![
                ("timeMin", time_min.clone()),
                ("timeMax", time_max.clone()),
                ("singleEvents", "false".to_string()),
                ("showDeleted", "true".to_string()),
                ("maxResults", PAGE_SIZE.to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let resp = self
                .api
                .send_checked(|http, token| http.get(&url).bearer_auth(token).query(&query))
                .await
                .map_err(|e| match e {
                    SyncError::EventNotFound(_) => {
                        SyncError::CalendarNotFound(calendar_id.to_string())
                    }
                    other => other,
                })?;
            let page: EventList = resp.json().await?;
            let fallback_tz = page.time_zone.unwrap_or_else(|| "UTC".to_string());

            for ev in page.items {
                if ev.recurring_event_id.is_some() {
                    continue;
                }
                let id = ev.id.clone();
                match from_google(calendar_id, ev, &fallback_tz) {
                    Ok(event) => events.push(event),
                    Err(e) => tracing::warn!(event_id = %id, error = %e, "skipping unreadable event"),
                }
            }

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        tracing::debug!(count = events.len(), calendar_id, "listed google events");
        Ok(events)
    }

    async fn get_event(
        &self,
        calendar_id: &str,
        id: &str,
    ) -> Result<Option<NormalizedCalendarEvent>, SyncError> {
        let url = self.event_url(calendar_id, id);
        match self
            .api
            .send_checked(|http, token| http.get(&url).bearer_auth(token))
            .await
        {
            Ok(resp) => {
                let ev: GoogleEvent = resp.json().await?;
                Ok(Some(from_google(calendar_id, ev, "UTC")?))
            }
            Err(SyncError::EventNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_event(
        &self,
        calendar_id: &str,
        event: &NormalizedCalendarEvent,
    ) -> Result<NormalizedCalendarEvent, SyncError> {
        let url = self.events_url(calendar_id);
        let body = to_google(event)?;
        let resp = self
            .api
            .send_checked(|http, token| http.post(&url).bearer_auth(token).json(&body))
            .await?;
        let created: GoogleEvent = resp.json().await?;
        tracing::info!(event_id = %created.id, "created google event");
        from_google(calendar_id, created, &event.timezone)
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event: &NormalizedCalendarEvent,
    ) -> Result<NormalizedCalendarEvent, SyncError> {
        let url = self.event_url(calendar_id, &event.id);
        let body = to_google(event)?;
        let resp = self
            .api
            .send_checked(|http, token| http.put(&url).bearer_auth(token).json(&body))
            .await?;
        let updated: GoogleEvent = resp.json().await?;
        tracing::info!(event_id = %updated.id, "updated google event");
        from_google(calendar_id, updated, &event.timezone)
    }

    async fn delete_event(&self, calendar_id: &str, id: &str) -> Result<(), SyncError> {
        let url = self.event_url(calendar_id, id);
        match self
            .api
            .send_checked(|http, token| http.delete(&url).bearer_auth(token))
            .await
        {
            Ok(_) | Err(SyncError::EventNotFound(_)) => {
                tracing::info!(event_id = id, "deleted google event");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
