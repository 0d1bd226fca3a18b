//! Microsoft Graph v1.0 adapter.
//!
//! Reads go through `calendarView`, which expands series into occurrences;
//! those are folded back into their series master. Times are requested in
//! UTC through the `Prefer` header and the local id is a single-value
//! extended property.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::oauth::Authenticator;
use super::{ApiClient, CalendarProvider, LOCAL_ID_PROPERTY};
use crate::mapping::timezone::{self, date_start_utc};
use crate::mapping::{fields, recurrence};
use crate::model::{EventStatus, NormalizedCalendarEvent, ProviderKind, TimeWindow};
use crate::sync::SyncError;

const DEFAULT_API_BASE: &str = "https://graph.microsoft.com/v1.0";
const PREFER: &str = "outlook.timezone=\"UTC\", outlook.body-content-type=\"text\"";
const PAGE_SIZE: &str = "100";

/// Named string property in the PublicStrings property set.
fn property_id() -> String {
    format!("String {{00020329-0000-0000-C000-000000000046}} Name {LOCAL_ID_PROPERTY}")
}

fn expand_property() -> String {
    format!("singleValueExtendedProperties($filter=id eq '{}')", property_id())
}

pub struct MicrosoftProvider {
    api: ApiClient,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct EventPage {
    #[serde(default)]
    value: Vec<GraphEvent>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEvent {
    id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body: Option<ItemBody>,
    #[serde(default)]
    location: Option<Location>,
    start: Option<GraphDateTime>,
    end: Option<GraphDateTime>,
    #[serde(default)]
    is_all_day: bool,
    #[serde(default)]
    is_cancelled: bool,
    #[serde(default)]
    original_start_time_zone: Option<String>,
    #[serde(default)]
    recurrence: Value,
    #[serde(default)]
    is_reminder_on: bool,
    #[serde(default)]
    reminder_minutes_before_start: Option<u64>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    last_modified_date_time: Option<DateTime<Utc>>,
    #[serde(rename = "@odata.etag", default)]
    etag: Option<String>,
    #[serde(rename = "type", default)]
    event_type: Option<String>,
    #[serde(default)]
    series_master_id: Option<String>,
    #[serde(default)]
    single_value_extended_properties: Vec<ExtendedProperty>,
}

#[derive(Debug, Deserialize)]
struct ItemBody {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Location {
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDateTime {
    date_time: String,
    #[serde(default)]
    time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtendedProperty {
    id: String,
    value: String,
}

impl MicrosoftProvider {
    pub fn new(auth: Authenticator) -> Self {
        Self {
            api: ApiClient::new(ProviderKind::Microsoft, auth),
            base_url: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Point the client at another API root (tests use a mock server).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn calendar_url(&self, calendar_id: &str) -> String {
        if calendar_id.is_empty() || calendar_id == "primary" {
            format!("{}/me/calendar", self.base_url)
        } else {
            format!(
                "{}/me/calendars/{}",
                self.base_url,
                urlencoding::encode(calendar_id)
            )
        }
    }

    fn event_url(&self, id: &str) -> String {
        format!("{}/me/events/{}", self.base_url, urlencoding::encode(id))
    }

    async fn fetch_page(&self, url: &str, query: &[(&str, String)]) -> Result<EventPage, SyncError> {
        let resp = self
            .api
            .send_checked(|http, token| {
                http.get(url)
                    .bearer_auth(token)
                    .header("Prefer", PREFER)
                    .query(query)
            })
            .await?;
        Ok(resp.json().await?)
    }
}

/// Graph `dateTime` strings carry seven fractional digits and no offset.
fn parse_graph_time(value: &GraphDateTime) -> Result<NaiveDateTime, SyncError> {
    NaiveDateTime::parse_from_str(&value.date_time, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&value.date_time, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| SyncError::InvalidEvent(format!("bad dateTime '{}': {e}", value.date_time)))
}

fn to_utc(value: &GraphDateTime) -> Result<DateTime<Utc>, SyncError> {
    let naive = parse_graph_time(value)?;
    match value.time_zone.as_deref() {
        None | Some("UTC") | Some("") => Ok(naive.and_utc()),
        Some(tz) => Ok(timezone::from_local(naive, &timezone::normalize_or_utc(tz))?),
    }
}

fn from_graph(calendar_id: &str, ev: GraphEvent) -> Result<NormalizedCalendarEvent, SyncError> {
    let (Some(start_raw), Some(end_raw)) = (ev.start.as_ref(), ev.end.as_ref()) else {
        return Err(SyncError::InvalidEvent(format!("event {} has no start/end", ev.id)));
    };

    let (start, end) = if ev.is_all_day {
        let first: NaiveDate = parse_graph_time(start_raw)?.date();
        let last: NaiveDate = parse_graph_time(end_raw)?.date();
        (date_start_utc(first), date_start_utc(last))
    } else {
        (to_utc(start_raw)?, to_utc(end_raw)?)
    };

    let timezone = ev
        .original_start_time_zone
        .as_deref()
        .map(timezone::normalize_or_utc)
        .unwrap_or_else(|| "UTC".to_string());

    let property = property_id();
    let local_id = ev
        .single_value_extended_properties
        .iter()
        .find(|p| p.id.eq_ignore_ascii_case(&property))
        .map(|p| p.value.clone())
        .filter(|v| !v.is_empty());

    Ok(NormalizedCalendarEvent {
        id: ev.id,
        provider: ProviderKind::Microsoft,
        calendar_id: calendar_id.to_string(),
        title: ev.subject.unwrap_or_default(),
        description: ev
            .body
            .map(|b| b.content.trim().to_string())
            .filter(|c| !c.is_empty()),
        location: ev
            .location
            .map(|l| l.display_name)
            .filter(|l| !l.is_empty()),
        start,
        end,
        all_day: ev.is_all_day,
        timezone,
        recurrence: recurrence::from_graph_recurrence(&ev.recurrence)?,
        reminders: fields::from_graph_reminder(ev.is_reminder_on, ev.reminder_minutes_before_start),
        color: fields::from_outlook_categories(&ev.categories),
        status: if ev.is_cancelled {
            EventStatus::Cancelled
        } else {
            EventStatus::Confirmed
        },
        updated_at: ev.last_modified_date_time.unwrap_or_else(Utc::now),
        etag: ev.etag,
        local_id,
    })
}

fn to_graph(event: &NormalizedCalendarEvent) -> Result<Value, SyncError> {
    let (start, end) = if event.all_day {
        let (first, last) = timezone::all_day_dates(event.start, event.end);
        (
            json!({ "dateTime": format!("{first}T00:00:00"), "timeZone": "UTC" }),
            json!({ "dateTime": format!("{last}T00:00:00"), "timeZone": "UTC" }),
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

    let recurrence = match &event.recurrence {
        Some(rule) => {
            let start_date = if event.all_day {
                event.start.date_naive()
            } else {
                timezone::local_date(event.start, &event.timezone)?
            };
            recurrence::to_graph_recurrence(rule, start_date, &event.timezone)
        }
        None => Value::Null,
    };

    let reminder = fields::graph_reminder_minutes(&event.reminders);
    let mut body = json!({
        "subject": event.title,
        "body": {
            "contentType": "text",
            "content": event.description.clone().unwrap_or_default(),
        },
        "location": { "displayName": event.location.clone().unwrap_or_default() },
        "start": start,
        "end": end,
        "isAllDay": event.all_day,
        "recurrence": recurrence,
        "isReminderOn": reminder.is_some(),
        "categories": event
            .color
            .map(|c| vec![fields::to_outlook_category(c)])
            .unwrap_or_default(),
    });
    if let Some(minutes) = reminder {
        body["reminderMinutesBeforeStart"] = json!(minutes);
    }
    // PATCH keeps properties that are left out, so an untagged event gets an
    // empty value instead.
    body["singleValueExtendedProperties"] = json!([
        { "id": property_id(), "value": event.local_id.clone().unwrap_or_default() }
    ]);
    Ok(body)
}

#[async_trait]
impl CalendarProvider for MicrosoftProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Microsoft
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        window: &TimeWindow,
    ) -> Result<Vec<NormalizedCalendarEvent>, SyncError> {
        let first_url = format!("{}/calendarView", self.calendar_url(calendar_id));
        let first_query = vec![
            ("startDateTime", window.start.to_rfc3339()),
            ("endDateTime", window.end.to_rfc3339()),
            ("$top", PAGE_SIZE.to_string()),
            ("$expand", expand_property()),
        ];

        let mut events = Vec::new();
        let mut masters = BTreeSet::new();
        let mut next: Option<String> = None;

        loop {
            let page = match &next {
                None => self.fetch_page(&first_url, &first_query).await,
                // nextLink already carries the query.
                Some(link) => self.fetch_page(link, &[]).await,
            }
            .map_err(|e| match e {
                SyncError::EventNotFound(_) => SyncError::CalendarNotFound(calendar_id.to_string()),
                other => other,
            })?;

            for ev in page.value {
                match ev.event_type.as_deref() {
                    Some("occurrence") | Some("exception") => {
                        if let Some(master) = ev.series_master_id {
                            masters.insert(master);
                        }
                        continue;
                    }
                    Some("seriesMaster") => {
                        masters.remove(&ev.id);
                    }
                    _ => {}
                }
                let id = ev.id.clone();
                match from_graph(calendar_id, ev) {
                    Ok(event) => events.push(event),
                    Err(e) => tracing::warn!(event_id = %id, error = %e, "skipping unreadable event"),
                }
            }

            match page.next_link {
                Some(link) => next = Some(link),
                None => break,
            }
        }

        for master in masters {
            if events.iter().any(|e| e.id == master) {
                continue;
            }
            if let Some(event) = self.get_event(calendar_id, &master).await? {
                events.push(event);
            }
        }

        tracing::debug!(count = events.len(), calendar_id, "listed graph events");
        Ok(events)
    }

    async fn get_event(
        &self,
        calendar_id: &str,
        id: &str,
    ) -> Result<Option<NormalizedCalendarEvent>, SyncError> {
        let url = self.event_url(id);
        let query = [("$expand", expand_property())];
        match self
            .api
            .send_checked(|http, token| {
                http.get(&url)
                    .bearer_auth(token)
                    .header("Prefer", PREFER)
                    .query(&query)
            })
            .await
        {
            Ok(resp) => {
                let ev: GraphEvent = resp.json().await?;
                Ok(Some(from_graph(calendar_id, ev)?))
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
        let url = format!("{}/events", self.calendar_url(calendar_id));
        let body = to_graph(event)?;
        let resp = self
            .api
            .send_checked(|http, token| {
                http.post(&url)
                    .bearer_auth(token)
                    .header("Prefer", PREFER)
                    .json(&body)
            })
            .await?;
        let created: GraphEvent = resp.json().await?;
        tracing::info!(event_id = %created.id, "created graph event");
        let mut created = from_graph(calendar_id, created)?;
        // Write responses do not expand extended properties.
        created.local_id = event.local_id.clone();
        Ok(created)
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        event: &NormalizedCalendarEvent,
    ) -> Result<NormalizedCalendarEvent, SyncError> {
        let url = self.event_url(&event.id);
        let body = to_graph(event)?;
        let resp = self
            .api
            .send_checked(|http, token| {
                http.patch(&url)
                    .bearer_auth(token)
                    .header("Prefer", PREFER)
                    .json(&body)
            })
            .await?;
        let updated: GraphEvent = resp.json().await?;
        tracing::info!(event_id = %updated.id, "updated graph event");
        let mut updated = from_graph(calendar_id, updated)?;
        updated.local_id = event.local_id.clone();
        Ok(updated)
    }

    async fn delete_event(&self, _calendar_id: &str, id: &str) -> Result<(), SyncError> {
        let url = self.event_url(id);
        match self
            .api
            .send_checked(|http, token| http.delete(&url).bearer_auth(token))
            .await
        {
            Ok(_) | Err(SyncError::EventNotFound(_)) => {
                tracing::info!(event_id = id, "deleted graph event");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventColor, Frequency, RecurrenceRule, Reminder};
    use chrono::TimeZone;

    fn parse(value: Value) -> NormalizedCalendarEvent {
        let ev: GraphEvent = serde_json::from_value(value).unwrap();
        from_graph("primary", ev).unwrap()
    }

    #[test]
    fn parses_event_with_windows_zone_and_property() {
        let event = parse(json!({
            "id": "AAMk1",
            "subject": "MATH201: Midterm",
            "body": {"contentType": "text", "content": " Room 4 \r\n"},
            "start": {"dateTime": "2025-02-10T14:00:00.0000000", "timeZone": "UTC"},
            "end": {"dateTime": "2025-02-10T16:00:00.0000000", "timeZone": "UTC"},
            "originalStartTimeZone": "Pacific Standard Time",
            "isReminderOn": true,
            "reminderMinutesBeforeStart": 15,
            "categories": ["Red category"],
            "lastModifiedDateTime": "2025-02-01T10:00:00Z",
            "@odata.etag": "W/\"abc\"",
            "singleValueExtendedProperties": [
                {"id": property_id(), "value": "a-2"}
            ]
        }));
        assert_eq!(event.start, Utc.with_ymd_and_hms(2025, 2, 10, 14, 0, 0).unwrap());
        assert_eq!(event.timezone, "America/Los_Angeles");
        assert_eq!(event.description.as_deref(), Some("Room 4"));
        assert_eq!(event.reminders, vec![Reminder::popup(15)]);
        assert_eq!(event.color, Some(EventColor::Red));
        assert_eq!(event.local_id.as_deref(), Some("a-2"));
        assert_eq!(event.etag.as_deref(), Some("W/\"abc\""));
    }

    #[test]
    fn all_day_takes_the_date_part() {
        let event = parse(json!({
            "id": "AAMk2",
            "subject": "Reading week",
            "start": {"dateTime": "2025-03-01T00:00:00.0000000", "timeZone": "UTC"},
            "end": {"dateTime": "2025-03-08T00:00:00.0000000", "timeZone": "UTC"},
            "isAllDay": true,
            "isCancelled": true
        }));
        assert!(event.all_day);
        assert!(event.is_cancelled());
        assert_eq!(event.end, Utc.with_ymd_and_hms(2025, 3, 8, 0, 0, 0).unwrap());
    }

    #[test]
    fn body_carries_single_reminder_and_property() {
        let mut event = parse(json!({
            "id": "AAMk3",
            "subject": "Lab",
            "start": {"dateTime": "2025-02-11T08:00:00", "timeZone": "UTC"},
            "end": {"dateTime": "2025-02-11T09:00:00", "timeZone": "UTC"}
        }));
        event.timezone = "Asia/Tokyo".into();
        event.reminders = vec![Reminder::popup(1440), Reminder::popup(60)];
        event.recurrence = Some(RecurrenceRule::new(Frequency::Weekly));
        event.local_id = Some("a-3".into());

        let body = to_graph(&event).unwrap();
        assert_eq!(body["start"]["dateTime"], "2025-02-11T17:00:00");
        assert_eq!(body["reminderMinutesBeforeStart"], 60);
        assert_eq!(body["isReminderOn"], true);
        assert_eq!(body["recurrence"]["pattern"]["daysOfWeek"][0], "tuesday");
        assert_eq!(body["singleValueExtendedProperties"][0]["value"], "a-3");
    }
}
