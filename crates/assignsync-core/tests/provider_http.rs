//! HTTP tests for the Google Calendar and Microsoft Graph adapters against a
//! mock server: paging, normalization, write bodies, token refresh and error
//! mapping.

use std::sync::Arc;

use assignsync_core::model::Frequency;
use assignsync_core::provider::{
    Authenticator, GoogleProvider, MemoryTokenStore, MicrosoftProvider, OAuthConfig,
};
use assignsync_core::provider::oauth::OAuthTokens;
use assignsync_core::{
    CalendarProvider, EventStatus, NormalizedCalendarEvent, ProviderKind, SyncError, TimeWindow,
};
use chrono::{TimeZone, Utc};
use mockito::{Matcher, Server};
use serde_json::json;

const GRAPH_PROPERTY: &str =
    "String {00020329-0000-0000-C000-000000000046} Name assignsync_local_id";

fn tokens(access: &str) -> OAuthTokens {
    OAuthTokens {
        access_token: access.into(),
        refresh_token: Some("refresh-1".into()),
        expires_at: Some(Utc::now().timestamp() + 3600),
        token_type: "Bearer".into(),
        scope: None,
    }
}

fn google(server: &Server, access: &str) -> GoogleProvider {
    let mut config = OAuthConfig::google("cid", "secret", 0);
    config.token_url = format!("{}/token", server.url());
    let store = Arc::new(MemoryTokenStore::with_tokens(&config.service_name, tokens(access)));
    let auth = Authenticator::new(ProviderKind::Google, config, store);
    GoogleProvider::new(auth).with_base_url(&server.url())
}

fn microsoft(server: &Server) -> MicrosoftProvider {
    let config = OAuthConfig::microsoft("cid", "common", 0);
    let store = Arc::new(MemoryTokenStore::with_tokens(&config.service_name, tokens("tok")));
    let auth = Authenticator::new(ProviderKind::Microsoft, config, store);
    MicrosoftProvider::new(auth).with_base_url(&server.url())
}

fn window() -> TimeWindow {
    TimeWindow::new(
        Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).unwrap(),
    )
    .unwrap()
}

fn essay_event(provider: ProviderKind) -> NormalizedCalendarEvent {
    let start = Utc.with_ymd_and_hms(2026, 11, 2, 9, 0, 0).unwrap();
    NormalizedCalendarEvent {
        id: String::new(),
        provider,
        calendar_id: "primary".into(),
        title: "CS101: Essay".into(),
        description: Some("Two pages".into()),
        location: None,
        start,
        end: start + chrono::Duration::hours(1),
        all_day: false,
        timezone: "UTC".into(),
        recurrence: None,
        reminders: Vec::new(),
        color: None,
        status: EventStatus::Confirmed,
        updated_at: start,
        etag: None,
        local_id: Some("item-1".into()),
    }
}

#[tokio::test]
async fn test_google_lists_all_pages_and_skips_instances() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("GET", "/calendars/primary/events")
        .match_query(Matcher::Regex("maxResults=250$".into()))
        .match_header("authorization", "Bearer tok")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "timeZone": "America/New_York",
                "nextPageToken": "p2",
                "items": [
                    {
                        "id": "ev-1",
                        "status": "confirmed",
                        "summary": "CS101: Essay",
                        "start": {"dateTime": "2026-11-02T09:00:00-05:00"},
                        "end": {"dateTime": "2026-11-02T10:00:00-05:00"},
                        "updated": "2026-10-20T12:00:00Z",
                        "etag": "\"100\"",
                        "reminders": {"useDefault": false, "overrides": [{"method": "popup", "minutes": 30}]},
                        "extendedProperties": {"private": {"assignsync_local_id": "item-1"}}
                    },
                    {
                        "id": "ev-2_20261109",
                        "recurringEventId": "ev-2",
                        "summary": "Moved lecture",
                        "start": {"dateTime": "2026-11-09T09:00:00Z"},
                        "end": {"dateTime": "2026-11-09T10:00:00Z"}
                    }
                ]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("GET", "/calendars/primary/events")
        .match_query(Matcher::Regex("pageToken=p2$".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"items": [{"id": "gone", "status": "cancelled"}]}).to_string())
        .expect(1)
        .create_async()
        .await;

    let events = google(&server, "tok")
        .list_events("primary", &window())
        .await
        .unwrap();

    assert_eq!(events.len(), 2);
    let essay = &events[0];
    assert_eq!(essay.id, "ev-1");
    assert_eq!(essay.start, Utc.with_ymd_and_hms(2026, 11, 2, 14, 0, 0).unwrap());
    assert_eq!(essay.timezone, "America/New_York");
    assert_eq!(essay.local_id.as_deref(), Some("item-1"));
    assert_eq!(essay.reminders.len(), 1);
    assert_eq!(essay.etag.as_deref(), Some("\"100\""));
    assert!(events[1].is_cancelled());

    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn test_google_missing_event_is_none_and_missing_calendar_is_an_error() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/calendars/primary/events/missing")
        .with_status(404)
        .with_body(r#"{"error": {"code": 404, "message": "Not Found"}}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/calendars/nope/events")
        .match_query(Matcher::Any)
        .with_status(404)
        .create_async()
        .await;

    let provider = google(&server, "tok");
    assert!(provider.get_event("primary", "missing").await.unwrap().is_none());
    assert!(matches!(
        provider.list_events("nope", &window()).await,
        Err(SyncError::CalendarNotFound(id)) if id == "nope"
    ));
}

#[tokio::test]
async fn test_google_create_sends_local_id_property() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/calendars/primary/events")
        .match_body(Matcher::PartialJson(json!({
            "summary": "CS101: Essay",
            "description": "Two pages",
            "start": {"dateTime": "2026-11-02T09:00:00", "timeZone": "UTC"},
            "extendedProperties": {"private": {"assignsync_local_id": "item-1"}}
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": "new-1",
                "status": "confirmed",
                "summary": "CS101: Essay",
                "description": "Two pages",
                "start": {"dateTime": "2026-11-02T09:00:00Z", "timeZone": "UTC"},
                "end": {"dateTime": "2026-11-02T10:00:00Z", "timeZone": "UTC"},
                "updated": "2026-10-20T12:00:00Z",
                "etag": "\"1\"",
                "extendedProperties": {"private": {"assignsync_local_id": "item-1"}}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let created = google(&server, "tok")
        .create_event("primary", &essay_event(ProviderKind::Google))
        .await
        .unwrap();
    assert_eq!(created.id, "new-1");
    assert_eq!(created.local_id.as_deref(), Some("item-1"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_google_refreshes_token_after_401() {
    let mut server = Server::new_async().await;
    let refresh = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "fresh", "expires_in": 3600}"#)
        .expect(1)
        .create_async()
        .await;
    server
        .mock("DELETE", "/calendars/primary/events/ev-1")
        .match_header("authorization", "Bearer stale")
        .with_status(401)
        .create_async()
        .await;
    let retried = server
        .mock("DELETE", "/calendars/primary/events/ev-1")
        .match_header("authorization", "Bearer fresh")
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    google(&server, "stale")
        .delete_event("primary", "ev-1")
        .await
        .unwrap();
    refresh.assert_async().await;
    retried.assert_async().await;
}

#[tokio::test]
async fn test_google_error_statuses_map_to_sync_errors() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/calendars/primary/events/busy")
        .with_status(429)
        .with_header("retry-after", "7")
        .create_async()
        .await;
    server
        .mock("GET", "/calendars/primary/events/down")
        .with_status(503)
        .with_body(r#"{"error": {"message": "Backend Error"}}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/calendars/primary/events/bad")
        .with_status(400)
        .with_body(r#"{"error": {"message": "Invalid start time"}}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/calendars/primary/events/quota")
        .with_status(403)
        .with_body(
            r#"{"error": {"code": 403, "message": "Rate Limit Exceeded",
                "errors": [{"domain": "usageLimits", "reason": "rateLimitExceeded"}]}}"#,
        )
        .create_async()
        .await;
    server
        .mock("GET", "/calendars/primary/events/private")
        .with_status(403)
        .with_body(
            r#"{"error": {"code": 403, "message": "Forbidden",
                "errors": [{"domain": "global", "reason": "forbidden"}]}}"#,
        )
        .create_async()
        .await;
    server
        .mock("DELETE", "/calendars/primary/events/already-gone")
        .with_status(410)
        .create_async()
        .await;

    let provider = google(&server, "tok");
    let busy = provider.get_event("primary", "busy").await.unwrap_err();
    assert!(matches!(busy, SyncError::RateLimited(7)));
    assert!(busy.is_retryable());

    let down = provider.get_event("primary", "down").await.unwrap_err();
    assert!(matches!(&down, SyncError::Unavailable(m) if m == "Backend Error"));
    assert!(down.is_retryable());

    let bad = provider.get_event("primary", "bad").await.unwrap_err();
    assert!(matches!(&bad, SyncError::Api { status: 400, message } if message == "Invalid start time"));
    assert!(!bad.is_retryable());

    let quota = provider.get_event("primary", "quota").await.unwrap_err();
    assert!(matches!(quota, SyncError::RateLimited(60)));
    assert!(quota.is_retryable());

    let private = provider.get_event("primary", "private").await.unwrap_err();
    assert!(matches!(private, SyncError::Api { status: 403, .. }));
    assert!(!private.is_retryable());

    provider.delete_event("primary", "already-gone").await.unwrap();
}

#[tokio::test]
async fn test_graph_lists_calendar_view_and_fetches_series_masters() {
    let mut server = Server::new_async().await;
    let view = server
        .mock("GET", "/me/calendar/calendarView")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("$top".into(), "100".into()),
            Matcher::Regex("startDateTime=".into()),
        ]))
        .match_header("prefer", Matcher::Regex("outlook.timezone".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "value": [
                    {
                        "id": "g-1",
                        "type": "singleInstance",
                        "subject": "CS101: Essay",
                        "body": {"contentType": "text", "content": " Two pages \r\n"},
                        "start": {"dateTime": "2026-11-02T09:00:00.0000000", "timeZone": "UTC"},
                        "end": {"dateTime": "2026-11-02T10:00:00.0000000", "timeZone": "UTC"},
                        "originalStartTimeZone": "Pacific Standard Time",
                        "isReminderOn": true,
                        "reminderMinutesBeforeStart": 15,
                        "lastModifiedDateTime": "2026-10-20T12:00:00Z",
                        "@odata.etag": "W/\"abc\"",
                        "singleValueExtendedProperties": [{"id": GRAPH_PROPERTY, "value": "item-1"}]
                    },
                    {
                        "id": "occ-1",
                        "type": "occurrence",
                        "seriesMasterId": "master-1",
                        "start": {"dateTime": "2026-11-03T09:00:00.0000000", "timeZone": "UTC"},
                        "end": {"dateTime": "2026-11-03T10:00:00.0000000", "timeZone": "UTC"}
                    }
                ]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let master = server
        .mock("GET", "/me/events/master-1")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": "master-1",
                "type": "seriesMaster",
                "subject": "CS101 Lecture",
                "start": {"dateTime": "2026-10-06T09:00:00.0000000", "timeZone": "UTC"},
                "end": {"dateTime": "2026-10-06T10:00:00.0000000", "timeZone": "UTC"},
                "recurrence": {
                    "pattern": {"type": "weekly", "interval": 1, "daysOfWeek": ["tuesday"]},
                    "range": {"type": "numbered", "startDate": "2026-10-06", "numberOfOccurrences": 12}
                }
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let events = microsoft(&server)
        .list_events("primary", &window())
        .await
        .unwrap();

    assert_eq!(events.len(), 2);
    let essay = &events[0];
    assert_eq!(essay.description.as_deref(), Some("Two pages"));
    assert_eq!(essay.timezone, "America/Los_Angeles");
    assert_eq!(essay.local_id.as_deref(), Some("item-1"));
    assert_eq!(essay.reminders.len(), 1);

    let series = &events[1];
    assert_eq!(series.id, "master-1");
    let rule = series.recurrence.as_ref().unwrap();
    assert_eq!(rule.frequency, Frequency::Weekly);
    assert_eq!(rule.count, Some(12));

    view.assert_async().await;
    master.assert_async().await;
}

#[tokio::test]
async fn test_graph_update_patches_and_clears_tag() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PATCH", "/me/events/g-1")
        .match_body(Matcher::PartialJson(json!({
            "subject": "CS101: Essay",
            "isAllDay": false,
            "singleValueExtendedProperties": [{"id": GRAPH_PROPERTY, "value": ""}]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": "g-1",
                "subject": "CS101: Essay",
                "start": {"dateTime": "2026-11-02T09:00:00.0000000", "timeZone": "UTC"},
                "end": {"dateTime": "2026-11-02T10:00:00.0000000", "timeZone": "UTC"},
                "lastModifiedDateTime": "2026-10-21T08:00:00Z"
            })
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("DELETE", "/me/events/g-missing")
        .with_status(404)
        .create_async()
        .await;

    let provider = microsoft(&server);
    let mut event = essay_event(ProviderKind::Microsoft);
    event.id = "g-1".into();
    event.local_id = None;
    let updated = provider.update_event("primary", &event).await.unwrap();
    assert_eq!(updated.local_id, None);
    assert_eq!(
        updated.updated_at,
        Utc.with_ymd_and_hms(2026, 10, 21, 8, 0, 0).unwrap()
    );
    mock.assert_async().await;

    provider.delete_event("primary", "g-missing").await.unwrap();
}
