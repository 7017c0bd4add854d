//! Calendar provider client.
//!
//! Push-channel lifecycle (watch create/stop) and change enumeration via
//! sync tokens. The incremental path paginates on `nextPageToken` and yields
//! a fresh `nextSyncToken` on the last page; a 410 from the provider
//! surfaces as [`Error::SyncTokenExpired`] so callers can fall back to a
//! windowed full sync.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Page size used for both full and incremental sync.
pub const SYNC_PAGE_SIZE: u32 = 250;

/// Window for full syncs when no usable token exists.
pub const FULL_SYNC_WINDOW_DAYS: i64 = 30;

/// Result of creating a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchInfo {
    /// Provider-issued resource identifier for the watched calendar.
    pub resource_id: String,
    /// Channel expiry, milliseconds since epoch.
    pub expiration_ms: Option<i64>,
}

/// Where to start enumerating changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncCursor {
    /// Incremental sync from a provider-issued token.
    Token(String),
    /// Full sync over the trailing window.
    Window {
        /// How many days back to enumerate.
        days: i64,
    },
}

/// One page request against the events feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Cursor for this enumeration.
    pub cursor: SyncCursor,
    /// Continuation token from the previous page.
    pub page_token: Option<String>,
    /// Maximum events per page.
    pub page_size: u32,
}

impl SyncRequest {
    /// Starts an incremental enumeration from a sync token.
    #[must_use]
    pub fn incremental(sync_token: impl Into<String>) -> Self {
        Self {
            cursor: SyncCursor::Token(sync_token.into()),
            page_token: None,
            page_size: SYNC_PAGE_SIZE,
        }
    }

    /// Starts a full enumeration over the default trailing window.
    #[must_use]
    pub fn full_window() -> Self {
        Self {
            cursor: SyncCursor::Window {
                days: FULL_SYNC_WINDOW_DAYS,
            },
            page_token: None,
            page_size: SYNC_PAGE_SIZE,
        }
    }

    /// Continues this enumeration at the given page token.
    #[must_use]
    pub fn next_page(mut self, page_token: impl Into<String>) -> Self {
        self.page_token = Some(page_token.into());
        self
    }
}

/// An attendee on a calendar event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttendee {
    /// Attendee email.
    pub email: String,
    /// Display name, when the provider knows one.
    pub display_name: Option<String>,
    /// True when the attendee is the calendar owner.
    pub is_self: bool,
    /// True for meeting rooms and other resources.
    pub is_resource: bool,
}

/// A calendar event as returned by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Provider event identifier.
    pub id: String,
    /// Provider status (`confirmed`, `cancelled`, ...).
    pub status: Option<String>,
    /// Event title.
    pub summary: Option<String>,
    /// Event description.
    pub description: Option<String>,
    /// Start time, when the event has one.
    pub start: Option<DateTime<Utc>>,
    /// Attendee list.
    pub attendees: Vec<EventAttendee>,
}

/// One page of enumerated events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventsPage {
    /// Events on this page.
    pub events: Vec<CalendarEvent>,
    /// Continuation token; `None` on the last page.
    pub next_page_token: Option<String>,
    /// Fresh sync token; present only on the last page.
    pub next_sync_token: Option<String>,
}

/// Calendar provider interface.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// Creates a push watch on a calendar.
    async fn create_watch(
        &self,
        calendar_id: &str,
        channel_id: &str,
        address: &str,
        channel_token: Option<&str>,
    ) -> Result<WatchInfo>;

    /// Stops a push channel. The channel may already be expired on the
    /// provider side; callers treat failures as best-effort.
    async fn stop_watch(&self, channel_id: &str, resource_id: &str) -> Result<()>;

    /// Enumerates one page of events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SyncTokenExpired`] when the incremental cursor is
    /// gone and the caller must fall back to a full window.
    async fn list_events(&self, calendar_id: &str, request: &SyncRequest) -> Result<EventsPage>;
}

// ============================================================================
// HTTP client (Google Calendar v3 shape)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WatchRequest<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    channel_type: &'a str,
    address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchResponse {
    resource_id: String,
    expiration: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StopRequest<'a> {
    id: &'a str,
    resource_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsResponse {
    #[serde(default)]
    items: Vec<RawEvent>,
    next_page_token: Option<String>,
    next_sync_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(default)]
    id: String,
    status: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    start: Option<RawEventTime>,
    #[serde(default)]
    attendees: Vec<RawAttendee>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEventTime {
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAttendee {
    #[serde(default)]
    email: String,
    display_name: Option<String>,
    #[serde(rename = "self", default)]
    is_self: bool,
    #[serde(default)]
    resource: bool,
}

impl From<RawEvent> for CalendarEvent {
    fn from(raw: RawEvent) -> Self {
        let start = raw.start.and_then(|s| {
            s.date_time
                .as_deref()
                .and_then(|dt| DateTime::parse_from_rfc3339(dt).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|| {
                    s.date.as_deref().and_then(|d| {
                        chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d")
                            .ok()
                            .and_then(|d| d.and_hms_opt(0, 0, 0))
                            .map(|dt| dt.and_utc())
                    })
                })
        });

        Self {
            id: raw.id,
            status: raw.status,
            summary: raw.summary,
            description: raw.description,
            start,
            attendees: raw
                .attendees
                .into_iter()
                .map(|a| EventAttendee {
                    email: a.email,
                    display_name: a.display_name,
                    is_self: a.is_self,
                    is_resource: a.resource,
                })
                .collect(),
        }
    }
}

/// HTTP calendar client.
pub struct HttpCalendarClient {
    base_url: String,
    access_token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpCalendarClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCalendarClient")
            .field("base_url", &self.base_url)
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpCalendarClient {
    /// Default production API base.
    pub const DEFAULT_BASE_URL: &'static str = "https://www.googleapis.com/calendar/v3";

    /// Creates a new client against the default API base.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(access_token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(Self::DEFAULT_BASE_URL, access_token)
    }

    /// Creates a new client against a custom API base (tests, proxies).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn with_base_url(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            client,
        })
    }
}

#[async_trait]
impl CalendarProvider for HttpCalendarClient {
    async fn create_watch(
        &self,
        calendar_id: &str,
        channel_id: &str,
        address: &str,
        channel_token: Option<&str>,
    ) -> Result<WatchInfo> {
        let url = format!("{}/calendars/{}/events/watch", self.base_url, calendar_id);
        let body = WatchRequest {
            id: channel_id,
            channel_type: "web_hook",
            address,
            token: channel_token,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), message));
        }

        let body: WatchResponse = response
            .json()
            .await
            .map_err(|e| Error::decode(format!("watch response: {e}")))?;

        Ok(WatchInfo {
            resource_id: body.resource_id,
            expiration_ms: body.expiration.and_then(|e| e.parse().ok()),
        })
    }

    async fn stop_watch(&self, channel_id: &str, resource_id: &str) -> Result<()> {
        let url = format!("{}/channels/stop", self.base_url);
        let body = StopRequest {
            id: channel_id,
            resource_id,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), message));
        }
        Ok(())
    }

    async fn list_events(&self, calendar_id: &str, request: &SyncRequest) -> Result<EventsPage> {
        let url = format!("{}/calendars/{}/events", self.base_url, calendar_id);
        let page_size = request.page_size.to_string();

        let mut query: Vec<(&str, String)> = vec![
            ("maxResults", page_size),
            ("singleEvents", "true".to_string()),
        ];

        match &request.cursor {
            SyncCursor::Token(token) => query.push(("syncToken", token.clone())),
            SyncCursor::Window { days } => {
                let time_min = Utc::now() - chrono::Duration::days(*days);
                query.push(("timeMin", time_min.to_rfc3339()));
            }
        }
        if let Some(token) = &request.page_token {
            query.push(("pageToken", token.clone()));
        }

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 410 {
            return Err(Error::SyncTokenExpired);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), message));
        }

        let body: EventsResponse = response
            .json()
            .await
            .map_err(|e| Error::decode(format!("events response: {e}")))?;

        let next_page_token = body.next_page_token.clone();
        let next_sync_token = body.next_sync_token.clone();
        Ok(EventsPage {
            events: body.events_into(),
            next_page_token,
            next_sync_token,
        })
    }
}

impl EventsResponse {
    fn events_into(self) -> Vec<CalendarEvent> {
        self.items.into_iter().map(CalendarEvent::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_request_builders() {
        let incremental = SyncRequest::incremental("T1");
        assert_eq!(incremental.cursor, SyncCursor::Token("T1".into()));
        assert_eq!(incremental.page_size, SYNC_PAGE_SIZE);

        let full = SyncRequest::full_window().next_page("p2");
        assert_eq!(
            full.cursor,
            SyncCursor::Window {
                days: FULL_SYNC_WINDOW_DAYS
            }
        );
        assert_eq!(full.page_token.as_deref(), Some("p2"));
    }

    #[test]
    fn raw_event_conversion_parses_times() {
        let raw = RawEvent {
            id: "evt-1".into(),
            status: Some("confirmed".into()),
            summary: Some("Acme — Jane [deal]".into()),
            description: None,
            start: Some(RawEventTime {
                date_time: Some("2025-01-02T03:04:05Z".into()),
                date: None,
            }),
            attendees: vec![RawAttendee {
                email: "jane@acme.dev".into(),
                display_name: Some("Jane".into()),
                is_self: false,
                resource: false,
            }],
        };

        let event = CalendarEvent::from(raw);
        assert_eq!(event.id, "evt-1");
        assert!(event.start.is_some());
        assert_eq!(event.attendees.len(), 1);
        assert!(!event.attendees[0].is_self);
    }

    #[test]
    fn all_day_events_parse_date_only() {
        let raw = RawEvent {
            id: "evt-2".into(),
            status: None,
            summary: None,
            description: None,
            start: Some(RawEventTime {
                date_time: None,
                date: Some("2025-01-02".into()),
            }),
            attendees: vec![],
        };

        let event = CalendarEvent::from(raw);
        assert!(event.start.is_some());
    }
}
