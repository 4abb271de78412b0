//! Remote calendar adapter (Google Calendar API v3).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::auth::{ServiceAccountKey, TokenProvider};
use crate::config::Config;
use crate::models::EventDraft;

const CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";

/// Coarse classification of a remote calendar failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarErrorKind {
    NotFound,
    PermissionDenied,
    Transient,
    Other,
}

/// Error returned by every remote calendar operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarError {
    pub kind: CalendarErrorKind,
    pub message: String,
}

impl CalendarError {
    pub fn new(kind: CalendarErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify an HTTP failure from the Calendar API.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let kind = match status.as_u16() {
            404 | 410 => CalendarErrorKind::NotFound,
            401 | 403 => CalendarErrorKind::PermissionDenied,
            429 | 500..=599 => CalendarErrorKind::Transient,
            _ => CalendarErrorKind::Other,
        };
        Self::new(kind, format!("{}: {}", status, body))
    }

    /// Text suitable for staff-facing replies.
    pub fn user_message(&self) -> String {
        match self.kind {
            CalendarErrorKind::NotFound => {
                "Googleカレンダーが見つかりません。カレンダーIDと共有設定を確認してください。".to_string()
            }
            CalendarErrorKind::PermissionDenied => {
                "Googleカレンダーへのアクセスが拒否されました。サービスアカウントの権限を確認してください。".to_string()
            }
            CalendarErrorKind::Transient | CalendarErrorKind::Other => {
                format!("Googleカレンダーとの通信に失敗しました: {}", self.message)
            }
        }
    }
}

impl fmt::Display for CalendarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CalendarError {}

impl From<reqwest::Error> for CalendarError {
    fn from(err: reqwest::Error) -> Self {
        let kind = match err.status() {
            Some(status) => CalendarError::from_status(status, "").kind,
            None => CalendarErrorKind::Transient,
        };
        CalendarError::new(kind, err.to_string())
    }
}

pub type CalendarResult<T> = std::result::Result<T, CalendarError>;

/// An event resource owned by the remote calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEvent {
    pub id: String,
    pub summary: String,
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
}

/// Event content sent to the remote calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEventPayload {
    pub summary: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
}

impl RemoteEventPayload {
    /// Title is the event name; description lists the role assignments then the comment.
    pub fn from_draft(draft: &EventDraft) -> Self {
        let mut lines = draft.roles.summary_lines();
        if !draft.comment.is_empty() {
            lines.push(format!("備考: {}", draft.comment));
        }
        Self {
            summary: draft.event_name.clone(),
            description: lines.join("\n"),
            start: draft.start_time,
            end: draft.end_time,
            all_day: false,
        }
    }
}

/// Filters for listing remote events.
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub time_min: DateTime<Utc>,
    pub time_max: DateTime<Utc>,
    /// Free-text filter
    pub text: Option<String>,
}

/// Operations against a single named remote calendar.
#[async_trait]
pub trait RemoteCalendar: Send + Sync {
    async fn list(&self, query: &EventQuery) -> CalendarResult<Vec<RemoteEvent>>;
    async fn get(&self, id: &str) -> CalendarResult<RemoteEvent>;
    async fn insert(&self, payload: &RemoteEventPayload) -> CalendarResult<RemoteEvent>;
    async fn update(&self, id: &str, payload: &RemoteEventPayload) -> CalendarResult<RemoteEvent>;
    async fn delete(&self, id: &str) -> CalendarResult<()>;
}

/// Google Calendar event from API
#[derive(Debug, Deserialize)]
struct GoogleCalendarEvent {
    id: String,
    summary: Option<String>,
    description: Option<String>,
    start: GoogleEventTime,
    end: GoogleEventTime,
    status: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
struct GoogleEventTime {
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<String>,
}

impl GoogleEventTime {
    fn from_instant(at: DateTime<Utc>, all_day: bool) -> Self {
        if all_day {
            Self {
                date_time: None,
                date: Some(at.date_naive().format("%Y-%m-%d").to_string()),
            }
        } else {
            Self {
                date_time: Some(at.to_rfc3339()),
                date: None,
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleCalendarListResponse {
    items: Option<Vec<GoogleCalendarEvent>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// Request body for insert/update
#[derive(Debug, Serialize)]
struct GoogleEventBody<'a> {
    summary: &'a str,
    description: &'a str,
    start: GoogleEventTime,
    end: GoogleEventTime,
}

impl<'a> From<&'a RemoteEventPayload> for GoogleEventBody<'a> {
    fn from(payload: &'a RemoteEventPayload) -> Self {
        Self {
            summary: &payload.summary,
            description: &payload.description,
            start: GoogleEventTime::from_instant(payload.start, payload.all_day),
            end: GoogleEventTime::from_instant(payload.end, payload.all_day),
        }
    }
}

/// Parse Google event time to DateTime<Utc>
fn parse_event_time(time: &GoogleEventTime) -> CalendarResult<(DateTime<Utc>, bool)> {
    if let Some(date_time) = &time.date_time {
        let dt = DateTime::parse_from_rfc3339(date_time).map_err(|e| {
            CalendarError::new(CalendarErrorKind::Other, format!("Invalid datetime: {}", e))
        })?;
        Ok((dt.with_timezone(&Utc), false))
    } else if let Some(date) = &time.date {
        let naive = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|e| {
            CalendarError::new(CalendarErrorKind::Other, format!("Invalid date: {}", e))
        })?;
        Ok((naive.and_time(chrono::NaiveTime::MIN).and_utc(), true))
    } else {
        Err(CalendarError::new(CalendarErrorKind::Other, "Event has no start time"))
    }
}

impl TryFrom<GoogleCalendarEvent> for RemoteEvent {
    type Error = CalendarError;

    fn try_from(event: GoogleCalendarEvent) -> CalendarResult<Self> {
        let (start, all_day) = parse_event_time(&event.start)?;
        let (end, _) = parse_event_time(&event.end)?;
        Ok(Self {
            id: event.id,
            summary: event.summary.unwrap_or_default(),
            description: event.description,
            start,
            end,
            all_day,
        })
    }
}

/// Google Calendar client authenticated with a service account.
pub struct GoogleCalendar {
    http_client: reqwest::Client,
    tokens: TokenProvider,
    calendar_id: String,
}

impl GoogleCalendar {
    pub fn new(http_client: reqwest::Client, tokens: TokenProvider, calendar_id: impl Into<String>) -> Self {
        Self {
            http_client,
            tokens,
            calendar_id: calendar_id.into(),
        }
    }

    /// Client for the configured calendar, authenticated with the service account
    /// found by `ServiceAccountKey::load`.
    pub async fn from_config(config: &Config) -> crate::Result<Self> {
        let http_client = reqwest::Client::new();
        let key = ServiceAccountKey::load().await?;
        let tokens = TokenProvider::new(http_client.clone(), key);
        Ok(Self::new(http_client, tokens, config.google_calendar_id.clone()))
    }

    fn events_url(&self) -> String {
        format!(
            "{}/calendars/{}/events",
            CALENDAR_API,
            urlencoding::encode(&self.calendar_id)
        )
    }

    fn event_url(&self, id: &str) -> String {
        format!("{}/{}", self.events_url(), urlencoding::encode(id))
    }

    async fn read_event(response: reqwest::Response) -> CalendarResult<RemoteEvent> {
        let response = check_status(response).await?;
        let event: GoogleCalendarEvent = response.json().await.map_err(|e| {
            CalendarError::new(CalendarErrorKind::Other, format!("Failed to parse event: {}", e))
        })?;
        RemoteEvent::try_from(event)
    }
}

async fn check_status(response: reqwest::Response) -> CalendarResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(CalendarError::from_status(status, &body))
}

#[async_trait]
impl RemoteCalendar for GoogleCalendar {
    async fn list(&self, query: &EventQuery) -> CalendarResult<Vec<RemoteEvent>> {
        let access_token = self.tokens.access_token().await?;
        let mut all_events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}?timeMin={}&timeMax={}&singleEvents=true&orderBy=startTime&maxResults=250",
                self.events_url(),
                urlencoding::encode(&query.time_min.to_rfc3339()),
                urlencoding::encode(&query.time_max.to_rfc3339())
            );
            if let Some(text) = &query.text {
                url.push_str(&format!("&q={}", urlencoding::encode(text)));
            }
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
            }

            let response = self
                .http_client
                .get(&url)
                .bearer_auth(&access_token)
                .send()
                .await?;
            let response = check_status(response).await?;

            let page: GoogleCalendarListResponse = response.json().await.map_err(|e| {
                CalendarError::new(
                    CalendarErrorKind::Other,
                    format!("Failed to parse calendar response: {}", e),
                )
            })?;

            for item in page.items.unwrap_or_default() {
                if item.status.as_deref() == Some("cancelled") {
                    continue;
                }
                let id = item.id.clone();
                match RemoteEvent::try_from(item) {
                    Ok(event) => all_events.push(event),
                    Err(e) => warn!(remote_id = %id, error = %e, "Skipping unparseable remote event"),
                }
            }

            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(all_events)
    }

    async fn get(&self, id: &str) -> CalendarResult<RemoteEvent> {
        let access_token = self.tokens.access_token().await?;
        let response = self
            .http_client
            .get(self.event_url(id))
            .bearer_auth(&access_token)
            .send()
            .await?;
        Self::read_event(response).await
    }

    async fn insert(&self, payload: &RemoteEventPayload) -> CalendarResult<RemoteEvent> {
        let access_token = self.tokens.access_token().await?;
        let response = self
            .http_client
            .post(self.events_url())
            .bearer_auth(&access_token)
            .json(&GoogleEventBody::from(payload))
            .send()
            .await?;
        let event = Self::read_event(response).await?;
        info!(remote_id = %event.id, summary = %event.summary, "Created remote event");
        Ok(event)
    }

    async fn update(&self, id: &str, payload: &RemoteEventPayload) -> CalendarResult<RemoteEvent> {
        let access_token = self.tokens.access_token().await?;
        let response = self
            .http_client
            .put(self.event_url(id))
            .bearer_auth(&access_token)
            .json(&GoogleEventBody::from(payload))
            .send()
            .await?;
        Self::read_event(response).await
    }

    async fn delete(&self, id: &str) -> CalendarResult<()> {
        let access_token = self.tokens.access_token().await?;
        let response = self
            .http_client
            .delete(self.event_url(id))
            .bearer_auth(&access_token)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let kind = |code: u16| CalendarError::from_status(StatusCode::from_u16(code).unwrap(), "").kind;
        assert_eq!(kind(404), CalendarErrorKind::NotFound);
        assert_eq!(kind(410), CalendarErrorKind::NotFound);
        assert_eq!(kind(403), CalendarErrorKind::PermissionDenied);
        assert_eq!(kind(401), CalendarErrorKind::PermissionDenied);
        assert_eq!(kind(429), CalendarErrorKind::Transient);
        assert_eq!(kind(503), CalendarErrorKind::Transient);
        assert_eq!(kind(400), CalendarErrorKind::Other);
    }

    #[test]
    fn test_parse_google_event() {
        let json = r#"{
            "id": "abc123",
            "summary": "月次祭",
            "start": {"dateTime": "2024-06-15T10:00:00+09:00"},
            "end": {"dateTime": "2024-06-15T11:30:00+09:00"}
        }"#;
        let event: GoogleCalendarEvent = serde_json::from_str(json).unwrap();
        let remote = RemoteEvent::try_from(event).unwrap();

        assert_eq!(remote.id, "abc123");
        assert_eq!(remote.start.to_rfc3339(), "2024-06-15T01:00:00+00:00");
        assert_eq!(remote.end.to_rfc3339(), "2024-06-15T02:30:00+00:00");
        assert!(!remote.all_day);
    }

    #[test]
    fn test_parse_all_day_event() {
        let time = GoogleEventTime {
            date_time: None,
            date: Some("2024-06-15".to_string()),
        };
        let (start, all_day) = parse_event_time(&time).unwrap();
        assert!(all_day);
        assert_eq!(start.to_rfc3339(), "2024-06-15T00:00:00+00:00");
    }

    #[test]
    fn test_payload_body_uses_datetime() {
        let start = DateTime::parse_from_rfc3339("2024-06-15T01:00:00Z").unwrap().with_timezone(&Utc);
        let payload = RemoteEventPayload {
            summary: "月次祭".to_string(),
            description: "祭主: A".to_string(),
            start,
            end: start + chrono::Duration::hours(1),
            all_day: false,
        };
        let body = serde_json::to_value(GoogleEventBody::from(&payload)).unwrap();

        assert_eq!(body["summary"], "月次祭");
        assert_eq!(body["start"]["dateTime"], "2024-06-15T01:00:00+00:00");
        assert!(body["start"].get("date").is_none());
    }
}
