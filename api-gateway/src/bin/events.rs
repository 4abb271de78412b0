//! Events API Lambda - CRUD operations for branch events.
//!
//! Endpoints:
//! - GET /events - List events (optional `from` / `to`)
//! - GET /events/{id} - Get a single event
//! - POST /events - Create an event and push it to Google Calendar
//! - PUT /events/{id} - Update an event and its calendar entry
//! - DELETE /events/{id} - Delete an event and, best effort, its calendar entry
//!
//! Every mutation returns the calendar sync outcome next to the record.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, Response};
use serde::{Deserialize, Serialize};
use shared::db::create_pool;
use shared::http::{error_response, json_response, query_param, ApiResponse};
use shared::models::normalize_assignee;
use shared::{
    or_respond, parse_body, Config, EventDraft, EventRecord, EventStore, GoogleCalendar, PgEventStore,
    RoleAssignments, ScheduleConfig, SyncAction, SyncBridge, SyncOutcome,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use validator::Validate;

/// Default listing window when only one bound is given.
const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Create / update event request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct EventRequest {
    #[validate(length(min = 1, max = 200))]
    event_name: String,
    /// Local date; derived from `startTime` when omitted
    date: Option<NaiveDate>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    #[validate(length(max = 100))]
    officiant: Option<String>,
    #[validate(length(max = 100))]
    sound: Option<String>,
    #[validate(length(max = 100))]
    emcee: Option<String>,
    #[validate(length(max = 100))]
    reception: Option<String>,
    #[validate(length(max = 2000))]
    #[serde(default)]
    comment: String,
}

impl EventRequest {
    fn into_draft(self, schedule: &ScheduleConfig) -> shared::Result<EventDraft> {
        self.validate()
            .map_err(|e| shared::Error::Validation(e.to_string()))?;

        let draft = EventDraft {
            event_name: self.event_name.trim().to_string(),
            date: self
                .date
                .unwrap_or_else(|| schedule.local_date(self.start_time)),
            start_time: self.start_time,
            end_time: self.end_time,
            roles: RoleAssignments {
                officiant: normalize_assignee(self.officiant.as_deref()),
                sound: normalize_assignee(self.sound.as_deref()),
                emcee: normalize_assignee(self.emcee.as_deref()),
                reception: normalize_assignee(self.reception.as_deref()),
            },
            comment: self.comment.trim().to_string(),
        };
        draft.validate()?;
        Ok(draft)
    }
}

/// Result of a create or update
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MutationResponse {
    event: Option<EventRecord>,
    sync: SyncOutcome,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteResponse {
    deleted: bool,
    sync: SyncOutcome,
}

/// Application state
struct AppState {
    events: Arc<dyn EventStore>,
    bridge: SyncBridge,
    schedule: ScheduleConfig,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let pool = create_pool(&config).await?;

        let events: Arc<dyn EventStore> = Arc::new(PgEventStore::new(pool));
        let calendar = Arc::new(GoogleCalendar::from_config(&config).await?);
        let bridge = SyncBridge::from_config(&config, calendar, events.clone());

        Ok(Self {
            events,
            bridge,
            schedule: config.schedule,
        })
    }
}

/// Accepts RFC 3339 instants or plain local dates.
fn parse_bound(raw: &str, schedule: &ScheduleConfig) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|date| schedule.day_start_utc(date))
}

/// Resolve the optional `from` / `to` bounds. `None` means list everything.
fn listing_window(
    from: Option<&str>,
    to: Option<&str>,
    schedule: &ScheduleConfig,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, &'static str> {
    let parse = |raw: Option<&str>, message: &'static str| match raw {
        Some(raw) => parse_bound(raw, schedule).map(Some).ok_or(message),
        None => Ok(None),
    };
    let from = parse(from, "Invalid 'from' parameter")?;
    let to = parse(to, "Invalid 'to' parameter")?;

    let window = Duration::days(DEFAULT_WINDOW_DAYS);
    Ok(match (from, to) {
        (None, None) => None,
        (Some(from), Some(to)) => Some((from, to)),
        (Some(from), None) => Some((from, from + window)),
        (None, Some(to)) => Some((to - window, to)),
    })
}

fn parse_event_id(path: &str) -> Option<Uuid> {
    Uuid::parse_str(path.trim_start_matches("/events/")).ok()
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let method = event.method().as_str();
    let raw_path = event.uri().path();
    // Strip /api stage prefix if present (API Gateway REST API includes stage in path)
    let path = raw_path.strip_prefix("/api").unwrap_or(raw_path);

    info!("Events request: {} {}", method, path);

    match (method, path) {
        ("GET", "/events") => {
            let from = query_param(&event, "from");
            let to = query_param(&event, "to");

            let records = match listing_window(from.as_deref(), to.as_deref(), &state.schedule) {
                Ok(None) => or_respond!(state.events.list().await),
                Ok(Some((from, to))) => or_respond!(state.events.list_between(from, to).await),
                Err(message) => return error_response(400, message),
            };

            json_response(200, &ApiResponse::success(records))
        }

        ("POST", "/events") => {
            let request: EventRequest = parse_body!(event.body());
            let draft = or_respond!(request.into_draft(&state.schedule));

            let record = or_respond!(state.events.insert(&draft).await);
            info!(event_id = %record.id, event_name = %draft.event_name, "Created event");

            let sync = state.bridge.sync(SyncAction::Create, &draft, record.id).await;
            let event = or_respond!(state.events.get(record.id).await);

            json_response(201, &ApiResponse::success(MutationResponse { event, sync }))
        }

        _ if path.starts_with("/events/") && method == "GET" => {
            let Some(id) = parse_event_id(path) else {
                return error_response(400, "Invalid event ID");
            };

            match or_respond!(state.events.get(id).await) {
                Some(record) => json_response(200, &ApiResponse::success(record)),
                None => error_response(404, "Event not found"),
            }
        }

        _ if path.starts_with("/events/") && method == "PUT" => {
            let Some(id) = parse_event_id(path) else {
                return error_response(400, "Invalid event ID");
            };

            let request: EventRequest = parse_body!(event.body());
            let draft = or_respond!(request.into_draft(&state.schedule));

            if or_respond!(state.events.update(id, &draft).await).is_none() {
                return error_response(404, "Event not found");
            }
            info!(event_id = %id, "Updated event");

            let sync = state.bridge.sync(SyncAction::Update, &draft, id).await;
            let event = or_respond!(state.events.get(id).await);

            json_response(200, &ApiResponse::success(MutationResponse { event, sync }))
        }

        _ if path.starts_with("/events/") && method == "DELETE" => {
            let Some(id) = parse_event_id(path) else {
                return error_response(400, "Invalid event ID");
            };

            let Some(record) = or_respond!(state.events.get(id).await) else {
                return error_response(404, "Event not found");
            };

            // Remote first: the local row holds the remote id.
            let sync = state.bridge.sync(SyncAction::Delete, &record.draft, id).await;
            let deleted = or_respond!(state.events.delete(id).await);
            info!(event_id = %id, action_taken = ?sync.action_taken, "Deleted event");

            json_response(200, &ApiResponse::success(DeleteResponse { deleted, sync }))
        }

        _ => error_response(404, "Not found"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);

    run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}
