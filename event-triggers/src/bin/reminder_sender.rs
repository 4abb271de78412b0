//! Reminder Sender Lambda - Pushes day-ahead duty reminders over LINE.
//!
//! Triggered by a scheduler hitting `GET /reminders/run`.
//! Query parameters:
//! - `date` - target local date (`YYYY-MM-DD`, defaults to tomorrow)
//! - `dryRun` - when `true`, count recipients without pushing

use chrono::{NaiveDate, Utc};
use lambda_http::{run, service_fn, Body, Error, Request, Response};
use shared::db::create_pool;
use shared::http::{error_response, json_response, query_param, ApiResponse};
use shared::line::LineClient;
use shared::reminders::{tomorrow, ReminderJob};
use shared::{or_respond, Config, LineConfig, PgEventStore, PgSettingsStore, ScheduleConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state
struct AppState {
    job: ReminderJob,
    schedule: ScheduleConfig,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let line = LineConfig::from_env()?;
        let pool = create_pool(&config).await?;

        let job = ReminderJob::new(
            Arc::new(PgEventStore::new(pool.clone())),
            Arc::new(PgSettingsStore::new(pool)),
            Arc::new(LineClient::new(reqwest::Client::new(), line.channel_access_token)),
            config.schedule.clone(),
        );

        Ok(Self {
            job,
            schedule: config.schedule,
        })
    }
}

/// Target date from `?date=`, or tomorrow in the branch's time zone.
fn target_date(raw: Option<&str>, schedule: &ScheduleConfig) -> Option<NaiveDate> {
    match raw {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok(),
        None => Some(tomorrow(schedule, Utc::now())),
    }
}

fn is_dry_run(raw: Option<&str>) -> bool {
    matches!(raw.map(str::trim), Some(v) if v.eq_ignore_ascii_case("true") || v == "1")
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let method = event.method().as_str();
    let raw_path = event.uri().path();
    // Strip /api stage prefix if present (API Gateway REST API includes stage in path)
    let path = raw_path.strip_prefix("/api").unwrap_or(raw_path);

    match (method, path) {
        ("GET", "/reminders/run") => {
            let Some(date) = target_date(query_param(&event, "date").as_deref(), &state.schedule) else {
                return error_response(400, "Invalid 'date' parameter, expected YYYY-MM-DD");
            };
            let dry_run = is_dry_run(query_param(&event, "dryRun").as_deref());

            info!(date = %date, dry_run, "Running reminder job");
            let report = or_respond!(state.job.run(date, dry_run).await);

            json_response(200, &ApiResponse::success(report))
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
