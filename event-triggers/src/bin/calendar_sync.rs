//! Calendar Sync Lambda - Reconciles local events with Google Calendar.
//!
//! This Lambda runs on a schedule (EventBridge) and performs one of two passes:
//! - `sync`: push every local event in the current and next month that has no
//!   remote id, or whose last sync failed
//! - `cleanup`: delete duplicate remote events sharing title, start and end

use chrono::Utc;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use shared::db::create_pool;
use shared::sync::{month_window, BulkSyncReport, CleanupReport};
use shared::{Config, EventStore, GoogleCalendar, PgEventStore, SyncBridge};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Pass to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Operation {
    #[default]
    Sync,
    Cleanup,
}

/// EventBridge scheduled event
#[derive(Debug, Deserialize)]
struct ScheduledEvent {
    #[serde(default)]
    operation: Operation,
}

/// Sync response
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SyncResponse {
    Sync(BulkSyncReport),
    Cleanup(CleanupReport),
}

/// Application state
struct AppState {
    bridge: SyncBridge,
    config: Config,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let pool = create_pool(&config).await?;

        let events: Arc<dyn EventStore> = Arc::new(PgEventStore::new(pool));
        let calendar = Arc::new(GoogleCalendar::from_config(&config).await?);
        let bridge = SyncBridge::from_config(&config, calendar, events);

        Ok(Self { bridge, config })
    }
}

async fn handler(state: Arc<AppState>, event: LambdaEvent<ScheduledEvent>) -> Result<SyncResponse, Error> {
    let now = Utc::now();

    match event.payload.operation {
        Operation::Sync => {
            let (from, to) = month_window(now, &state.config.schedule.offset);
            info!(from = %from, to = %to, "Starting calendar sync");

            let report = state.bridge.sync_pending(from, to).await?;
            Ok(SyncResponse::Sync(report))
        }
        Operation::Cleanup => {
            info!("Starting duplicate cleanup");

            let report = state.bridge.cleanup_duplicates(now).await?;
            Ok(SyncResponse::Cleanup(report))
        }
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
