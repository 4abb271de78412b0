//! Shared library for the branch calendar Lambda functions.
//!
//! This crate provides the domain model, stores, the Google Calendar bridge,
//! the LINE conversation engine and the reminder job used by every function.

pub mod auth;
pub mod calendar;
pub mod config;
pub mod conversation;
pub mod db;
pub mod error;
pub mod events;
pub mod http;
pub mod line;
pub mod models;
pub mod reminders;
pub mod secrets;
pub mod settings;
pub mod sync;

#[cfg(test)]
pub(crate) mod fakes;

pub use calendar::{CalendarError, CalendarErrorKind, GoogleCalendar, RemoteCalendar};
pub use config::{Config, LineConfig, ScheduleConfig};
pub use error::{Error, Result};
pub use events::{EventStore, PgEventStore};
pub use http::ApiResponse;
pub use models::{EventDraft, EventRecord, Role, RoleAssignments, SettingsItem, SyncStatus};
pub use secrets::{get_database_credentials, get_json_secret, get_secret, DatabaseCredentials};
pub use settings::{PgSettingsStore, SettingsStore};
pub use sync::{SyncAction, SyncBridge, SyncOutcome};
