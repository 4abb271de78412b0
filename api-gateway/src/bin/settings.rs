//! Settings API Lambda - Role and event-name presets.
//!
//! Endpoints:
//! - GET /settings - All presets grouped by type (optional `type` filter)
//! - POST /settings - Create a preset or bind it to a LINE user

use lambda_http::{run, service_fn, Body, Error, Request, Response};
use serde::Deserialize;
use shared::db::create_pool;
use shared::http::{error_response, json_response, query_param, ApiResponse};
use shared::settings::{group_by_type, is_known_type, upsert_item};
use shared::{or_respond, parse_body, Config, PgSettingsStore, SettingsStore};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use validator::Validate;

/// Create / bind settings item request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct SettingsRequest {
    #[serde(rename = "type")]
    item_type: String,
    #[validate(length(min = 1, max = 100))]
    name: String,
    #[validate(length(min = 1, max = 64))]
    line_id: Option<String>,
}

impl SettingsRequest {
    /// Validated `(type, name, line_id)` with surrounding whitespace removed.
    fn normalized(self) -> shared::Result<(String, String, Option<String>)> {
        self.validate()
            .map_err(|e| shared::Error::Validation(e.to_string()))?;

        let item_type = self.item_type.trim().to_string();
        if !is_known_type(&item_type) {
            return Err(shared::Error::Validation(format!("Unknown settings type: {}", item_type)));
        }

        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(shared::Error::Validation("name must not be blank".to_string()));
        }

        let line_id = self
            .line_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        Ok((item_type, name, line_id))
    }
}

/// Application state
struct AppState {
    settings: Arc<dyn SettingsStore>,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let pool = create_pool(&config).await?;

        Ok(Self {
            settings: Arc::new(PgSettingsStore::new(pool)),
        })
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let method = event.method().as_str();
    let raw_path = event.uri().path();
    // Strip /api stage prefix if present (API Gateway REST API includes stage in path)
    let path = raw_path.strip_prefix("/api").unwrap_or(raw_path);

    info!("Settings request: {} {}", method, path);

    match (method, path) {
        ("GET", "/settings") => {
            let items = match query_param(&event, "type") {
                Some(item_type) if !is_known_type(&item_type) => {
                    return error_response(400, format!("Unknown settings type: {}", item_type));
                }
                Some(item_type) => or_respond!(state.settings.list_by_type(&item_type).await),
                None => or_respond!(state.settings.list().await),
            };

            json_response(200, &ApiResponse::success(group_by_type(items)))
        }

        ("POST", "/settings") => {
            let request: SettingsRequest = parse_body!(event.body());
            let (item_type, name, line_id) = or_respond!(request.normalized());

            let item = or_respond!(
                upsert_item(state.settings.as_ref(), &item_type, &name, line_id.as_deref()).await
            );
            info!(item_type = %item.item_type, name = %item.name, "Saved settings item");

            json_response(200, &ApiResponse::success(item))
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

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: serde_json::Value) -> SettingsRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_normalized_request() {
        let (item_type, name, line_id) = request(serde_json::json!({
            "type": "officiant",
            "name": " 山田 ",
            "lineId": "U123"
        }))
        .normalized()
        .unwrap();

        assert_eq!(item_type, "officiant");
        assert_eq!(name, "山田");
        assert_eq!(line_id.as_deref(), Some("U123"));
    }

    #[test]
    fn test_event_name_presets_need_no_line_id() {
        let (item_type, _, line_id) = request(serde_json::json!({
            "type": "event_name",
            "name": "月次祭"
        }))
        .normalized()
        .unwrap();

        assert_eq!(item_type, "event_name");
        assert_eq!(line_id, None);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = request(serde_json::json!({"type": "janitor", "name": "A"}))
            .normalized()
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_blank_name_is_rejected() {
        let err = request(serde_json::json!({"type": "sound", "name": "   "}))
            .normalized()
            .unwrap_err();
        assert!(matches!(err, shared::Error::Validation(_)));
    }
}
