//! LINE Webhook Lambda - Drives the event registration chat.
//!
//! This Lambda receives LINE Messaging API webhooks through API Gateway, verifies
//! the channel signature over the raw body, feeds every text message to the
//! conversation engine and answers each one with its reply token.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::conversation::{ConversationEngine, MemorySessionStore, SessionStore};
use shared::db::create_pool;
use shared::line::{verify_signature, LineClient, Messenger, WebhookBody};
use shared::{Config, EventStore, GoogleCalendar, LineConfig, PgEventStore, PgSettingsStore, SyncBridge};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const SIGNATURE_HEADER: &str = "x-line-signature";

/// API Gateway proxy request (simplified)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiGatewayRequest {
    headers: Option<HashMap<String, String>>,
    body: Option<String>,
    is_base64_encoded: Option<bool>,
}

impl ApiGatewayRequest {
    /// Header value, matched case-insensitively.
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()?
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The body exactly as LINE signed it.
    fn raw_body(&self) -> Result<Vec<u8>, base64::DecodeError> {
        let body = self.body.as_deref().unwrap_or_default();
        if self.is_base64_encoded.unwrap_or(false) {
            STANDARD.decode(body)
        } else {
            Ok(body.as_bytes().to_vec())
        }
    }
}

/// API Gateway proxy response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiGatewayResponse {
    status_code: u16,
    headers: HashMap<String, String>,
    body: String,
    is_base64_encoded: bool,
}

impl ApiGatewayResponse {
    fn text(status_code: u16, body: &str) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        Self {
            status_code,
            headers,
            body: body.to_string(),
            is_base64_encoded: false,
        }
    }

    fn into_value(self) -> Result<Value, Error> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Application state
struct AppState {
    engine: ConversationEngine,
    sessions: Arc<MemorySessionStore>,
    messenger: Arc<dyn Messenger>,
    channel_secret: String,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let line = LineConfig::from_env()?;

        let pool = create_pool(&config).await?;
        let events: Arc<dyn EventStore> = Arc::new(PgEventStore::new(pool.clone()));
        let settings = Arc::new(PgSettingsStore::new(pool));
        let calendar = Arc::new(GoogleCalendar::from_config(&config).await?);
        let bridge = Arc::new(SyncBridge::from_config(&config, calendar, events.clone()));

        let sessions = Arc::new(MemorySessionStore::new(config.session_ttl));
        let engine = ConversationEngine::new(
            sessions.clone(),
            events,
            settings,
            bridge,
            config.schedule.clone(),
        );

        info!(calendar_id = %config.google_calendar_id, "LINE webhook initialised");

        Ok(Self {
            engine,
            sessions,
            messenger: Arc::new(LineClient::new(
                reqwest::Client::new(),
                line.channel_access_token,
            )),
            channel_secret: line.channel_secret,
        })
    }
}

/// Run every text message through the engine and reply. Returns how many were answered.
async fn dispatch(engine: &ConversationEngine, messenger: &dyn Messenger, body: &WebhookBody) -> usize {
    let mut answered = 0;

    for event in &body.events {
        let Some(message) = event.text_message() else {
            info!(event_type = %event.event_type, "Ignoring non-text webhook event");
            continue;
        };

        let reply = engine.handle(message.sender, message.text).await;

        match messenger.reply(message.reply_token, &reply).await {
            Ok(()) => answered += 1,
            Err(e) => error!(sender = message.sender, error = %e, "Failed to send reply"),
        }
    }

    answered
}

async fn handler(state: Arc<AppState>, event: LambdaEvent<Value>) -> Result<Value, Error> {
    let (payload, _context) = event.into_parts();
    let request: ApiGatewayRequest = serde_json::from_value(payload)?;

    let raw_body = match request.raw_body() {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Undecodable webhook body: {}", e);
            return ApiGatewayResponse::text(400, "Invalid request").into_value();
        }
    };

    let signature = request.header(SIGNATURE_HEADER).unwrap_or("");
    if !verify_signature(&state.channel_secret, &raw_body, signature) {
        warn!("Invalid LINE signature");
        return ApiGatewayResponse::text(401, "Invalid signature").into_value();
    }

    let body: WebhookBody = match serde_json::from_slice(&raw_body) {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to parse webhook body: {}", e);
            return ApiGatewayResponse::text(400, "Invalid request").into_value();
        }
    };

    let answered = dispatch(&state.engine, state.messenger.as_ref(), &body).await;
    info!(events = body.events.len(), answered, "Processed LINE webhook");

    match state.sessions.purge_expired(Utc::now()).await {
        Ok(0) => {}
        Ok(dropped) => info!(dropped, "Dropped expired conversations"),
        Err(e) => warn!("Failed to purge conversations: {}", e),
    }

    ApiGatewayResponse::text(200, "OK").into_value()
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);

    lambda_runtime::run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: Value) -> ApiGatewayRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = request(serde_json::json!({
            "headers": {"X-Line-Signature": "abc=", "Content-Type": "application/json"},
            "body": "{}"
        }));
        assert_eq!(req.header(SIGNATURE_HEADER), Some("abc="));
        assert_eq!(req.header("x-missing"), None);
    }

    #[test]
    fn test_raw_body_plain_and_base64() {
        let plain = request(serde_json::json!({"body": "{\"events\":[]}"}));
        assert_eq!(plain.raw_body().unwrap(), b"{\"events\":[]}".to_vec());

        let encoded = request(serde_json::json!({
            "body": STANDARD.encode("{\"events\":[]}"),
            "isBase64Encoded": true
        }));
        assert_eq!(encoded.raw_body().unwrap(), b"{\"events\":[]}".to_vec());

        let broken = request(serde_json::json!({"body": "***", "isBase64Encoded": true}));
        assert!(broken.raw_body().is_err());
    }

    #[test]
    fn test_missing_body_is_empty() {
        let req = request(serde_json::json!({}));
        assert!(req.raw_body().unwrap().is_empty());
        assert_eq!(req.header(SIGNATURE_HEADER), None);
    }

    #[test]
    fn test_response_shape() {
        let value = ApiGatewayResponse::text(401, "Invalid signature").into_value().unwrap();
        assert_eq!(value["statusCode"], 401);
        assert_eq!(value["body"], "Invalid signature");
        assert_eq!(value["isBase64Encoded"], false);
    }
}
