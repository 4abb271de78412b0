//! LINE Messaging API: webhook verification, payload types and outbound messages.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{error, info};

use crate::{Error, Result};

const REPLY_ENDPOINT: &str = "https://api.line.me/v2/bot/message/reply";
const PUSH_ENDPOINT: &str = "https://api.line.me/v2/bot/message/push";

/// LINE rejects text messages longer than this many characters.
const MAX_TEXT_CHARS: usize = 5000;

type HmacSha256 = Hmac<Sha256>;

/// Verify the `x-line-signature` header against the raw request body.
pub fn verify_signature(channel_secret: &str, body: &[u8], signature: &str) -> bool {
    let expected = match STANDARD.decode(signature.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(channel_secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Webhook request body
#[derive(Debug, Deserialize)]
pub struct WebhookBody {
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

/// A single webhook event
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub reply_token: Option<String>,
    pub source: Option<EventSource>,
    pub message: Option<MessageContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageContent {
    #[serde(rename = "type")]
    pub message_type: String,
    pub text: Option<String>,
}

/// An inbound text message ready for the conversation engine.
#[derive(Debug, PartialEq, Eq)]
pub struct TextMessage<'a> {
    pub sender: &'a str,
    pub text: &'a str,
    pub reply_token: &'a str,
}

impl WebhookEvent {
    /// The sender, text and reply token when this is a text message from a user.
    pub fn text_message(&self) -> Option<TextMessage<'_>> {
        if self.event_type != "message" {
            return None;
        }
        let message = self.message.as_ref()?;
        if message.message_type != "text" {
            return None;
        }
        Some(TextMessage {
            sender: self.source.as_ref()?.user_id.as_deref()?,
            text: message.text.as_deref()?,
            reply_token: self.reply_token.as_deref()?,
        })
    }
}

/// Outbound chat delivery.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Answer an inbound event using its one-time reply token.
    async fn reply(&self, reply_token: &str, text: &str) -> Result<()>;

    /// Send an unsolicited message to a user.
    async fn push(&self, to: &str, text: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct TextPayload<'a> {
    #[serde(rename = "type")]
    message_type: &'static str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest<'a> {
    reply_token: &'a str,
    messages: [TextPayload<'a>; 1],
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    to: &'a str,
    messages: [TextPayload<'a>; 1],
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_TEXT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// LINE Messaging API client
pub struct LineClient {
    http_client: reqwest::Client,
    channel_access_token: String,
}

impl LineClient {
    pub fn new(http_client: reqwest::Client, channel_access_token: impl Into<String>) -> Self {
        Self {
            http_client,
            channel_access_token: channel_access_token.into(),
        }
    }

    async fn post<T: Serialize>(&self, url: &str, payload: &T) -> Result<()> {
        let response = self
            .http_client
            .post(url)
            .bearer_auth(&self.channel_access_token)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::Line(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("LINE API failed: {} - {}", status, body);
            return Err(Error::Line(format!("LINE API returned {}", status)));
        }

        Ok(())
    }
}

#[async_trait]
impl Messenger for LineClient {
    async fn reply(&self, reply_token: &str, text: &str) -> Result<()> {
        let request = ReplyRequest {
            reply_token,
            messages: [TextPayload {
                message_type: "text",
                text: truncate(text),
            }],
        };
        self.post(REPLY_ENDPOINT, &request).await
    }

    async fn push(&self, to: &str, text: &str) -> Result<()> {
        let request = PushRequest {
            to,
            messages: [TextPayload {
                message_type: "text",
                text: truncate(text),
            }],
        };
        self.post(PUSH_ENDPOINT, &request).await?;
        info!(to, "Push message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        STANDARD.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_signature_accepts_matching_body() {
        let body = br#"{"destination":"U0","events":[]}"#;
        let signature = sign("channel-secret", body);
        assert!(verify_signature("channel-secret", body, &signature));
    }

    #[test]
    fn test_signature_rejects_tampering() {
        let body = br#"{"destination":"U0","events":[]}"#;
        let signature = sign("channel-secret", body);

        assert!(!verify_signature("other-secret", body, &signature));
        assert!(!verify_signature("channel-secret", br#"{"events":[1]}"#, &signature));
        assert!(!verify_signature("channel-secret", body, "not base64!"));
        assert!(!verify_signature("channel-secret", body, ""));
    }

    #[test]
    fn test_extract_text_message() {
        let json = r#"{
            "destination": "Ubot",
            "events": [
                {
                    "type": "message",
                    "replyToken": "rt-1",
                    "source": {"type": "user", "userId": "U123"},
                    "message": {"type": "text", "id": "1", "text": "メニュー"}
                },
                {
                    "type": "follow",
                    "replyToken": "rt-2",
                    "source": {"type": "user", "userId": "U123"}
                },
                {
                    "type": "message",
                    "replyToken": "rt-3",
                    "source": {"type": "user", "userId": "U123"},
                    "message": {"type": "sticker", "id": "2"}
                }
            ]
        }"#;
        let body: WebhookBody = serde_json::from_str(json).unwrap();
        let messages: Vec<_> = body.events.iter().filter_map(|e| e.text_message()).collect();

        assert_eq!(
            messages,
            vec![TextMessage {
                sender: "U123",
                text: "メニュー",
                reply_token: "rt-1",
            }]
        );
    }

    #[test]
    fn test_truncate_counts_characters() {
        let long = "あ".repeat(MAX_TEXT_CHARS + 10);
        assert_eq!(truncate(&long).chars().count(), MAX_TEXT_CHARS);
        assert_eq!(truncate("short"), "short");
    }

    #[test]
    fn test_reply_request_shape() {
        let request = ReplyRequest {
            reply_token: "rt",
            messages: [TextPayload {
                message_type: "text",
                text: "hi",
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["replyToken"], "rt");
        assert_eq!(json["messages"][0]["type"], "text");
        assert_eq!(json["messages"][0]["text"], "hi");
    }
}
