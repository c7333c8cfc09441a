//! HTTP client for the outreach messaging gateway.
//!
//! Implements the engine's `MessagingProvider` trait against the
//! gateway's REST API: one POST per message, bearer-token auth, and a
//! structured error body on rejection. Retry policy lives in the engine;
//! this crate only maps transport and API failures into `ProviderError`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use outreach_core::{
    EngineError, MediaKind, MessagingProvider, OutboundMessage, ProviderError, Result, SendReceipt,
};

/// Per-call HTTP timeout. Distinct from the engine's lock timeout and
/// retry backoff scales.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP provider for the messaging gateway.
///
/// Cheap to clone; the underlying reqwest client pools connections.
#[derive(Debug, Clone)]
pub struct GatewayProvider {
    client: reqwest::Client,
    messages_url: String,
}

impl GatewayProvider {
    /// Creates a gateway client.
    ///
    /// Fails with a configuration error when the credential is missing or
    /// unusable — callers abort the campaign before any send.
    pub fn new(base_url: impl Into<String>, api_token: &str) -> Result<Self> {
        if api_token.trim().is_empty() {
            return Err(EngineError::Config("gateway API token is empty".to_string()));
        }

        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_token))
            .map_err(|e| EngineError::Config(format!("invalid API token header value: {e}")))?;
        headers.insert("authorization", bearer);
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build HTTP client: {e}")))?;

        let base = base_url.into();
        Ok(Self {
            client,
            messages_url: format!("{}/v1/messages", base.trim_end_matches('/')),
        })
    }
}

#[derive(Deserialize)]
struct SendResponse {
    message_id: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    code: Option<String>,
    message: String,
}

/// Encode one outbound message as the gateway's request body.
fn encode(recipient_id: &str, message: &OutboundMessage) -> serde_json::Value {
    match message {
        OutboundMessage::Text { body } => json!({
            "to": recipient_id,
            "type": "text",
            "text": { "body": body },
        }),
        OutboundMessage::Media { kind, url, caption } => {
            let key = match kind {
                MediaKind::Image => "image",
                MediaKind::Video => "video",
            };
            let mut value = json!({
                "to": recipient_id,
                "type": key,
            });
            value[key] = json!({ "url": url, "caption": caption });
            value
        }
        OutboundMessage::ButtonTemplate {
            body,
            buttons,
            image_url,
        } => json!({
            "to": recipient_id,
            "type": "interactive",
            "interactive": {
                "kind": "buttons",
                "body": body,
                "header_image_url": image_url,
                "buttons": buttons
                    .iter()
                    .map(|b| json!({ "id": b.id, "title": b.title }))
                    .collect::<Vec<_>>(),
            },
        }),
        OutboundMessage::QuickReplyTemplate { body, replies } => json!({
            "to": recipient_id,
            "type": "interactive",
            "interactive": {
                "kind": "quick_replies",
                "body": body,
                "replies": replies,
            },
        }),
    }
}

#[async_trait]
impl MessagingProvider for GatewayProvider {
    async fn send(
        &self,
        recipient_id: &str,
        message: &OutboundMessage,
    ) -> std::result::Result<SendReceipt, ProviderError> {
        let body = encode(recipient_id, message);

        let response = self
            .client
            .post(&self.messages_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::connection(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        debug!(status = %status, recipient = %recipient_id, "Gateway response received");

        if status.is_success() {
            let parsed: SendResponse = response.json().await.map_err(|e| {
                ProviderError::connection(format!("failed to read gateway response: {e}"))
            })?;
            return Ok(SendReceipt {
                message_id: parsed.message_id,
            });
        }

        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ApiErrorBody>(&text) {
            Ok(parsed) => Err(ProviderError::api(
                parsed.error.code,
                status.as_u16(),
                parsed.error.message,
            )),
            Err(_) => Err(ProviderError::api(
                None,
                status.as_u16(),
                format!("gateway returned {}: {}", status, text),
            )),
        }
    }
}
