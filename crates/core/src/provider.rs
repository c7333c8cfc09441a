//! Messaging provider boundary.
//!
//! The provider is the external third-party API that actually delivers
//! content to a recipient. The engine only ever sees this trait plus the
//! structured error it returns; request wire shapes live in the
//! implementation crates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::job::Button;

/// Receipt returned by the provider on a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Provider-side delivery identifier.
    pub message_id: String,
}

/// Structured error returned by the provider boundary.
///
/// `connection` marks transport-level failures where no response was
/// received at all; those are always retryable.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    /// Provider error code, when the provider returned one.
    pub code: Option<String>,
    /// HTTP status of the provider response, absent on connection failures.
    pub http_status: Option<u16>,
    pub message: String,
    /// No response was received (timeout, refused connection, DNS, ...).
    pub connection: bool,
}

impl ProviderError {
    /// Transport-level failure: no response received.
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            code: None,
            http_status: None,
            message: message.into(),
            connection: true,
        }
    }

    /// Provider-signaled failure with an HTTP status and optional code.
    pub fn api(code: Option<String>, http_status: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            http_status: Some(http_status),
            message: message.into(),
            connection: false,
        }
    }
}

/// Kind of media carried by a media send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

/// A single provider-level send, already personalized and decomposed.
///
/// One campaign message maps to one primary `OutboundMessage` plus an
/// optional fallback sequence (see `payload.rs`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Text {
        body: String,
    },
    Media {
        kind: MediaKind,
        url: String,
        caption: Option<String>,
    },
    ButtonTemplate {
        body: String,
        buttons: Vec<Button>,
        image_url: Option<String>,
    },
    QuickReplyTemplate {
        body: String,
        replies: Vec<String>,
    },
}

/// Outbound messaging API.
///
/// Implementations must be thread-safe (Send + Sync); the dispatcher may
/// call `send` from many campaign tasks concurrently.
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    /// Deliver one message to one recipient.
    async fn send(
        &self,
        recipient_id: &str,
        message: &OutboundMessage,
    ) -> std::result::Result<SendReceipt, ProviderError>;
}

/// A type-erased provider that can be shared across campaign tasks.
pub type SharedProvider = Arc<dyn MessagingProvider>;
