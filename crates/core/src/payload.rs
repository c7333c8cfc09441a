//! Payload builders: turn a campaign message into provider sends.
//!
//! One builder per message type, keyed by the `MessagePayload` variant, so
//! adding a message type never touches the orchestrator. Composite types
//! (captioned media, buttons with an image header) carry a simpler
//! decomposition the dispatcher falls back to when the provider rejects
//! the combined form.

use chrono::Local;

use crate::error::{EngineError, Result};
use crate::job::{MessagePayload, Recipient};
use crate::provider::{MediaKind, OutboundMessage};

/// The provider-call sequence for one recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct SendPlan {
    /// Richest form, attempted first with retries.
    pub primary: OutboundMessage,
    /// Simpler decomposition, attempted once per part if the primary is
    /// rejected outright. Empty for non-composite messages.
    pub fallback: Vec<OutboundMessage>,
}

/// Reject structurally incomplete payloads before any send is attempted.
///
/// A failure here aborts the whole job as a configuration error (full
/// refund, zero progress).
pub fn validate_payload(message: &MessagePayload) -> Result<()> {
    match message {
        MessagePayload::Text { body } => {
            if body.trim().is_empty() {
                return Err(EngineError::Config("text body is empty".to_string()));
            }
        }
        MessagePayload::Image { url, .. } => {
            if url.trim().is_empty() {
                return Err(EngineError::Config("image url is empty".to_string()));
            }
        }
        MessagePayload::Video { url, .. } => {
            if url.trim().is_empty() {
                return Err(EngineError::Config("video url is empty".to_string()));
            }
        }
        MessagePayload::Buttons { body, buttons, .. } => {
            if body.trim().is_empty() {
                return Err(EngineError::Config("buttons body is empty".to_string()));
            }
            if buttons.is_empty() {
                return Err(EngineError::Config("buttons message has no buttons".to_string()));
            }
        }
        MessagePayload::QuickReplies { body, replies } => {
            if body.trim().is_empty() {
                return Err(EngineError::Config("quick replies body is empty".to_string()));
            }
            if replies.is_empty() {
                return Err(EngineError::Config("quick replies message has no replies".to_string()));
            }
        }
    }
    Ok(())
}

/// Build the provider-call sequence for `recipient`.
pub fn build_plan(message: &MessagePayload, recipient: &Recipient, personalize: bool) -> SendPlan {
    let text = |s: &str| -> String {
        if personalize {
            personalize_text(s, recipient)
        } else {
            s.to_string()
        }
    };
    let opt_text = |s: &Option<String>| -> Option<String> { s.as_deref().map(text) };

    match message {
        MessagePayload::Text { body } => SendPlan {
            primary: OutboundMessage::Text { body: text(body) },
            fallback: Vec::new(),
        },
        MessagePayload::Image { url, caption } => media_plan(MediaKind::Image, url, opt_text(caption)),
        MessagePayload::Video { url, caption } => media_plan(MediaKind::Video, url, opt_text(caption)),
        MessagePayload::Buttons {
            body,
            buttons,
            image_url,
        } => {
            let body = text(body);
            let primary = OutboundMessage::ButtonTemplate {
                body: body.clone(),
                buttons: buttons.clone(),
                image_url: image_url.clone(),
            };
            // With an image header the combined template may be rejected;
            // decompose into a plain image followed by plain buttons.
            let fallback = match image_url {
                Some(url) => vec![
                    OutboundMessage::Media {
                        kind: MediaKind::Image,
                        url: url.clone(),
                        caption: None,
                    },
                    OutboundMessage::ButtonTemplate {
                        body,
                        buttons: buttons.clone(),
                        image_url: None,
                    },
                ],
                None => Vec::new(),
            };
            SendPlan { primary, fallback }
        }
        MessagePayload::QuickReplies { body, replies } => SendPlan {
            primary: OutboundMessage::QuickReplyTemplate {
                body: text(body),
                replies: replies.clone(),
            },
            fallback: Vec::new(),
        },
    }
}

fn media_plan(kind: MediaKind, url: &str, caption: Option<String>) -> SendPlan {
    let primary = OutboundMessage::Media {
        kind,
        url: url.to_string(),
        caption: caption.clone(),
    };
    // Captioned media decomposes into bare media plus a text message.
    let fallback = match caption {
        Some(caption) if !caption.is_empty() => vec![
            OutboundMessage::Media {
                kind,
                url: url.to_string(),
                caption: None,
            },
            OutboundMessage::Text { body: caption },
        ],
        _ => Vec::new(),
    };
    SendPlan { primary, fallback }
}

/// Substitute `{{name}}`, `{{date}}`, and `{{time}}` tokens.
fn personalize_text(template: &str, recipient: &Recipient) -> String {
    let name = recipient.name.as_deref().unwrap_or_default();
    let now = Local::now();
    template
        .replace("{{name}}", name)
        .replace("{{date}}", &now.format("%Y-%m-%d").to_string())
        .replace("{{time}}", &now.format("%H:%M").to_string())
}
