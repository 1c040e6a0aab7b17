//! Inbound webhook payloads.

use crate::error::InboundError;
use mobility_relay_core::{CorrelationId, SenderAddress};
use serde_json::Value as JsonValue;
use tracing::debug;

/// Messaging providers the relay accepts webhooks from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Infobip,
}

impl Provider {
    /// Looks up the provider named in a webhook path.
    #[must_use]
    pub fn from_path(segment: &str) -> Option<Self> {
        match segment.to_ascii_lowercase().as_str() {
            "infobip" | "whatsapp" => Some(Self::Infobip),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Infobip => "infobip",
        }
    }

    /// Extracts the text messages from a webhook body.
    pub fn parse(&self, body: &[u8]) -> Result<Vec<InboundMessage>, InboundError> {
        match self {
            Self::Infobip => parse_infobip(body),
        }
    }
}

/// One text message received from a user.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub provider: Provider,
    /// Provider-assigned message id.
    pub message_id: String,
    pub from: SenderAddress,
    pub text: String,
    /// The provider's message object, as received.
    pub raw: JsonValue,
}

impl InboundMessage {
    /// The idempotency key for this message.
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        CorrelationId::from_provider(self.provider.as_str(), &self.message_id)
    }
}

fn malformed(reason: impl Into<String>) -> InboundError {
    InboundError::Malformed {
        reason: reason.into(),
    }
}

/// Parses an Infobip WhatsApp webhook:
/// `{"results":[{"messageId","from","message":{"type":"TEXT","text"}}]}`.
///
/// A top-level `text` on a result is accepted as well. Results that are not
/// text messages are skipped.
fn parse_infobip(body: &[u8]) -> Result<Vec<InboundMessage>, InboundError> {
    let document: JsonValue =
        serde_json::from_slice(body).map_err(|e| malformed(format!("not JSON: {e}")))?;
    let results = document
        .get("results")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| malformed("missing 'results' array"))?;

    let mut messages = Vec::with_capacity(results.len());
    for (index, result) in results.iter().enumerate() {
        let field = |name: &str| {
            result
                .get(name)
                .and_then(JsonValue::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| malformed(format!("results[{index}] has no '{name}'")))
        };
        let message_id = field("messageId")?;
        let from = SenderAddress::new(field("from")?);
        if from.is_empty() {
            return Err(malformed(format!("results[{index}] has an empty 'from'")));
        }

        let Some(text) = text_of(result) else {
            debug!(message_id, "skipping non-text message");
            continue;
        };

        messages.push(InboundMessage {
            provider: Provider::Infobip,
            message_id: message_id.to_string(),
            from,
            text,
            raw: result.clone(),
        });
    }
    Ok(messages)
}

fn text_of(result: &JsonValue) -> Option<String> {
    let text = match result.get("message") {
        Some(message) => {
            let kind = message.get("type").and_then(JsonValue::as_str);
            if kind.is_some_and(|kind| !kind.eq_ignore_ascii_case("TEXT")) {
                return None;
            }
            message.get("text")
        }
        None => result.get("text"),
    };
    text.and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
