//! Work items and dead letters.

use chrono::{DateTime, Utc};
use mobility_relay_core::{CorrelationId, DeadLetterId, SenderAddress};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// An inbound message waiting to be processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Idempotency key derived from the provider message id.
    pub correlation_id: CorrelationId,
    /// Who sent the message.
    pub sender: SenderAddress,
    /// Message text.
    pub text: String,
    /// The provider's message object, as received.
    pub raw_payload: JsonValue,
    /// When ingress accepted the message.
    pub received_at: DateTime<Utc>,
    /// How many times the item has been handed to a worker, including the
    /// current delivery. Filled in by the queue on dequeue.
    #[serde(default)]
    pub delivery_count: u32,
}

impl QueueMessage {
    /// Creates a message that has not been delivered yet.
    #[must_use]
    pub fn new(
        correlation_id: CorrelationId,
        sender: SenderAddress,
        text: impl Into<String>,
        raw_payload: JsonValue,
    ) -> Self {
        Self {
            correlation_id,
            sender,
            text: text.into(),
            raw_payload,
            received_at: Utc::now(),
            delivery_count: 0,
        }
    }
}

/// A work item that will not be retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: DeadLetterId,
    /// The item as last delivered.
    pub message: QueueMessage,
    /// Why processing gave up.
    pub reason: String,
    /// Reply that was produced but could not be sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Creates a dead letter for `message`.
    #[must_use]
    pub fn new(message: QueueMessage, reason: impl Into<String>) -> Self {
        Self {
            id: DeadLetterId::new(),
            message,
            reason: reason.into(),
            reply: None,
            failed_at: Utc::now(),
        }
    }

    /// Preserves the undelivered reply.
    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }
}
