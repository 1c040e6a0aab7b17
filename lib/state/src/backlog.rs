//! Per-sender backlog of messages that were bounced back onto the queue.
//!
//! The work queue redelivers a requeued item only after its delay, so a
//! younger message from the same sender can overtake it. Workers park an
//! item here whenever they requeue it and check the backlog before
//! processing, which keeps a sender's messages in arrival order. The entry
//! also counts genuine processing failures, separately from bounces caused
//! by lock contention.

use crate::error::StateError;
use crate::message::QueueMessage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mobility_relay_core::{CorrelationId, SenderAddress};
use serde::{Deserialize, Serialize};

/// A requeued message waiting for its turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parked {
    pub correlation_id: CorrelationId,
    /// Ingress time of the message.
    pub received_at: DateTime<Utc>,
    /// Failed processing attempts. Lock contention and deferrals do not count.
    pub failures: u32,
    /// Last time the entry was written.
    pub parked_at: DateTime<Utc>,
}

impl Parked {
    /// Returns true if this entry belongs to a different message that
    /// arrived before `message`.
    #[must_use]
    pub fn precedes(&self, message: &QueueMessage) -> bool {
        self.correlation_id != message.correlation_id
            && (self.received_at, self.correlation_id.as_str())
                < (message.received_at, message.correlation_id.as_str())
    }
}

/// The parked messages of one sender, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backlog {
    pub entries: Vec<Parked>,
}

impl Backlog {
    /// Adds or refreshes the entry for `message` and returns it.
    pub fn park(&mut self, message: &QueueMessage, failed: bool) -> Parked {
        let now = Utc::now();
        let index = match self
            .entries
            .iter()
            .position(|p| p.correlation_id == message.correlation_id)
        {
            Some(index) => index,
            None => {
                let index = self.entries.partition_point(|p| p.precedes(message));
                self.entries.insert(
                    index,
                    Parked {
                        correlation_id: message.correlation_id.clone(),
                        received_at: message.received_at,
                        failures: 0,
                        parked_at: now,
                    },
                );
                index
            }
        };

        let entry = &mut self.entries[index];
        if failed {
            entry.failures = entry.failures.saturating_add(1);
        }
        entry.parked_at = now;
        entry.clone()
    }

    /// Drops the entry for `id`. Returns true if there was one.
    pub fn remove(&mut self, id: &CorrelationId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|p| &p.correlation_id != id);
        self.entries.len() != before
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Durable per-sender backlog.
#[async_trait]
pub trait SenderBacklog: Send + Sync {
    /// Parked messages of `address`, oldest first.
    async fn parked(&self, address: &SenderAddress) -> Result<Vec<Parked>, StateError>;

    /// Parks `message`, counting a failure if `failed` is set. Returns the
    /// updated entry.
    async fn park(&self, message: &QueueMessage, failed: bool) -> Result<Parked, StateError>;

    /// Drops the entry for `id`, if any.
    async fn unpark(&self, address: &SenderAddress, id: &CorrelationId) -> Result<(), StateError>;
}
