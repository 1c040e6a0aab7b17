//! The work queue between ingress and the workers.

use crate::error::StateError;
use crate::message::QueueMessage;
use async_trait::async_trait;
use std::time::Duration;

/// At-least-once FIFO queue of inbound messages.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Appends a message. Returns once the message is durable.
    async fn enqueue(&self, message: QueueMessage) -> Result<(), StateError>;

    /// Waits up to `timeout` for the next message.
    ///
    /// A delivered message stays invisible to other workers until it is
    /// acknowledged, requeued or terminated, or until its lease lapses.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Delivery>, StateError>;
}

/// Settles a single delivery with the queue that produced it.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Removes the item from the queue.
    async fn ack(&self) -> Result<(), StateError>;

    /// Makes the item visible again after `delay`.
    async fn requeue(&self, delay: Duration) -> Result<(), StateError>;

    /// Removes the item without processing it any further.
    async fn terminate(&self) -> Result<(), StateError>;
}

/// A message handed to a worker, with the handle used to settle it.
pub struct Delivery {
    pub message: QueueMessage,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Pairs a message with its acknowledger.
    #[must_use]
    pub fn new(message: QueueMessage, acker: Box<dyn Acknowledger>) -> Self {
        Self { message, acker }
    }

    /// Marks the message processed.
    pub async fn ack(self) -> Result<(), StateError> {
        self.acker.ack().await
    }

    /// Returns the message to the queue after `delay`.
    pub async fn requeue(self, delay: Duration) -> Result<(), StateError> {
        self.acker.requeue(delay).await
    }

    /// Drops the message after it has been dead-lettered.
    pub async fn terminate(self) -> Result<(), StateError> {
        self.acker.terminate().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}
