//! Per-sender state: sessions, locks, the delivery ledger and dead letters.

use crate::error::StateError;
use crate::message::DeadLetter;
use async_trait::async_trait;
use mobility_relay_conversation::ConversationSession;
use mobility_relay_core::{CorrelationId, SenderAddress};

/// Durable storage of conversation sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads the session for `address`. The returned session's `version`
    /// is the revision it was read at.
    async fn get(&self, address: &SenderAddress) -> Result<Option<ConversationSession>, StateError>;

    /// Writes `session` if the stored revision still equals
    /// `session.version` (0 meaning "not stored yet"). Returns the new
    /// revision, or [`StateError::VersionConflict`].
    async fn put(&self, session: &ConversationSession) -> Result<u64, StateError>;
}

/// Proof of holding a sender lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub address: SenderAddress,
    /// Backend-specific fencing value.
    pub revision: u64,
}

/// Advisory lock serializing work for one sender.
///
/// Locks carry a lease so a crashed worker cannot hold a sender forever.
#[async_trait]
pub trait SenderLock: Send + Sync {
    /// Takes the lock without waiting. Returns `None` if someone else holds it.
    async fn try_acquire(&self, address: &SenderAddress) -> Result<Option<LockToken>, StateError>;

    /// Releases a lock taken with [`SenderLock::try_acquire`].
    async fn release(&self, token: LockToken) -> Result<(), StateError>;
}

/// Result of claiming a correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// First time this id was seen.
    Claimed,
    /// The id was already accepted.
    Duplicate,
}

/// Record of inbound message ids already accepted by ingress.
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    /// Atomically records `id`, reporting whether it was new.
    async fn claim(&self, id: &CorrelationId) -> Result<ClaimOutcome, StateError>;

    /// Forgets `id`, so a provider retry is accepted again.
    async fn release(&self, id: &CorrelationId) -> Result<(), StateError>;
}

/// Destination for work items that will not be retried.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, letter: DeadLetter) -> Result<(), StateError>;
}
