//! Durable state for mobility-relay.
//!
//! This crate provides:
//!
//! - **Work queue**: at-least-once delivery of inbound messages to workers,
//!   with delayed requeue and per-item delivery counters
//! - **Session store**: conversation sessions guarded by a version check
//! - **Sender lock**: per-sender advisory lock with a lease
//! - **Delivery ledger**: idempotency keys of messages already accepted
//! - **Dead letters**: items that exhausted their retries
//! - **Sender backlog**: requeued items per sender, keeping arrival order
//!   across redeliveries and counting real failures
//!
//! Every store has an in-memory implementation for tests and a NATS
//! JetStream implementation for production.

pub mod backlog;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod message;
pub mod nats;
pub mod queue;
pub mod store;

pub use backlog::{Backlog, Parked, SenderBacklog};
pub use envelope::Envelope;
pub use error::StateError;
pub use memory::{
    MemoryDeadLetters, MemoryDeliveryLedger, MemoryQueue, MemorySenderBacklog, MemorySenderLock,
    MemorySessionStore,
};
pub use message::{DeadLetter, QueueMessage};
pub use nats::{NatsConfig, NatsState};
pub use queue::{Acknowledger, Delivery, WorkQueue};
pub use store::{ClaimOutcome, DeadLetterSink, DeliveryLedger, LockToken, SenderLock, SessionStore};
