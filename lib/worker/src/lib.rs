//! The conversation worker.
//!
//! Workers pull inbound messages from the work queue and, holding the
//! sender's lock, run the tool-calling loop against the model, persist the
//! session and send the reply. Failures are requeued with backoff and end up
//! as dead letters once retries run out.

pub mod agent;
pub mod backoff;
pub mod config;
pub mod error;
pub mod pool;
pub mod rate_limit;
pub mod worker;

#[cfg(test)]
mod testing;

pub use agent::{AgentReply, ConversationAgent, FallbackReason, ReplyKind};
pub use backoff::Backoff;
pub use config::WorkerConfig;
pub use error::ProcessError;
pub use pool::WorkerPool;
pub use rate_limit::{RateLimitConfig, RateLimitResult, RateLimiter};
pub use worker::{Outcome, Worker, WorkerDeps};
