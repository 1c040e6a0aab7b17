//! Worker settings.

use crate::backoff::Backoff;
use crate::rate_limit::RateLimitConfig;
use std::time::Duration;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are the WhatsApp assistant of a mobility service. \
Answer briefly and in the user's language. Use the available tools to look up or change \
bookings, vehicles and accounts; never invent data a tool could provide. If a tool reports \
an error, explain what went wrong or ask the user for the missing detail.";

pub const DEFAULT_FALLBACK_REPLY: &str =
    "Sorry, I couldn't complete your request right now. Please try again in a moment.";

/// Settings shared by every worker in the pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of worker tasks.
    pub concurrency: usize,
    /// Model calls per message before giving up with the fallback reply.
    pub max_iterations: u32,
    /// Failed processing attempts of one message before it is dead-lettered.
    /// Bounces caused by a busy sender do not count.
    pub max_deliveries: u32,
    /// Budget for handling one delivery, from lock to reply.
    pub item_deadline: Duration,
    /// How long an idle worker waits on the queue.
    pub dequeue_timeout: Duration,
    /// Requeue delay when the sender is locked by another worker or an
    /// older message of the sender is still waiting.
    pub lock_retry_delay: Duration,
    /// A parked message that has not been touched for this long no longer
    /// holds back younger messages of its sender.
    pub backlog_stale_after: Duration,
    /// Attempts per model call.
    pub model_attempts: u32,
    /// Attempts per reply send.
    pub send_attempts: u32,
    pub backoff: Backoff,
    /// Most recent turns sent to the model.
    pub context_turns: usize,
    /// Turns kept in the stored transcript.
    pub history_turns: usize,
    /// Upper bound on the encoded transcript size, in bytes.
    pub history_bytes: usize,
    pub system_prompt: String,
    pub fallback_reply: String,
    pub rate_limit: RateLimitConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_iterations: 5,
            max_deliveries: 5,
            item_deadline: Duration::from_secs(120),
            dequeue_timeout: Duration::from_secs(5),
            lock_retry_delay: Duration::from_secs(1),
            backlog_stale_after: Duration::from_secs(10 * 60),
            model_attempts: 3,
            send_attempts: 3,
            backoff: Backoff::default(),
            context_turns: 40,
            history_turns: 100,
            history_bytes: 256 * 1024,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}
