//! Processing of one queued message, from sender lock to acknowledgement.
//!
//! 1. Take the sender's lock, or park the message in the sender backlog and
//!    requeue it shortly if another worker holds it
//! 2. Defer the message the same way while an older message of the sender
//!    is parked
//! 3. Load the session; a message already in the transcript only has its
//!    unsent reply re-sent
//! 4. Run the tool loop, stage the reply in the session outbox and compact
//!    the transcript
//! 5. Persist with the version check, send, clear the outbox, acknowledge
//!
//! Anything that fails is requeued with backoff until the failure limit,
//! then dead-lettered. An undeliverable reply is dead-lettered right away.

use crate::agent::ConversationAgent;
use crate::config::WorkerConfig;
use crate::error::ProcessError;
use crate::rate_limit::RateLimiter;
use mobility_relay_conversation::{ConversationSession, Turn};
use mobility_relay_messaging::{ReplySender, SendError};
use chrono::{TimeDelta, Utc};
use mobility_relay_state::{
    DeadLetter, DeadLetterSink, Delivery, QueueMessage, SenderBacklog, SenderLock, SessionStore,
    StateError, WorkQueue,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// How a delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The reply was sent and the message acknowledged.
    Replied,
    /// The message had already been answered; acknowledged without sending.
    AlreadyAnswered,
    /// The sender is over the rate limit; acknowledged without a reply.
    RateLimited,
    /// Another worker holds the sender; requeued.
    SenderBusy,
    /// An older message of the sender is still waiting; requeued behind it.
    Deferred,
    /// Failed and requeued for another attempt.
    Requeued,
    /// Failed for good and recorded as a dead letter.
    DeadLettered,
}

/// Collaborators of a worker.
#[derive(Clone)]
pub struct WorkerDeps {
    pub queue: Arc<dyn WorkQueue>,
    pub sessions: Arc<dyn SessionStore>,
    pub locks: Arc<dyn SenderLock>,
    pub backlog: Arc<dyn SenderBacklog>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
    pub sender: Arc<dyn ReplySender>,
    pub agent: Arc<ConversationAgent>,
}

/// Where a message stands in its sender's backlog.
#[derive(Debug, Clone, Copy, Default)]
struct Standing {
    /// The message itself is parked.
    parked: bool,
    /// An older message of the sender is parked.
    behind: bool,
}

/// Conversation worker. One instance is shared by every task of the pool.
pub struct Worker {
    deps: WorkerDeps,
    config: WorkerConfig,
    rate_limiter: RateLimiter,
}

impl Worker {
    #[must_use]
    pub fn new(deps: WorkerDeps, config: WorkerConfig) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limit.clone());
        Self {
            deps,
            config,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Pulls and processes messages until `shutdown` turns true.
    ///
    /// Shutdown interrupts only the wait on the queue; a message already
    /// being processed is finished first.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        debug!("worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = self.deps.queue.dequeue(self.config.dequeue_timeout) => next,
            };
            match next {
                Ok(Some(delivery)) => {
                    self.process(delivery).await;
                }
                Ok(None) => {}
                Err(error) => {
                    error!(%error, "dequeue failed");
                    tokio::time::sleep(self.config.backoff.delay(1)).await;
                }
            }
        }
        debug!("worker stopped");
    }

    /// Waits for one message and processes it. Returns `None` if the queue
    /// stayed empty for the dequeue timeout.
    pub async fn run_once(&self) -> Result<Option<Outcome>, StateError> {
        match self.deps.queue.dequeue(self.config.dequeue_timeout).await? {
            Some(delivery) => Ok(Some(self.process(delivery).await)),
            None => Ok(None),
        }
    }

    /// Processes one delivery and settles it with the queue.
    #[instrument(skip_all, fields(
        sender = %delivery.message.sender,
        correlation_id = %delivery.message.correlation_id,
        attempt = delivery.message.delivery_count,
    ))]
    pub async fn process(&self, delivery: Delivery) -> Outcome {
        let message = delivery.message.clone();

        let token = match self.deps.locks.try_acquire(&message.sender).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("sender busy, requeueing");
                return self.defer(delivery, Outcome::SenderBusy).await;
            }
            Err(error) => return self.recover(delivery, error.into()).await,
        };

        let (result, parked) = match self.standing(&message).await {
            Ok(standing) if standing.behind => (None, standing.parked),
            Ok(standing) => {
                let deadline = self.config.item_deadline;
                let result = tokio::time::timeout(deadline, self.handle(&message))
                    .await
                    .unwrap_or(Err(ProcessError::DeadlineExceeded { deadline }));
                (Some(result), standing.parked)
            }
            Err(error) => (Some(Err(error.into())), false),
        };

        if let Err(error) = self.deps.locks.release(token).await {
            warn!(%error, "failed to release sender lock");
        }

        match result {
            None => {
                debug!("older message of the sender is waiting, deferring");
                self.defer(delivery, Outcome::Deferred).await
            }
            Some(Ok(outcome)) => {
                if parked {
                    self.unpark(&message).await;
                }
                settle("ack", delivery.ack().await);
                outcome
            }
            Some(Err(error)) => self.recover(delivery, error).await,
        }
    }

    /// Reads the sender's backlog. Entries untouched for longer than
    /// `backlog_stale_after` are dropped instead of holding the message back.
    async fn standing(&self, message: &QueueMessage) -> Result<Standing, StateError> {
        let parked = self.deps.backlog.parked(&message.sender).await?;
        let stale_after =
            TimeDelta::from_std(self.config.backlog_stale_after).unwrap_or(TimeDelta::MAX);
        let now = Utc::now();

        let mut standing = Standing::default();
        for entry in parked {
            if entry.correlation_id == message.correlation_id {
                standing.parked = true;
            } else if entry.precedes(message) {
                if now - entry.parked_at < stale_after {
                    standing.behind = true;
                } else {
                    warn!(waiting = %entry.correlation_id, "dropping stale backlog entry");
                    if let Err(error) = self
                        .deps
                        .backlog
                        .unpark(&message.sender, &entry.correlation_id)
                        .await
                    {
                        warn!(%error, "failed to drop stale backlog entry");
                    }
                }
            }
        }
        Ok(standing)
    }

    /// Parks the message and requeues it after the lock retry delay.
    async fn defer(&self, delivery: Delivery, outcome: Outcome) -> Outcome {
        if let Err(error) = self.deps.backlog.park(&delivery.message, false).await {
            warn!(%error, "failed to park message");
        }
        settle("requeue", delivery.requeue(self.config.lock_retry_delay).await);
        outcome
    }

    async fn unpark(&self, message: &QueueMessage) {
        if let Err(error) = self
            .deps
            .backlog
            .unpark(&message.sender, &message.correlation_id)
            .await
        {
            warn!(%error, "failed to clear backlog entry");
        }
    }

    /// Counts a failed attempt. Falls back to the queue's delivery count
    /// when the backlog is unreachable.
    async fn record_failure(&self, message: &QueueMessage) -> u32 {
        match self.deps.backlog.park(message, true).await {
            Ok(parked) => parked.failures,
            Err(error) => {
                warn!(%error, "failed to record failure, using delivery count");
                message.delivery_count
            }
        }
    }

    async fn handle(&self, message: &QueueMessage) -> Result<Outcome, ProcessError> {
        let id = &message.correlation_id;
        let mut session = self
            .deps
            .sessions
            .get(&message.sender)
            .await?
            .unwrap_or_else(|| ConversationSession::new(message.sender.clone()));

        if session.has_processed(id) {
            let Some(pending) = session.pending_reply_for(id).map(|r| r.text.clone()) else {
                info!("message already answered");
                return Ok(Outcome::AlreadyAnswered);
            };
            info!("resending unsent reply");
            return self.deliver(session, message, pending).await;
        }

        if !self
            .rate_limiter
            .check_and_increment(message.sender.as_str())
            .is_allowed()
        {
            warn!("sender over rate limit, dropping message");
            return Ok(Outcome::RateLimited);
        }

        session.push_turn(Turn::user(message.text.as_str(), id.clone()));
        let reply = self.deps.agent.respond(&mut session).await;
        session.stage_reply(id.clone(), reply.text.as_str());
        let dropped = session.compact(self.config.history_turns, self.config.history_bytes);
        if dropped > 0 {
            debug!(dropped, "compacted transcript");
        }
        session.version = self.deps.sessions.put(&session).await?;

        self.deliver(session, message, reply.text).await
    }

    async fn deliver(
        &self,
        mut session: ConversationSession,
        message: &QueueMessage,
        text: String,
    ) -> Result<Outcome, ProcessError> {
        let sent = self
            .config
            .backoff
            .retry(self.config.send_attempts, SendError::is_retryable, |attempt| {
                let text = text.as_str();
                async move {
                    let result = self.deps.sender.send(&message.sender, text).await;
                    if let Err(error) = &result {
                        warn!(%error, attempt, "reply send failed");
                    }
                    result
                }
            })
            .await;
        if let Err(error) = sent {
            return Err(ProcessError::SendFailed { error, reply: text });
        }

        session.confirm_reply(&message.correlation_id);
        if let Err(error) = self.deps.sessions.put(&session).await {
            // The reply is out; a stale outbox entry is overwritten by the next reply.
            warn!(%error, "reply sent but outbox not cleared");
        }
        info!("reply sent");
        Ok(Outcome::Replied)
    }

    async fn recover(&self, delivery: Delivery, error: ProcessError) -> Outcome {
        let undeliverable = matches!(error, ProcessError::SendFailed { .. });
        let failures = if undeliverable {
            delivery.message.delivery_count
        } else {
            self.record_failure(&delivery.message).await
        };

        if !undeliverable && failures < self.config.max_deliveries {
            let delay = match error {
                ProcessError::State(StateError::VersionConflict { .. }) => {
                    self.config.lock_retry_delay
                }
                _ => self.config.backoff.delay(failures),
            };
            warn!(%error, failures, ?delay, "processing failed, requeueing");
            settle("requeue", delivery.requeue(delay).await);
            return Outcome::Requeued;
        }

        let mut letter = DeadLetter::new(delivery.message.clone(), error.to_string());
        if let Some(reply) = error.undelivered_reply() {
            letter = letter.with_reply(reply);
        }
        match self.deps.dead_letters.record(letter).await {
            Ok(()) => {
                error!(%error, failures, "processing failed for good, dead-lettered");
                self.unpark(&delivery.message).await;
                settle("terminate", delivery.terminate().await);
                Outcome::DeadLettered
            }
            Err(record_error) => {
                error!(%error, %record_error, "dead letter not recorded, requeueing");
                settle(
                    "requeue",
                    delivery.requeue(self.config.backoff.delay(failures)).await,
                );
                Outcome::Requeued
            }
        }
    }
}

fn settle(action: &'static str, result: Result<(), StateError>) {
    if let Err(error) = result {
        warn!(action, %error, "failed to settle delivery");
    }
}
