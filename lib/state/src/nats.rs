//! NATS JetStream implementations of the queue and stores.
//!
//! - Work queue: a `WorkQueue`-retention stream read through one durable pull
//!   consumer shared by every worker
//! - Sessions, sender locks, sender backlogs and the delivery ledger:
//!   key/value buckets
//! - Dead letters: a limits-retention stream
//!
//! KV keys are the base64url encoding of the sender address or correlation
//! id, since both may contain characters NATS keys reject.

use crate::backlog::{Backlog, Parked, SenderBacklog};
use crate::envelope::Envelope;
use crate::error::StateError;
use crate::message::{DeadLetter, QueueMessage};
use crate::queue::{Acknowledger, Delivery, WorkQueue};
use crate::store::{
    ClaimOutcome, DeadLetterSink, DeliveryLedger, LockToken, SenderLock, SessionStore,
};
use async_nats::jetstream::{self, AckKind, consumer::pull, kv, stream};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures::StreamExt;
use mobility_relay_conversation::ConversationSession;
use mobility_relay_core::{CorrelationId, SenderAddress};
use rootcause::Report;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const WORK_STREAM_NAME: &str = "RELAY_WORK";
const WORK_SUBJECT: &str = "relay.inbound";
const WORK_CONSUMER_NAME: &str = "relay-workers";
const DEAD_LETTER_STREAM_NAME: &str = "RELAY_DEAD_LETTERS";
const DEAD_LETTER_SUBJECT: &str = "relay.dead";
const SESSIONS_BUCKET: &str = "relay-sessions";
const LOCKS_BUCKET: &str = "relay-locks";
const DELIVERIES_BUCKET: &str = "relay-deliveries";
const BACKLOG_BUCKET: &str = "relay-backlog";
const BACKLOG_WRITE_ATTEMPTS: usize = 5;

/// Configuration for the NATS-backed state.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// How long a delivered item stays invisible before NATS redelivers it.
    /// Must exceed the worker's per-item deadline.
    pub ack_wait: Duration,
    /// Lease on a sender lock.
    pub lock_ttl: Duration,
    /// How long an accepted message id is remembered.
    pub ledger_ttl: Duration,
    /// Idle sessions expire after this long; `None` keeps them forever.
    pub session_ttl: Option<Duration>,
    /// Backlogs of senders with no requeued work expire after this long.
    pub backlog_ttl: Duration,
}

impl NatsConfig {
    /// Creates a config with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ack_wait: Duration::from_secs(300),
            lock_ttl: Duration::from_secs(300),
            ledger_ttl: Duration::from_secs(24 * 60 * 60),
            session_ttl: None,
            backlog_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Every NATS-backed component, sharing one connection.
pub struct NatsState {
    pub queue: Arc<NatsWorkQueue>,
    pub sessions: Arc<NatsSessionStore>,
    pub locks: Arc<NatsSenderLock>,
    pub ledger: Arc<NatsDeliveryLedger>,
    pub backlog: Arc<NatsSenderBacklog>,
    pub dead_letters: Arc<NatsDeadLetters>,
}

impl NatsState {
    /// Connects and makes sure every stream, consumer and bucket exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or any setup step fails.
    #[instrument(skip_all, fields(url = %config.url))]
    pub async fn connect(config: &NatsConfig) -> Result<Self, Report<StateError>> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| StateError::ConnectionFailed {
                reason: e.to_string(),
            })?;
        let context = jetstream::new(client);

        let work_stream = ensure_stream(
            &context,
            stream::Config {
                name: WORK_STREAM_NAME.to_string(),
                subjects: vec![WORK_SUBJECT.to_string()],
                storage: stream::StorageType::File,
                retention: stream::RetentionPolicy::WorkQueue,
                duplicate_window: Duration::from_secs(120),
                ..Default::default()
            },
        )
        .await?;
        ensure_stream(
            &context,
            stream::Config {
                name: DEAD_LETTER_STREAM_NAME.to_string(),
                subjects: vec![DEAD_LETTER_SUBJECT.to_string()],
                storage: stream::StorageType::File,
                retention: stream::RetentionPolicy::Limits,
                ..Default::default()
            },
        )
        .await?;

        let consumer = work_stream
            .get_or_create_consumer(
                WORK_CONSUMER_NAME,
                pull::Config {
                    durable_name: Some(WORK_CONSUMER_NAME.to_string()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ack_wait: config.ack_wait,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| StateError::SetupFailed {
                resource: format!("consumer {WORK_CONSUMER_NAME}"),
                reason: e.to_string(),
            })?;

        let sessions = ensure_bucket(
            &context,
            SESSIONS_BUCKET,
            config.session_ttl.unwrap_or_default(),
        )
        .await?;
        let locks = ensure_bucket(&context, LOCKS_BUCKET, config.lock_ttl).await?;
        let deliveries = ensure_bucket(&context, DELIVERIES_BUCKET, config.ledger_ttl).await?;
        let backlog = ensure_bucket(&context, BACKLOG_BUCKET, config.backlog_ttl).await?;

        info!("NATS state ready");

        Ok(Self {
            queue: Arc::new(NatsWorkQueue {
                context: context.clone(),
                consumer,
            }),
            sessions: Arc::new(NatsSessionStore { store: sessions }),
            locks: Arc::new(NatsSenderLock { store: locks }),
            ledger: Arc::new(NatsDeliveryLedger { store: deliveries }),
            backlog: Arc::new(NatsSenderBacklog { store: backlog }),
            dead_letters: Arc::new(NatsDeadLetters { context }),
        })
    }
}

async fn ensure_stream(
    context: &jetstream::Context,
    config: stream::Config,
) -> Result<stream::Stream, StateError> {
    let name = config.name.clone();
    context
        .get_or_create_stream(config)
        .await
        .map_err(|e| StateError::SetupFailed {
            resource: format!("stream {name}"),
            reason: e.to_string(),
        })
}

async fn ensure_bucket(
    context: &jetstream::Context,
    bucket: &str,
    max_age: Duration,
) -> Result<kv::Store, StateError> {
    if let Ok(store) = context.get_key_value(bucket).await {
        // Existing buckets keep their settings; a changed TTL needs a manual edit.
        match store.status().await {
            Ok(status) if status.max_age() != max_age => warn!(
                bucket,
                configured_secs = max_age.as_secs(),
                actual_secs = status.max_age().as_secs(),
                "bucket max age differs from configuration"
            ),
            Ok(_) => {}
            Err(e) => warn!(bucket, error = %e, "failed to read bucket status"),
        }
        return Ok(store);
    }
    debug!(bucket, "creating key/value bucket");
    context
        .create_key_value(kv::Config {
            bucket: bucket.to_string(),
            history: 1,
            max_age,
            storage: stream::StorageType::File,
            ..Default::default()
        })
        .await
        .map_err(|e| StateError::SetupFailed {
            resource: format!("bucket {bucket}"),
            reason: e.to_string(),
        })
}

fn encode_key(raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

/// Work queue over a JetStream stream and durable pull consumer.
pub struct NatsWorkQueue {
    context: jetstream::Context,
    consumer: jetstream::consumer::Consumer<pull::Config>,
}

#[async_trait]
impl WorkQueue for NatsWorkQueue {
    #[instrument(skip_all, fields(correlation_id = %message.correlation_id))]
    async fn enqueue(&self, message: QueueMessage) -> Result<(), StateError> {
        let bytes = Envelope::new(&message)
            .to_json_bytes()
            .map_err(StateError::codec)?;

        // The stream's duplicate window drops a second publish with the same id.
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", message.correlation_id.as_str());

        self.context
            .publish_with_headers(WORK_SUBJECT, headers, bytes.into())
            .await
            .map_err(|e| StateError::backend("queue publish", e))?
            .await
            .map_err(|e| StateError::backend("queue publish ack", e))?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Delivery>, StateError> {
        let mut batch = self
            .consumer
            .batch()
            .max_messages(1)
            .expires(timeout)
            .messages()
            .await
            .map_err(|e| StateError::backend("queue fetch", e))?;

        let Some(next) = batch.next().await else {
            return Ok(None);
        };
        let message = next.map_err(|e| StateError::backend("queue fetch", e))?;

        let delivered = message
            .info()
            .map(|info| u32::try_from(info.delivered).unwrap_or(u32::MAX))
            .unwrap_or(1);

        let mut item = match Envelope::<QueueMessage>::from_json_bytes(&message.payload) {
            Ok(envelope) => envelope.into_payload(),
            Err(e) => {
                warn!(error = %e, "dropping undecodable queue item");
                message
                    .ack_with(AckKind::Term)
                    .await
                    .map_err(|e| StateError::backend("queue term", e))?;
                return Ok(None);
            }
        };
        item.delivery_count = delivered;

        Ok(Some(Delivery::new(item, Box::new(NatsAcker { message }))))
    }
}

struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acknowledger for NatsAcker {
    async fn ack(&self) -> Result<(), StateError> {
        self.message
            .double_ack()
            .await
            .map_err(|e| StateError::backend("queue ack", e))
    }

    async fn requeue(&self, delay: Duration) -> Result<(), StateError> {
        self.message
            .ack_with(AckKind::Nak(Some(delay)))
            .await
            .map_err(|e| StateError::backend("queue nak", e))
    }

    async fn terminate(&self) -> Result<(), StateError> {
        self.message
            .ack_with(AckKind::Term)
            .await
            .map_err(|e| StateError::backend("queue term", e))
    }
}

/// Session store over a KV bucket; the KV revision is the session version.
pub struct NatsSessionStore {
    store: kv::Store,
}

#[async_trait]
impl SessionStore for NatsSessionStore {
    async fn get(&self, address: &SenderAddress) -> Result<Option<ConversationSession>, StateError> {
        let entry = self
            .store
            .entry(encode_key(address.as_str()))
            .await
            .map_err(|e| StateError::backend("session get", e))?;
        let Some(entry) = entry.filter(|e| e.operation == kv::Operation::Put) else {
            return Ok(None);
        };

        let mut session = Envelope::<ConversationSession>::from_json_bytes(&entry.value)
            .map_err(StateError::codec)?
            .into_payload();
        session.version = entry.revision;
        Ok(Some(session))
    }

    #[instrument(skip_all, fields(sender = %session.address, version = session.version))]
    async fn put(&self, session: &ConversationSession) -> Result<u64, StateError> {
        let key = encode_key(session.address.as_str());
        let bytes = Envelope::new(session)
            .to_json_bytes()
            .map_err(StateError::codec)?;
        let conflict = StateError::VersionConflict {
            expected: session.version,
        };

        if session.version == 0 {
            return match self.store.create(&key, bytes.into()).await {
                Ok(revision) => Ok(revision),
                Err(e) if matches!(e.kind(), kv::CreateErrorKind::AlreadyExists) => Err(conflict),
                Err(e) => Err(StateError::backend("session create", e)),
            };
        }

        match self.store.update(&key, bytes.into(), session.version).await {
            Ok(revision) => Ok(revision),
            Err(e) if matches!(e.kind(), kv::UpdateErrorKind::WrongLastRevision) => Err(conflict),
            Err(e) => Err(StateError::backend("session update", e)),
        }
    }
}

/// Sender locks as KV entries; the bucket's max age is the lease.
pub struct NatsSenderLock {
    store: kv::Store,
}

#[async_trait]
impl SenderLock for NatsSenderLock {
    async fn try_acquire(&self, address: &SenderAddress) -> Result<Option<LockToken>, StateError> {
        let key = encode_key(address.as_str());
        match self.store.create(&key, Vec::new().into()).await {
            Ok(revision) => Ok(Some(LockToken {
                address: address.clone(),
                revision,
            })),
            Err(e) if matches!(e.kind(), kv::CreateErrorKind::AlreadyExists) => Ok(None),
            Err(e) => Err(StateError::backend("lock acquire", e)),
        }
    }

    async fn release(&self, token: LockToken) -> Result<(), StateError> {
        let key = encode_key(token.address.as_str());
        let Err(error) = self
            .store
            .delete_expect_revision(&key, Some(token.revision))
            .await
        else {
            return Ok(());
        };

        // The lease may have lapsed and the lock moved to another worker.
        let current = current_revision(&self.store, &key, "lock release").await?;
        if current == Some(token.revision) {
            return Err(StateError::backend("lock release", error));
        }
        warn!(sender = %token.address, "sender lock no longer held at release");
        Ok(())
    }
}

/// Revision of the live entry under `key`, if there is one.
async fn current_revision(
    store: &kv::Store,
    key: &str,
    operation: &'static str,
) -> Result<Option<u64>, StateError> {
    let entry = store
        .entry(key)
        .await
        .map_err(|e| StateError::backend(operation, e))?;
    Ok(entry
        .filter(|e| e.operation == kv::Operation::Put)
        .map(|e| e.revision))
}

/// Sender backlogs as one KV entry per sender, updated by compare-and-set.
pub struct NatsSenderBacklog {
    store: kv::Store,
}

impl NatsSenderBacklog {
    async fn load(&self, key: &str) -> Result<(Backlog, Option<u64>), StateError> {
        let entry = self
            .store
            .entry(key)
            .await
            .map_err(|e| StateError::backend("backlog get", e))?;
        match entry.filter(|e| e.operation == kv::Operation::Put) {
            Some(entry) => {
                let backlog = Envelope::<Backlog>::from_json_bytes(&entry.value)
                    .map_err(StateError::codec)?
                    .into_payload();
                Ok((backlog, Some(entry.revision)))
            }
            None => Ok((Backlog::default(), None)),
        }
    }

    /// Writes `backlog` if `key` is still at `revision`. Returns false when
    /// another worker wrote first.
    async fn save(
        &self,
        key: &str,
        backlog: &Backlog,
        revision: Option<u64>,
    ) -> Result<bool, StateError> {
        if backlog.is_empty() {
            let Some(revision) = revision else {
                return Ok(true);
            };
            return match self.store.delete_expect_revision(key, Some(revision)).await {
                Ok(()) => Ok(true),
                Err(e) => {
                    if current_revision(&self.store, key, "backlog delete").await? == Some(revision) {
                        Err(StateError::backend("backlog delete", e))
                    } else {
                        Ok(false)
                    }
                }
            };
        }

        let bytes = Envelope::new(backlog)
            .to_json_bytes()
            .map_err(StateError::codec)?;
        match revision {
            None => match self.store.create(key, bytes.into()).await {
                Ok(_) => Ok(true),
                Err(e) if matches!(e.kind(), kv::CreateErrorKind::AlreadyExists) => Ok(false),
                Err(e) => Err(StateError::backend("backlog create", e)),
            },
            Some(revision) => match self.store.update(key, bytes.into(), revision).await {
                Ok(_) => Ok(true),
                Err(e) if matches!(e.kind(), kv::UpdateErrorKind::WrongLastRevision) => Ok(false),
                Err(e) => Err(StateError::backend("backlog update", e)),
            },
        }
    }

    /// Applies `change` to the backlog of `address`, retrying lost races.
    async fn modify<T: Send>(
        &self,
        address: &SenderAddress,
        mut change: impl FnMut(&mut Backlog) -> T + Send,
    ) -> Result<T, StateError> {
        let key = encode_key(address.as_str());
        for _ in 0..BACKLOG_WRITE_ATTEMPTS {
            let (mut backlog, revision) = self.load(&key).await?;
            let result = change(&mut backlog);
            if self.save(&key, &backlog, revision).await? {
                return Ok(result);
            }
            debug!(sender = %address, "backlog changed concurrently, retrying");
        }
        Err(StateError::Backend {
            operation: "backlog update",
            reason: format!("lost {BACKLOG_WRITE_ATTEMPTS} concurrent updates in a row"),
        })
    }
}

#[async_trait]
impl SenderBacklog for NatsSenderBacklog {
    async fn parked(&self, address: &SenderAddress) -> Result<Vec<Parked>, StateError> {
        let (backlog, _) = self.load(&encode_key(address.as_str())).await?;
        Ok(backlog.entries)
    }

    #[instrument(skip_all, fields(correlation_id = %message.correlation_id, failed = failed))]
    async fn park(&self, message: &QueueMessage, failed: bool) -> Result<Parked, StateError> {
        self.modify(&message.sender, |backlog| backlog.park(message, failed))
            .await
    }

    async fn unpark(&self, address: &SenderAddress, id: &CorrelationId) -> Result<(), StateError> {
        self.modify(address, |backlog| {
            backlog.remove(id);
        })
        .await
    }
}

/// Delivery ledger as KV entries that expire with the bucket's max age.
pub struct NatsDeliveryLedger {
    store: kv::Store,
}

#[async_trait]
impl DeliveryLedger for NatsDeliveryLedger {
    async fn claim(&self, id: &CorrelationId) -> Result<ClaimOutcome, StateError> {
        match self.store.create(encode_key(id.as_str()), Vec::new().into()).await {
            Ok(_) => Ok(ClaimOutcome::Claimed),
            Err(e) if matches!(e.kind(), kv::CreateErrorKind::AlreadyExists) => Ok(ClaimOutcome::Duplicate),
            Err(e) => Err(StateError::backend("ledger claim", e)),
        }
    }

    async fn release(&self, id: &CorrelationId) -> Result<(), StateError> {
        self.store
            .delete(encode_key(id.as_str()))
            .await
            .map_err(|e| StateError::backend("ledger release", e))
    }
}

/// Dead letters published to their own stream.
pub struct NatsDeadLetters {
    context: jetstream::Context,
}

#[async_trait]
impl DeadLetterSink for NatsDeadLetters {
    #[instrument(skip_all, fields(correlation_id = %letter.message.correlation_id, reason = %letter.reason))]
    async fn record(&self, letter: DeadLetter) -> Result<(), StateError> {
        let bytes = Envelope::new(&letter)
            .to_json_bytes()
            .map_err(StateError::codec)?;
        self.context
            .publish(DEAD_LETTER_SUBJECT, bytes.into())
            .await
            .map_err(|e| StateError::backend("dead letter publish", e))?
            .await
            .map_err(|e| StateError::backend("dead letter publish ack", e))?;
        Ok(())
    }
}
