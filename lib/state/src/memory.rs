//! In-memory implementations of the queue and stores, for tests and local
//! runs without NATS.
//!
//! Deliveries have no lease: an item that is never settled stays in flight.

use crate::backlog::{Backlog, Parked, SenderBacklog};
use crate::error::StateError;
use crate::message::{DeadLetter, QueueMessage};
use crate::queue::{Acknowledger, Delivery, WorkQueue};
use crate::store::{
    ClaimOutcome, DeadLetterSink, DeliveryLedger, LockToken, SenderLock, SessionStore,
};
use async_trait::async_trait;
use mobility_relay_conversation::ConversationSession;
use mobility_relay_core::{CorrelationId, SenderAddress};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

#[derive(Default)]
struct QueueState {
    ready: VecDeque<QueueMessage>,
    delayed: Vec<(Instant, QueueMessage)>,
    in_flight: usize,
    acked: Vec<CorrelationId>,
    terminated: Vec<CorrelationId>,
}

impl QueueState {
    fn promote_due(&mut self, now: Instant) {
        if self.delayed.is_empty() {
            return;
        }
        self.delayed.sort_by_key(|(at, _)| *at);
        let due = self.delayed.partition_point(|(at, _)| *at <= now);
        for (_, message) in self.delayed.drain(..due) {
            self.ready.push_back(message);
        }
    }

    fn next_wake(&self) -> Option<Instant> {
        self.delayed.iter().map(|(at, _)| *at).min()
    }
}

#[derive(Default)]
struct QueueShared {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// FIFO queue held in process memory.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    shared: Arc<QueueShared>,
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items waiting, including delayed ones.
    pub async fn len(&self) -> usize {
        let state = self.shared.state.lock().await;
        state.ready.len() + state.delayed.len()
    }

    /// Returns true when nothing is waiting.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of items handed out and not yet settled.
    pub async fn in_flight(&self) -> usize {
        self.shared.state.lock().await.in_flight
    }

    /// Correlation ids of acknowledged items, in order.
    pub async fn acked(&self) -> Vec<CorrelationId> {
        self.shared.state.lock().await.acked.clone()
    }

    /// Correlation ids of terminated items, in order.
    pub async fn terminated(&self) -> Vec<CorrelationId> {
        self.shared.state.lock().await.terminated.clone()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, message: QueueMessage) -> Result<(), StateError> {
        self.shared.state.lock().await.ready.push_back(message);
        self.shared.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Delivery>, StateError> {
        let deadline = Instant::now() + timeout;
        loop {
            let wake = {
                let mut state = self.shared.state.lock().await;
                state.promote_due(Instant::now());
                if let Some(mut message) = state.ready.pop_front() {
                    message.delivery_count += 1;
                    state.in_flight += 1;
                    let acker = MemoryAcker {
                        shared: Arc::clone(&self.shared),
                        message: message.clone(),
                    };
                    return Ok(Some(Delivery::new(message, Box::new(acker))));
                }
                state.next_wake().map_or(deadline, |at| at.min(deadline))
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }
            // Either an enqueue or the next delayed item wakes us.
            let _ = tokio::time::timeout_at(wake, self.shared.notify.notified()).await;
        }
    }
}

struct MemoryAcker {
    shared: Arc<QueueShared>,
    message: QueueMessage,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), StateError> {
        let mut state = self.shared.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        state.acked.push(self.message.correlation_id.clone());
        Ok(())
    }

    async fn requeue(&self, delay: Duration) -> Result<(), StateError> {
        {
            let mut state = self.shared.state.lock().await;
            state.in_flight = state.in_flight.saturating_sub(1);
            if delay.is_zero() {
                state.ready.push_back(self.message.clone());
            } else {
                state
                    .delayed
                    .push((Instant::now() + delay, self.message.clone()));
            }
        }
        self.shared.notify.notify_one();
        Ok(())
    }

    async fn terminate(&self) -> Result<(), StateError> {
        let mut state = self.shared.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        state.terminated.push(self.message.correlation_id.clone());
        Ok(())
    }
}

/// Session store held in process memory. Revisions count writes per key.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<Mutex<HashMap<SenderAddress, ConversationSession>>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored session without going through the trait.
    pub async fn snapshot(&self, address: &SenderAddress) -> Option<ConversationSession> {
        self.sessions.lock().await.get(address).cloned()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, address: &SenderAddress) -> Result<Option<ConversationSession>, StateError> {
        Ok(self.sessions.lock().await.get(address).cloned())
    }

    async fn put(&self, session: &ConversationSession) -> Result<u64, StateError> {
        let mut sessions = self.sessions.lock().await;
        let current = sessions.get(&session.address).map_or(0, |s| s.version);
        if current != session.version {
            return Err(StateError::VersionConflict {
                expected: session.version,
            });
        }
        let mut stored = session.clone();
        stored.version = current + 1;
        sessions.insert(session.address.clone(), stored);
        Ok(current + 1)
    }
}

/// Sender locks held in process memory, without lease expiry.
#[derive(Clone, Default)]
pub struct MemorySenderLock {
    inner: Arc<Mutex<(u64, HashMap<SenderAddress, u64>)>>,
}

impl MemorySenderLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while someone holds the lock for `address`.
    pub async fn is_locked(&self, address: &SenderAddress) -> bool {
        self.inner.lock().await.1.contains_key(address)
    }
}

#[async_trait]
impl SenderLock for MemorySenderLock {
    async fn try_acquire(&self, address: &SenderAddress) -> Result<Option<LockToken>, StateError> {
        let mut guard = self.inner.lock().await;
        let (counter, held) = &mut *guard;
        if held.contains_key(address) {
            return Ok(None);
        }
        *counter += 1;
        held.insert(address.clone(), *counter);
        Ok(Some(LockToken {
            address: address.clone(),
            revision: *counter,
        }))
    }

    async fn release(&self, token: LockToken) -> Result<(), StateError> {
        let mut guard = self.inner.lock().await;
        if guard.1.get(&token.address) == Some(&token.revision) {
            guard.1.remove(&token.address);
        }
        Ok(())
    }
}

/// Delivery ledger held in process memory, without expiry.
#[derive(Clone, Default)]
pub struct MemoryDeliveryLedger {
    claimed: Arc<Mutex<HashSet<CorrelationId>>>,
}

impl MemoryDeliveryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, id: &CorrelationId) -> bool {
        self.claimed.lock().await.contains(id)
    }
}

#[async_trait]
impl DeliveryLedger for MemoryDeliveryLedger {
    async fn claim(&self, id: &CorrelationId) -> Result<ClaimOutcome, StateError> {
        if self.claimed.lock().await.insert(id.clone()) {
            Ok(ClaimOutcome::Claimed)
        } else {
            Ok(ClaimOutcome::Duplicate)
        }
    }

    async fn release(&self, id: &CorrelationId) -> Result<(), StateError> {
        self.claimed.lock().await.remove(id);
        Ok(())
    }
}

/// Dead letters collected in process memory.
#[derive(Clone, Default)]
pub struct MemoryDeadLetters {
    letters: Arc<Mutex<Vec<DeadLetter>>>,
}

impl MemoryDeadLetters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().await.clone()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetters {
    async fn record(&self, letter: DeadLetter) -> Result<(), StateError> {
        self.letters.lock().await.push(letter);
        Ok(())
    }
}

/// Sender backlogs held in process memory.
#[derive(Clone, Default)]
pub struct MemorySenderBacklog {
    backlogs: Arc<Mutex<HashMap<SenderAddress, Backlog>>>,
}

impl MemorySenderBacklog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SenderBacklog for MemorySenderBacklog {
    async fn parked(&self, address: &SenderAddress) -> Result<Vec<Parked>, StateError> {
        Ok(self
            .backlogs
            .lock()
            .await
            .get(address)
            .map(|b| b.entries.clone())
            .unwrap_or_default())
    }

    async fn park(&self, message: &QueueMessage, failed: bool) -> Result<Parked, StateError> {
        let mut backlogs = self.backlogs.lock().await;
        Ok(backlogs
            .entry(message.sender.clone())
            .or_default()
            .park(message, failed))
    }

    async fn unpark(&self, address: &SenderAddress, id: &CorrelationId) -> Result<(), StateError> {
        let mut backlogs = self.backlogs.lock().await;
        if let Some(backlog) = backlogs.get_mut(address) {
            backlog.remove(id);
            if backlog.is_empty() {
                backlogs.remove(address);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mobility_relay_conversation::Turn;

    fn message(id: &str) -> QueueMessage {
        QueueMessage::new(
            CorrelationId::from_provider("infobip", id),
            SenderAddress::new("385911234567"),
            format!("text {id}"),
            serde_json::Value::Null,
        )
    }

    #[tokio::test]
    async fn dequeue_is_fifo_and_counts_deliveries() {
        let queue = MemoryQueue::new();
        queue.enqueue(message("a")).await.expect("enqueue");
        queue.enqueue(message("b")).await.expect("enqueue");

        let first = queue
            .dequeue(Duration::from_millis(10))
            .await
            .expect("dequeue")
            .expect("item");
        assert_eq!(first.message.correlation_id.as_str(), "infobip:a");
        assert_eq!(first.message.delivery_count, 1);
        assert_eq!(queue.in_flight().await, 1);

        first.ack().await.expect("ack");
        assert_eq!(queue.in_flight().await, 0);
        assert_eq!(queue.acked().await, vec![CorrelationId::from("infobip:a")]);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn empty_dequeue_times_out() {
        let queue = MemoryQueue::new();
        let started = Instant::now();
        let delivery = queue
            .dequeue(Duration::from_millis(20))
            .await
            .expect("dequeue");
        assert!(delivery.is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn requeued_item_returns_after_delay_with_higher_count() {
        let queue = MemoryQueue::new();
        queue.enqueue(message("a")).await.expect("enqueue");

        let delivery = queue
            .dequeue(Duration::from_millis(10))
            .await
            .expect("dequeue")
            .expect("item");
        delivery
            .requeue(Duration::from_millis(30))
            .await
            .expect("requeue");

        assert!(
            queue
                .dequeue(Duration::from_millis(1))
                .await
                .expect("dequeue")
                .is_none()
        );

        let again = queue
            .dequeue(Duration::from_millis(500))
            .await
            .expect("dequeue")
            .expect("item after delay");
        assert_eq!(again.message.delivery_count, 2);
    }

    #[tokio::test]
    async fn waiting_dequeue_wakes_on_enqueue() {
        let queue = MemoryQueue::new();
        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.enqueue(message("late")).await.expect("enqueue");
        });

        let delivery = queue
            .dequeue(Duration::from_secs(2))
            .await
            .expect("dequeue");
        assert!(delivery.is_some());
    }

    #[tokio::test]
    async fn terminate_records_item() {
        let queue = MemoryQueue::new();
        queue.enqueue(message("a")).await.expect("enqueue");
        let delivery = queue
            .dequeue(Duration::from_millis(10))
            .await
            .expect("dequeue")
            .expect("item");
        delivery.terminate().await.expect("terminate");
        assert_eq!(queue.terminated().await.len(), 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn session_put_checks_version() {
        let store = MemorySessionStore::new();
        let address = SenderAddress::new("385911234567");
        let mut session = ConversationSession::new(address.clone());
        session.push_turn(Turn::user("hi", CorrelationId::from("infobip:hi")));

        assert_eq!(store.put(&session).await.expect("create"), 1);

        // A second writer that also read "nothing stored" must lose.
        let err = store.put(&session).await.unwrap_err();
        assert_eq!(err, StateError::VersionConflict { expected: 0 });

        let mut loaded = store.get(&address).await.expect("get").expect("stored");
        assert_eq!(loaded.version, 1);
        loaded.push_turn(Turn::assistant("hello"));
        assert_eq!(store.put(&loaded).await.expect("update"), 2);
        assert_eq!(store.snapshot(&address).await.expect("stored").turn_count(), 2);
    }

    #[tokio::test]
    async fn sender_lock_is_exclusive_until_released() {
        let locks = MemorySenderLock::new();
        let address = SenderAddress::new("385911234567");

        let token = locks
            .try_acquire(&address)
            .await
            .expect("acquire")
            .expect("free");
        assert!(locks.try_acquire(&address).await.expect("acquire").is_none());
        assert!(
            locks
                .try_acquire(&SenderAddress::new("385917654321"))
                .await
                .expect("acquire")
                .is_some()
        );

        locks.release(token).await.expect("release");
        assert!(!locks.is_locked(&address).await);
    }

    #[tokio::test]
    async fn stale_token_does_not_release_new_holder() {
        let locks = MemorySenderLock::new();
        let address = SenderAddress::new("385911234567");
        let first = locks.try_acquire(&address).await.expect("acquire").expect("free");
        let stale = first.clone();
        locks.release(first).await.expect("release");
        let _second = locks.try_acquire(&address).await.expect("acquire").expect("free");

        locks.release(stale).await.expect("release");
        assert!(locks.is_locked(&address).await);
    }

    #[tokio::test]
    async fn ledger_reports_duplicates_until_released() {
        let ledger = MemoryDeliveryLedger::new();
        let id = CorrelationId::from("infobip:abc");
        assert_eq!(ledger.claim(&id).await.expect("claim"), ClaimOutcome::Claimed);
        assert_eq!(ledger.claim(&id).await.expect("claim"), ClaimOutcome::Duplicate);
        ledger.release(&id).await.expect("release");
        assert_eq!(ledger.claim(&id).await.expect("claim"), ClaimOutcome::Claimed);
    }

    #[tokio::test]
    async fn backlog_tracks_parked_messages_per_sender() {
        let backlog = MemorySenderBacklog::new();
        let a = message("a");
        let b = message("b");
        backlog.park(&a, false).await.expect("park");
        backlog.park(&b, false).await.expect("park");
        let failed = backlog.park(&a, true).await.expect("park");
        assert_eq!(failed.failures, 1);

        let parked = backlog.parked(&a.sender).await.expect("parked");
        let ids: Vec<&str> = parked.iter().map(|p| p.correlation_id.as_str()).collect();
        assert_eq!(ids, ["infobip:a", "infobip:b"]);

        backlog.unpark(&a.sender, &a.correlation_id).await.expect("unpark");
        backlog.unpark(&b.sender, &b.correlation_id).await.expect("unpark");
        assert!(backlog.parked(&a.sender).await.expect("parked").is_empty());
    }
}
