//! Conversation sessions.
//!
//! A session is the durable, per-sender transcript. It is only mutated by a
//! worker holding that sender's lock and is written back with an expected
//! `version`, so a concurrent writer is detected rather than overwritten.

use crate::message::{Turn, TurnRole};
use chrono::{DateTime, Utc};
use mobility_relay_core::{CorrelationId, SenderAddress};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Ids of compacted user turns remembered for duplicate detection.
const REMEMBERED_IDS: usize = 256;

/// A reply that has been produced and persisted but not yet confirmed sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReply {
    /// Inbound message the reply answers.
    pub correlation_id: CorrelationId,
    /// Reply text.
    pub text: String,
}

/// Conversation state for one sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    /// The sender this session belongs to.
    pub address: SenderAddress,
    /// Ordered transcript.
    pub turns: Vec<Turn>,
    /// Tool calls still outstanding in the current loop iteration.
    #[serde(default)]
    pub pending_tool_calls: usize,
    /// When the session last changed.
    pub last_activity: DateTime<Utc>,
    /// Store revision this copy was read at; 0 for a session never stored.
    #[serde(default)]
    pub version: u64,
    /// Reply outbox.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_reply: Option<PendingReply>,
    /// Inbound messages whose turns were compacted away, oldest first.
    #[serde(default, skip_serializing_if = "VecDeque::is_empty")]
    pub answered: VecDeque<CorrelationId>,
}

impl ConversationSession {
    /// Creates an empty session for `address`.
    #[must_use]
    pub fn new(address: SenderAddress) -> Self {
        Self {
            address,
            turns: Vec::new(),
            pending_tool_calls: 0,
            last_activity: Utc::now(),
            version: 0,
            pending_reply: None,
            answered: VecDeque::new(),
        }
    }

    /// Appends a turn to the transcript.
    pub fn push_turn(&mut self, turn: Turn) {
        self.last_activity = turn.timestamp;
        self.turns.push(turn);
    }

    /// Returns the number of turns.
    #[must_use]
    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Returns the last turn, if any.
    #[must_use]
    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Returns true if the inbound message has already been folded into the
    /// transcript.
    #[must_use]
    pub fn has_processed(&self, correlation_id: &CorrelationId) -> bool {
        self.turns
            .iter()
            .rev()
            .any(|turn| turn.role == TurnRole::User && turn.correlation_id.as_ref() == Some(correlation_id))
            || self.answered.contains(correlation_id)
    }

    /// Drops whole exchanges from the front of the transcript until at most
    /// `max_turns` turns remain and their encoded size is within
    /// `max_bytes`. The latest exchange is always kept, whatever its size.
    ///
    /// Ids of dropped user turns are remembered so a late redelivery is
    /// still recognized. Returns the number of dropped turns.
    pub fn compact(&mut self, max_turns: usize, max_bytes: usize) -> usize {
        let sizes: Vec<usize> = self
            .turns
            .iter()
            .map(|turn| serde_json::to_vec(turn).map_or(0, |bytes| bytes.len()))
            .collect();
        let mut bytes: usize = sizes.iter().sum();
        let mut dropped = 0;

        while self.turns.len() - dropped > max_turns || bytes > max_bytes {
            let Some(offset) = self.turns[dropped + 1..]
                .iter()
                .position(|turn| turn.role == TurnRole::User)
            else {
                break;
            };
            let next = dropped + 1 + offset;
            bytes -= sizes[dropped..next].iter().sum::<usize>();
            dropped = next;
        }

        for turn in self.turns.drain(..dropped) {
            if let (TurnRole::User, Some(id)) = (turn.role, turn.correlation_id) {
                if self.answered.len() == REMEMBERED_IDS {
                    self.answered.pop_front();
                }
                self.answered.push_back(id);
            }
        }
        dropped
    }

    /// Stores `text` as the unsent reply to `correlation_id`.
    pub fn stage_reply(&mut self, correlation_id: CorrelationId, text: impl Into<String>) {
        self.pending_reply = Some(PendingReply {
            correlation_id,
            text: text.into(),
        });
    }

    /// Returns the unsent reply to `correlation_id`, if there is one.
    #[must_use]
    pub fn pending_reply_for(&self, correlation_id: &CorrelationId) -> Option<&PendingReply> {
        self.pending_reply
            .as_ref()
            .filter(|reply| &reply.correlation_id == correlation_id)
    }

    /// Clears the outbox once the reply to `correlation_id` is confirmed sent.
    /// Returns true if something was cleared.
    pub fn confirm_reply(&mut self, correlation_id: &CorrelationId) -> bool {
        if self.pending_reply_for(correlation_id).is_some() {
            self.pending_reply = None;
            true
        } else {
            false
        }
    }

    /// Returns at most `max_turns` recent turns, starting at a user turn so
    /// that tool results are never separated from the call that produced
    /// them.
    ///
    /// If no user turn falls inside the window, the window is widened back to
    /// the most recent user turn.
    #[must_use]
    pub fn context_window(&self, max_turns: usize) -> &[Turn] {
        let is_user = |turn: &Turn| turn.role == TurnRole::User;
        let start = self.turns.len().saturating_sub(max_turns);
        let aligned = self.turns[start..]
            .iter()
            .position(is_user)
            .map(|offset| start + offset)
            .or_else(|| self.turns[..start].iter().rposition(is_user))
            .unwrap_or(0);
        &self.turns[aligned..]
    }
}
