//! Scripted collaborators for worker tests.

use async_trait::async_trait;
use mobility_relay_ai::{ChatRequest, ChatResponse, ChatRole, ChatToolCall, LlmBackend, LlmError};
use mobility_relay_conversation::{ConversationSession, Turn};
use mobility_relay_core::SenderAddress;
use mobility_relay_messaging::{ReplySender, SendError};
use mobility_relay_state::{MemorySessionStore, SessionStore, StateError};
use mobility_relay_tools::{ToolDefinition, ToolExecutionError, ToolInvoker, ToolRegistry};
use serde_json::{Value as JsonValue, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the scripted model saw on one call.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub system: Option<String>,
    pub roles: Vec<ChatRole>,
    pub last_content: String,
    pub tool_count: usize,
}

/// Model stub answering from a script, then repeating `otherwise`.
#[derive(Default)]
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
    otherwise: Option<ChatResponse>,
    delay: Option<Duration>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Result<ChatResponse, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// Answers every call with `response`.
    pub fn always(response: ChatResponse) -> Self {
        Self {
            otherwise: Some(response),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmBackend for ScriptedLlm {
    async fn complete(&self, request: &ChatRequest<'_>) -> Result<ChatResponse, LlmError> {
        self.seen.lock().unwrap().push(SeenRequest {
            system: request.system.map(str::to_string),
            roles: request.messages.iter().map(|m| m.role).collect(),
            last_content: request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default(),
            tool_count: request.tools.len(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match (next, &self.otherwise) {
            (Some(result), _) => result,
            (None, Some(response)) => Ok(response.clone()),
            (None, None) => Ok(ChatResponse::answer("script exhausted")),
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Tool stub returning a fixed payload and counting calls.
pub struct FixedInvoker {
    payload: JsonValue,
    calls: Mutex<Vec<(String, JsonValue)>>,
}

impl FixedInvoker {
    pub fn new(payload: JsonValue) -> Self {
        Self {
            payload,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, JsonValue)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolInvoker for FixedInvoker {
    async fn invoke(
        &self,
        tool: &ToolDefinition,
        arguments: &JsonValue,
    ) -> Result<JsonValue, ToolExecutionError> {
        self.calls
            .lock()
            .unwrap()
            .push((tool.name.clone(), arguments.clone()));
        Ok(self.payload.clone())
    }
}

/// Reply sender that records messages, optionally failing every send.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(SenderAddress, String)>>,
    fail_with: Option<SendError>,
    attempts: Mutex<u32>,
}

impl RecordingSender {
    pub fn failing(error: SendError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(SenderAddress, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, text)| text).collect()
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl ReplySender for RecordingSender {
    async fn send(&self, to: &SenderAddress, text: &str) -> Result<(), SendError> {
        *self.attempts.lock().unwrap() += 1;
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.clone(), text.to_string()));
        Ok(())
    }
}

/// Misbehaviour injected into the next session write.
pub enum PutFault {
    /// The write fails with this error.
    Fail(StateError),
    /// Another writer stores the session first, with this assistant turn.
    ConcurrentWrite(String),
}

/// Session store over a [`MemorySessionStore`] whose next writes misbehave.
pub struct FaultySessions {
    inner: MemorySessionStore,
    faults: Mutex<VecDeque<PutFault>>,
}

impl FaultySessions {
    pub fn new(inner: MemorySessionStore, faults: Vec<PutFault>) -> Self {
        Self {
            inner,
            faults: Mutex::new(faults.into()),
        }
    }
}

#[async_trait]
impl SessionStore for FaultySessions {
    async fn get(&self, address: &SenderAddress) -> Result<Option<ConversationSession>, StateError> {
        self.inner.get(address).await
    }

    async fn put(&self, session: &ConversationSession) -> Result<u64, StateError> {
        let fault = self.faults.lock().unwrap().pop_front();
        match fault {
            Some(PutFault::Fail(error)) => Err(error),
            Some(PutFault::ConcurrentWrite(text)) => {
                let mut other = self
                    .inner
                    .get(&session.address)
                    .await?
                    .unwrap_or_else(|| ConversationSession::new(session.address.clone()));
                other.push_turn(Turn::assistant(text));
                self.inner.put(&other).await?;
                self.inner.put(session).await
            }
            None => self.inner.put(session).await,
        }
    }
}

/// Registry with `getBookingStatus` (GET /bookings/{bookingId}).
pub fn booking_registry() -> Arc<ToolRegistry> {
    let document = json!({
        "openapi": "3.0.3",
        "info": { "title": "Mobility", "version": "1" },
        "paths": {
            "/bookings/{bookingId}": {
                "get": {
                    "operationId": "getBookingStatus",
                    "summary": "Get the status of a booking",
                    "parameters": [{
                        "name": "bookingId",
                        "in": "path",
                        "required": true,
                        "schema": { "type": "string" }
                    }]
                }
            }
        }
    });
    Arc::new(ToolRegistry::from_document(&document).unwrap())
}

pub fn booking_call(id: &str) -> ChatResponse {
    ChatResponse::tool_calls(vec![ChatToolCall {
        id: id.to_string(),
        name: "getBookingStatus".to_string(),
        arguments: json!({ "bookingId": "123" }),
    }])
}
