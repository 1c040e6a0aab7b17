//! The bounded tool-calling loop.
//!
//! Each iteration sends the recent transcript and the registry's tool
//! schemas to the model. A final answer ends the loop; tool calls are
//! executed in order and every outcome, success or failure, is appended as a
//! tool-result turn before the model is asked again.

use crate::backoff::Backoff;
use crate::config::WorkerConfig;
use mobility_relay_ai::{ChatMessage, ChatRequest, ChatResponse, ChatToolCall, LlmBackend, LlmError};
use mobility_relay_conversation::{ConversationSession, ToolCall, ToolCallRecord, Turn, TurnRole};
use mobility_relay_tools::{ToolExecutionError, ToolInvoker, ToolRegistry};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Why the loop ended without a model answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The model kept failing after retries.
    ModelUnavailable(LlmError),
    /// The model was still calling tools after the last iteration.
    LoopExhausted,
    /// The model answered with no text.
    EmptyAnswer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyKind {
    Answered,
    Fallback(FallbackReason),
}

/// The text to send back, and how it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub text: String,
    pub kind: ReplyKind,
    /// Model calls made.
    pub iterations: u32,
}

impl AgentReply {
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self.kind, ReplyKind::Fallback(_))
    }
}

/// Runs the tool-calling loop for one inbound message.
pub struct ConversationAgent {
    llm: Arc<dyn LlmBackend>,
    invoker: Arc<dyn ToolInvoker>,
    registry: Arc<ToolRegistry>,
    system_prompt: String,
    fallback_reply: String,
    max_iterations: u32,
    context_turns: usize,
    model_attempts: u32,
    backoff: Backoff,
}

impl ConversationAgent {
    #[must_use]
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        invoker: Arc<dyn ToolInvoker>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        let defaults = WorkerConfig::default();
        Self {
            llm,
            invoker,
            registry,
            system_prompt: defaults.system_prompt,
            fallback_reply: defaults.fallback_reply,
            max_iterations: defaults.max_iterations,
            context_turns: defaults.context_turns,
            model_attempts: defaults.model_attempts,
            backoff: defaults.backoff,
        }
    }

    /// Applies the loop-related worker settings.
    #[must_use]
    pub fn configured(mut self, config: &WorkerConfig) -> Self {
        self.system_prompt.clone_from(&config.system_prompt);
        self.fallback_reply.clone_from(&config.fallback_reply);
        self.max_iterations = config.max_iterations.max(1);
        self.context_turns = config.context_turns.max(1);
        self.model_attempts = config.model_attempts.max(1);
        self.backoff = config.backoff;
        self
    }

    /// Answers the last user turn of `session`, appending every assistant
    /// and tool turn the loop produces, including the final reply.
    #[instrument(skip_all, fields(sender = %session.address, model = self.llm.model()))]
    pub async fn respond(&self, session: &mut ConversationSession) -> AgentReply {
        for iteration in 1..=self.max_iterations {
            let response = match self.complete(session).await {
                Ok(response) => response,
                Err(error) => {
                    warn!(%error, iteration, "model unavailable, sending fallback");
                    return self.fallback(session, FallbackReason::ModelUnavailable(error), iteration);
                }
            };

            if response.is_final() {
                let text = response.content.trim();
                if text.is_empty() {
                    return self.fallback(session, FallbackReason::EmptyAnswer, iteration);
                }
                session.push_turn(Turn::assistant(text));
                info!(iteration, "model answered");
                return AgentReply {
                    text: text.to_string(),
                    kind: ReplyKind::Answered,
                    iterations: iteration,
                };
            }

            let calls: Vec<ToolCall> = response
                .tool_calls
                .into_iter()
                .map(|call| ToolCall::new(call.id, call.name, call.arguments))
                .collect();
            debug!(iteration, calls = calls.len(), "model requested tools");
            session.push_turn(Turn::assistant_tool_calls(response.content, calls.clone()));
            session.pending_tool_calls = calls.len();

            for call in &calls {
                let outcome = self.execute(call).await;
                session.push_turn(ToolCallRecord::new(call, outcome).into_turn());
                session.pending_tool_calls -= 1;
            }
        }

        warn!(max_iterations = self.max_iterations, "tool loop exhausted");
        self.fallback(session, FallbackReason::LoopExhausted, self.max_iterations)
    }

    async fn complete(&self, session: &ConversationSession) -> Result<ChatResponse, LlmError> {
        let messages = to_chat_messages(session.context_window(self.context_turns));
        let mut request = ChatRequest::new(messages, self.registry.tool_schemas());
        if !self.system_prompt.trim().is_empty() {
            request = request.with_system(&self.system_prompt);
        }

        self.backoff
            .retry(self.model_attempts, LlmError::is_retryable, |attempt| {
                let request = &request;
                async move {
                    let result = self.llm.complete(request).await;
                    if let Err(error) = &result {
                        warn!(%error, attempt, "model call failed");
                    }
                    result
                }
            })
            .await
    }

    #[instrument(skip_all, fields(tool = %call.name))]
    async fn execute(&self, call: &ToolCall) -> Result<JsonValue, ToolExecutionError> {
        let tool = self.registry.resolve(&call.name)?;
        let outcome = self.invoker.invoke(tool, &call.arguments).await;
        match &outcome {
            Ok(_) => debug!("tool call succeeded"),
            Err(error) => warn!(%error, kind = error.kind(), "tool call failed"),
        }
        outcome
    }

    fn fallback(
        &self,
        session: &mut ConversationSession,
        reason: FallbackReason,
        iterations: u32,
    ) -> AgentReply {
        session.pending_tool_calls = 0;
        session.push_turn(Turn::assistant(self.fallback_reply.as_str()));
        AgentReply {
            text: self.fallback_reply.clone(),
            kind: ReplyKind::Fallback(reason),
            iterations,
        }
    }
}

/// Maps transcript turns to model messages.
fn to_chat_messages(turns: &[Turn]) -> Vec<ChatMessage> {
    turns
        .iter()
        .filter_map(|turn| match turn.role {
            TurnRole::User => Some(ChatMessage::user(turn.content.as_str())),
            TurnRole::Assistant => {
                let calls = turn
                    .tool_calls
                    .iter()
                    .map(|call| ChatToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    })
                    .collect();
                Some(ChatMessage::assistant(turn.content.as_str()).with_tool_calls(calls))
            }
            TurnRole::Tool => turn.tool_result.as_ref().map(|result| {
                ChatMessage::tool(
                    result.tool_call_id.as_str(),
                    result.tool_name.as_str(),
                    turn.content.as_str(),
                )
            }),
        })
        .collect()
}
