//! Transcript turns.

use chrono::{DateTime, Utc};
use mobility_relay_core::{CorrelationId, TurnId};
use mobility_relay_tools::ToolExecutionError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// Inbound message from the sender.
    User,
    /// Model output: a final answer or a batch of tool calls.
    Assistant,
    /// Result of one tool call.
    Tool,
}

/// One entry in a conversation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn identifier.
    pub id: TurnId,
    /// Turn role.
    pub role: TurnRole,
    /// Text content. For tool turns this is the JSON payload shown to the
    /// model.
    pub content: String,
    /// When the turn was appended.
    pub timestamp: DateTime<Utc>,
    /// Tool calls requested by the model (assistant turns only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Which call this turn answers (tool turns only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    /// Inbound message this turn was created from (user turns only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

impl Turn {
    fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            id: TurnId::new(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            tool_calls: Vec::new(),
            tool_result: None,
            correlation_id: None,
        }
    }

    /// Creates a user turn for an inbound message.
    #[must_use]
    pub fn user(content: impl Into<String>, correlation_id: CorrelationId) -> Self {
        let mut turn = Self::new(TurnRole::User, content);
        turn.correlation_id = Some(correlation_id);
        turn
    }

    /// Creates an assistant turn.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }

    /// Creates an assistant turn carrying tool calls.
    #[must_use]
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut turn = Self::new(TurnRole::Assistant, content);
        turn.tool_calls = tool_calls;
        turn
    }

    /// Returns true if this is a final assistant answer.
    #[must_use]
    pub fn is_final_answer(&self) -> bool {
        self.role == TurnRole::Assistant && self.tool_calls.is_empty()
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Model-assigned call identifier.
    pub id: String,
    /// The tool name.
    pub name: String,
    /// Arguments for the tool.
    pub arguments: JsonValue,
}

impl ToolCall {
    /// Creates a new tool call.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: JsonValue) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Links a tool turn to the call it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The tool call ID this result is for.
    pub tool_call_id: String,
    /// The tool that was called.
    pub tool_name: String,
    /// Error summary if the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one tool invocation within a loop iteration.
///
/// Not persisted; [`ToolCallRecord::into_turn`] folds it into the transcript.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: JsonValue,
    pub outcome: Result<JsonValue, ToolExecutionError>,
}

impl ToolCallRecord {
    /// Records the outcome of `call`.
    #[must_use]
    pub fn new(call: &ToolCall, outcome: Result<JsonValue, ToolExecutionError>) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            outcome,
        }
    }

    /// The payload shown to the model: the upstream response, or a
    /// structured error description.
    #[must_use]
    pub fn payload(&self) -> JsonValue {
        match &self.outcome {
            Ok(value) => value.clone(),
            Err(error) => error.to_model_payload(),
        }
    }

    /// Converts the record into a tool-result turn.
    #[must_use]
    pub fn into_turn(self) -> Turn {
        let content = self.payload().to_string();
        let mut turn = Turn::new(TurnRole::Tool, content);
        turn.tool_result = Some(ToolResult {
            tool_call_id: self.call_id,
            tool_name: self.tool_name,
            error: self.outcome.err().map(|e| e.to_string()),
        });
        turn
    }
}
