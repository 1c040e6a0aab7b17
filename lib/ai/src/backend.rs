//! LLM backend abstraction.
//!
//! The worker builds a [`ChatRequest`] from the session transcript and the
//! registry's tool schemas; a backend answers with a [`ChatResponse`].

use crate::error::LlmError;
use async_trait::async_trait;
use mobility_relay_tools::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    /// Wire name of the role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool call requested by the model, with arguments already decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatToolCall {
    pub id: String,
    pub name: String,
    pub arguments: JsonValue,
}

/// One message of the transcript sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Calls requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ChatToolCall>,
    /// The call a tool message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name, for tool messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    /// Creates a tool-result message.
    #[must_use]
    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut message = Self::new(ChatRole::Tool, content);
        message.tool_call_id = Some(tool_call_id.into());
        message.name = Some(name.into());
        message
    }

    /// Attaches tool calls to an assistant message.
    #[must_use]
    pub fn with_tool_calls(mut self, tool_calls: Vec<ChatToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

/// A request to the model.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    /// System prompt, sent first.
    pub system: Option<&'a str>,
    /// Transcript, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Tools the model may call.
    pub tools: &'a [ToolDefinition],
}

impl<'a> ChatRequest<'a> {
    /// Creates a request without a system prompt.
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>, tools: &'a [ToolDefinition]) -> Self {
        Self {
            system: None,
            messages,
            tools,
        }
    }

    /// Adds a system prompt.
    #[must_use]
    pub fn with_system(mut self, system: &'a str) -> Self {
        self.system = Some(system);
        self
    }
}

/// A response from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Text content; the answer when there are no tool calls.
    pub content: String,
    /// Requested tool calls; empty for a final answer.
    pub tool_calls: Vec<ChatToolCall>,
    /// Token usage statistics.
    #[serde(default)]
    pub usage: TokenUsage,
}

impl ChatResponse {
    /// Creates a final answer.
    #[must_use]
    pub fn answer(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            usage: TokenUsage::default(),
        }
    }

    /// Creates a tool-call response.
    #[must_use]
    pub fn tool_calls(tool_calls: Vec<ChatToolCall>) -> Self {
        Self {
            content: String::new(),
            tool_calls,
            usage: TokenUsage::default(),
        }
    }

    /// Returns true if the model produced a final answer.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Returns the total number of tokens.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Trait for LLM backends.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Asks the model for the next step of the conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the response is unusable.
    async fn complete(&self, request: &ChatRequest<'_>) -> Result<ChatResponse, LlmError>;

    /// Returns the model name.
    fn model(&self) -> &str;
}
