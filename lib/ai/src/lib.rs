//! Language-model access for mobility-relay.
//!
//! This crate provides:
//!
//! - **Backend abstraction**: the `LlmBackend` trait and the chat
//!   request/response types the conversation worker speaks
//! - **OpenAI-compatible client**: chat completions with function calling
//!
//! The model is a black box: given a transcript and the tool schemas it
//! returns either a final answer or a batch of tool calls.

pub mod backend;
pub mod error;
pub mod openai;

pub use backend::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, ChatToolCall, LlmBackend, TokenUsage,
};
pub use error::LlmError;
pub use openai::{OpenAiClient, OpenAiConfig};
