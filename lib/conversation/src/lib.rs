//! Conversation state for mobility-relay.
//!
//! This crate provides:
//!
//! - **Transcript turns**: user, assistant and tool-result turns
//! - **Tool call records**: the outcome of one tool invocation, folded into
//!   the transcript
//! - **Conversation sessions**: the versioned, per-sender transcript plus the
//!   reply outbox

pub mod message;
pub mod session;

pub use message::{ToolCall, ToolCallRecord, ToolResult, Turn, TurnRole};
pub use session::{ConversationSession, PendingReply};
