//! Shared error plumbing.
//!
//! Every crate in the relay owns its error enums (`SchemaError`,
//! `QueueError`, `LlmError`, ...). Failures that cross a layer boundary, such
//! as loading the tool registry or connecting to NATS during startup, travel
//! as a rootcause [`Report`] so each layer can attach its own context.

pub use rootcause::Report;

/// Result alias carrying a rootcause [`Report`] with context `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
