//! Error types for the state crate.

use std::fmt;

/// Errors from the queue and stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Could not connect to the backing service.
    ConnectionFailed { reason: String },
    /// A stream, consumer or bucket could not be set up.
    SetupFailed { resource: String, reason: String },
    /// A stored value could not be encoded or decoded.
    Codec { reason: String },
    /// A backend operation failed.
    Backend {
        operation: &'static str,
        reason: String,
    },
    /// The session changed since it was read.
    VersionConflict { expected: u64 },
}

impl StateError {
    pub(crate) fn backend(operation: &'static str, error: impl fmt::Display) -> Self {
        Self::Backend {
            operation,
            reason: error.to_string(),
        }
    }

    pub(crate) fn codec(error: impl fmt::Display) -> Self {
        Self::Codec {
            reason: error.to_string(),
        }
    }

    /// Returns true for an optimistic concurrency failure.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { reason } => write!(f, "state store connection failed: {reason}"),
            Self::SetupFailed { resource, reason } => {
                write!(f, "failed to set up {resource}: {reason}")
            }
            Self::Codec { reason } => write!(f, "failed to encode or decode state: {reason}"),
            Self::Backend { operation, reason } => write!(f, "{operation} failed: {reason}"),
            Self::VersionConflict { expected } => {
                write!(f, "session changed concurrently (expected version {expected})")
            }
        }
    }
}

impl std::error::Error for StateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_detectable() {
        assert!(StateError::VersionConflict { expected: 3 }.is_conflict());
        assert!(!StateError::backend("session put", "timeout").is_conflict());
    }

    #[test]
    fn backend_display_names_operation() {
        let err = StateError::backend("queue ack", "connection reset");
        assert_eq!(err.to_string(), "queue ack failed: connection reset");
    }
}
