//! Failures while handling one delivery.

use mobility_relay_messaging::SendError;
use mobility_relay_state::StateError;
use std::fmt;
use std::time::Duration;

/// Why a delivery could not be completed.
///
/// Model and tool failures never show up here: they end in a fallback reply
/// or a tool-result turn instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// Session store, lock or queue failure, including version conflicts.
    State(StateError),
    /// The reply could not be sent after every retry.
    SendFailed { error: SendError, reply: String },
    /// The delivery ran past its deadline.
    DeadlineExceeded { deadline: Duration },
}

impl ProcessError {
    /// The reply that was produced but not delivered, if any.
    #[must_use]
    pub fn undelivered_reply(&self) -> Option<&str> {
        match self {
            Self::SendFailed { reply, .. } => Some(reply),
            _ => None,
        }
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State(e) => write!(f, "state error: {e}"),
            Self::SendFailed { error, .. } => write!(f, "reply not delivered: {error}"),
            Self::DeadlineExceeded { deadline } => {
                write!(f, "processing exceeded the {}s deadline", deadline.as_secs_f64())
            }
        }
    }
}

impl std::error::Error for ProcessError {}

impl From<StateError> for ProcessError {
    fn from(e: StateError) -> Self {
        Self::State(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_failure_keeps_reply() {
        let err = ProcessError::SendFailed {
            error: SendError::Timeout,
            reply: "Booking 123 is confirmed.".to_string(),
        };
        assert_eq!(err.undelivered_reply(), Some("Booking 123 is confirmed."));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn deadline_display() {
        let err = ProcessError::DeadlineExceeded {
            deadline: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "processing exceeded the 1.5s deadline");
    }
}
