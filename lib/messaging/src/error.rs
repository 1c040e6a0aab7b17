//! Error types for provider integration.

use std::fmt;

/// Webhook payload could not be understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundError {
    /// The body is not the provider's envelope.
    Malformed { reason: String },
}

impl fmt::Display for InboundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { reason } => write!(f, "malformed webhook payload: {reason}"),
        }
    }
}

impl std::error::Error for InboundError {}

/// Webhook signature check failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// No signature header was sent.
    Missing,
    /// The header is not `sha256=<hex>`.
    BadFormat,
    /// The signature does not match the body.
    Mismatch,
    /// The shared secret cannot be used as an HMAC key.
    InvalidKey,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "signature header missing"),
            Self::BadFormat => write!(f, "signature header is not sha256=<hex>"),
            Self::Mismatch => write!(f, "signature does not match body"),
            Self::InvalidKey => write!(f, "webhook secret is not a valid HMAC key"),
        }
    }
}

impl std::error::Error for SignatureError {}

/// Sending a reply failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The provider refused the message; resending it will not help.
    Rejected { status: u16, body: String },
    /// The provider asked us to slow down.
    RateLimited,
    /// The provider could not be reached or answered with a server error.
    Unavailable { reason: String },
    /// The request timed out.
    Timeout,
    /// The client could not be built.
    InvalidConfig { reason: String },
}

impl SendError {
    /// Returns true if sending the same reply again may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Unavailable { .. } | Self::Timeout
        )
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { status, body } => {
                write!(f, "provider rejected the reply (HTTP {status}): {body}")
            }
            Self::RateLimited => write!(f, "provider rate limited the reply"),
            Self::Unavailable { reason } => write!(f, "provider unavailable: {reason}"),
            Self::Timeout => write!(f, "reply send timed out"),
            Self::InvalidConfig { reason } => write!(f, "invalid provider configuration: {reason}"),
        }
    }
}

impl std::error::Error for SendError {}
