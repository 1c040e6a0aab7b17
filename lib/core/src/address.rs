//! Addressing types shared by ingress, the state store and the worker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable address of a conversation partner (a phone number or a provider
/// user id).
///
/// `Display` prints the address masked; call [`SenderAddress::as_str`] when
/// the real value is needed for a store key or an outbound send.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenderAddress(String);

impl SenderAddress {
    /// Wraps a raw address, trimming surrounding whitespace and a leading `+`.
    #[must_use]
    pub fn new(raw: impl AsRef<str>) -> Self {
        let trimmed = raw.as_ref().trim();
        Self(trimmed.strip_prefix('+').unwrap_or(trimmed).to_string())
    }

    /// Returns the unmasked address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true when the address is empty after trimming.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the address with everything but the last four characters hidden.
    #[must_use]
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 4 {
            return "***".to_string();
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("***{tail}")
    }
}

impl fmt::Display for SenderAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl fmt::Debug for SenderAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SenderAddress({})", self.masked())
    }
}

/// Idempotency key of an inbound message: `<provider>:<provider message id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Derives the key for a provider message id.
    #[must_use]
    pub fn from_provider(provider: &str, message_id: &str) -> Self {
        Self(format!("{provider}:{}", message_id.trim()))
    }

    /// Returns the key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}
