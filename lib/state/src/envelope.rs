//! Versioned envelope for everything written to NATS.
//!
//! Queue items, sessions and dead letters are wrapped so the payload schema
//! can evolve while old entries are still in flight.

use serde::{Deserialize, Serialize};

/// The current envelope version.
pub const CURRENT_VERSION: u32 = 1;

/// A versioned wrapper around a serialized payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Envelope format version.
    pub version: u32,
    /// The wrapped payload.
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wraps `payload` at the current version.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            version: CURRENT_VERSION,
            payload,
        }
    }

    /// Unwraps the envelope.
    #[must_use]
    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T: Serialize> Envelope<T> {
    /// Encodes the envelope as JSON.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl<T: for<'de> Deserialize<'de>> Envelope<T> {
    /// Decodes an envelope, rejecting versions newer than this build knows.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Self =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed {
                reason: e.to_string(),
            })?;
        if envelope.version > CURRENT_VERSION {
            return Err(EnvelopeError::UnsupportedVersion {
                version: envelope.version,
            });
        }
        Ok(envelope)
    }
}

/// Errors from decoding an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The bytes are not a valid envelope.
    Malformed { reason: String },
    /// The envelope was written by a newer release.
    UnsupportedVersion { version: u32 },
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed { reason } => write!(f, "malformed envelope: {reason}"),
            Self::UnsupportedVersion { version } => {
                write!(f, "unsupported envelope version {version}")
            }
        }
    }
}

impl std::error::Error for EnvelopeError {}
