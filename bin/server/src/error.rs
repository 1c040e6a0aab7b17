//! Error types for the server binary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mobility_relay_messaging::{InboundError, SignatureError};
use mobility_relay_state::StateError;
use std::fmt;

/// Settings that load but cannot be used.
#[derive(Debug)]
pub enum ConfigurationError {
    Invalid { key: &'static str, reason: String },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid { key, reason } => write!(f, "invalid setting '{key}': {reason}"),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Failures that abort startup.
#[derive(Debug)]
pub enum StartupError {
    Config { reason: String },
    ToolRegistry { reason: String },
    Client { name: &'static str, reason: String },
    State { reason: String },
    Bind { addr: String, reason: String },
    Serve { reason: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => write!(f, "configuration error: {reason}"),
            Self::ToolRegistry { reason } => write!(f, "failed to load tool registry: {reason}"),
            Self::Client { name, reason } => write!(f, "failed to build {name} client: {reason}"),
            Self::State { reason } => write!(f, "failed to set up state store: {reason}"),
            Self::Bind { addr, reason } => write!(f, "failed to bind to {addr}: {reason}"),
            Self::Serve { reason } => write!(f, "server error: {reason}"),
        }
    }
}

impl std::error::Error for StartupError {}

/// Why a webhook request was refused.
#[derive(Debug)]
pub enum IngressError {
    UnknownProvider { name: String },
    Signature(SignatureError),
    Malformed(InboundError),
    /// The ledger or queue could not be reached; the provider should retry.
    Unavailable(StateError),
}

impl IngressError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownProvider { .. } => StatusCode::NOT_FOUND,
            Self::Signature(_) => StatusCode::UNAUTHORIZED,
            Self::Malformed(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl fmt::Display for IngressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownProvider { name } => write!(f, "unknown provider '{name}'"),
            Self::Signature(e) => write!(f, "signature rejected: {e}"),
            Self::Malformed(e) => write!(f, "{e}"),
            Self::Unavailable(e) => write!(f, "queue unavailable: {e}"),
        }
    }
}

impl std::error::Error for IngressError {}

impl From<SignatureError> for IngressError {
    fn from(e: SignatureError) -> Self {
        Self::Signature(e)
    }
}

impl From<InboundError> for IngressError {
    fn from(e: InboundError) -> Self {
        Self::Malformed(e)
    }
}

impl From<StateError> for IngressError {
    fn from(e: StateError) -> Self {
        Self::Unavailable(e)
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        // Internal details stay in the logs.
        let body = match &self {
            Self::UnknownProvider { .. } => "unknown provider",
            Self::Signature(_) => "invalid signature",
            Self::Malformed(_) => "malformed payload",
            Self::Unavailable(_) => "temporarily unavailable",
        };
        (self.status(), body).into_response()
    }
}
