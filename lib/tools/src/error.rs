//! Error types for the tools crate.
//!
//! - `SchemaError`: the API description could not be turned into tools. Fatal
//!   at startup.
//! - `InvokerConfigError`: the upstream client settings are unusable. Fatal
//!   at startup.
//! - `ToolExecutionError`: a single tool call failed. Never fatal; the worker
//!   folds it into the transcript so the model can adapt.

use serde_json::Value as JsonValue;
use std::fmt;

/// Errors from loading the API description document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The document does not exist.
    DocumentMissing { path: String },
    /// The document exists but could not be read.
    DocumentUnreadable { path: String, reason: String },
    /// The document is not a usable OpenAPI description.
    DocumentInvalid { reason: String },
    /// The document declares no supported operations.
    NoOperations,
    /// Two operations resolve to the same tool name.
    DuplicateOperation { name: String },
    /// An explicit operation id is not a valid tool name.
    InvalidOperationName { name: String },
    /// A path template is malformed or disagrees with its parameters.
    InvalidPathTemplate { path: String, reason: String },
    /// A parameter declaration is malformed.
    InvalidParameter {
        operation: String,
        parameter: String,
        reason: String,
    },
    /// A `$ref` points outside the document or at nothing.
    UnresolvableReference { reference: String },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DocumentMissing { path } => {
                write!(f, "API description not found at {path}")
            }
            Self::DocumentUnreadable { path, reason } => {
                write!(f, "failed to read API description {path}: {reason}")
            }
            Self::DocumentInvalid { reason } => {
                write!(f, "invalid API description: {reason}")
            }
            Self::NoOperations => write!(f, "API description declares no operations"),
            Self::DuplicateOperation { name } => {
                write!(f, "duplicate operation name: {name}")
            }
            Self::InvalidOperationName { name } => {
                write!(f, "invalid operation name '{name}'")
            }
            Self::InvalidPathTemplate { path, reason } => {
                write!(f, "invalid path template '{path}': {reason}")
            }
            Self::InvalidParameter {
                operation,
                parameter,
                reason,
            } => {
                write!(
                    f,
                    "invalid parameter '{parameter}' on operation '{operation}': {reason}"
                )
            }
            Self::UnresolvableReference { reference } => {
                write!(f, "unresolvable reference: {reference}")
            }
        }
    }
}

impl std::error::Error for SchemaError {}

/// Errors from building the upstream API client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokerConfigError {
    /// The configured base URL cannot be used.
    InvalidBaseUrl { url: String, reason: String },
    /// The HTTP client could not be constructed.
    Client { reason: String },
}

impl fmt::Display for InvokerConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBaseUrl { url, reason } => {
                write!(f, "invalid upstream base URL '{url}': {reason}")
            }
            Self::Client { reason } => write!(f, "failed to build HTTP client: {reason}"),
        }
    }
}

impl std::error::Error for InvokerConfigError {}

/// Errors from executing a tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolExecutionError {
    /// The model asked for a tool the registry does not know.
    UnknownTool { name: String },
    /// The arguments are not a JSON object or contain an unusable value.
    InvalidArguments { reason: String },
    /// A required argument was not supplied.
    MissingArgument { name: String },
    /// The upstream API answered with a non-2xx status.
    UpstreamStatus { status: u16, body: String },
    /// The upstream API did not answer in time.
    Timeout,
    /// The upstream API could not be reached.
    Unavailable { reason: String },
}

impl ToolExecutionError {
    /// Short machine-readable category, stable across releases.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool { .. } => "unknown_tool",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::MissingArgument { .. } => "missing_argument",
            Self::UpstreamStatus { status, .. } if *status >= 500 => "upstream_error",
            Self::UpstreamStatus { .. } => "upstream_rejected",
            Self::Timeout => "upstream_timeout",
            Self::Unavailable { .. } => "upstream_unavailable",
        }
    }

    /// The structured failure description handed back to the model.
    #[must_use]
    pub fn to_model_payload(&self) -> JsonValue {
        let mut payload = serde_json::json!({
            "error": true,
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if let Self::UpstreamStatus { status, .. } = self {
            payload["status"] = JsonValue::from(*status);
        }
        payload
    }
}

impl fmt::Display for ToolExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTool { name } => write!(f, "unknown tool: {name}"),
            Self::InvalidArguments { reason } => write!(f, "invalid arguments: {reason}"),
            Self::MissingArgument { name } => write!(f, "missing required field '{name}'"),
            Self::UpstreamStatus { status, body } if *status >= 500 => {
                write!(f, "upstream unavailable (HTTP {status}): {body}")
            }
            Self::UpstreamStatus { status, body } => {
                write!(f, "upstream rejected the request (HTTP {status}): {body}")
            }
            Self::Timeout => write!(f, "upstream did not respond in time"),
            Self::Unavailable { reason } => write!(f, "upstream unavailable: {reason}"),
        }
    }
}

impl std::error::Error for ToolExecutionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_display() {
        let err = SchemaError::DuplicateOperation {
            name: "getBooking".to_string(),
        };
        assert!(err.to_string().contains("getBooking"));
    }

    #[test]
    fn missing_argument_names_the_field() {
        let err = ToolExecutionError::MissingArgument {
            name: "bookingId".to_string(),
        };
        assert_eq!(err.to_string(), "missing required field 'bookingId'");
        assert_eq!(err.kind(), "missing_argument");
    }

    #[test]
    fn server_errors_read_as_unavailable() {
        let err = ToolExecutionError::UpstreamStatus {
            status: 503,
            body: "maintenance".to_string(),
        };
        assert_eq!(err.kind(), "upstream_error");
        assert!(err.to_string().contains("unavailable"));
    }

    #[test]
    fn model_payload_carries_status() {
        let err = ToolExecutionError::UpstreamStatus {
            status: 404,
            body: "no such booking".to_string(),
        };
        let payload = err.to_model_payload();
        assert_eq!(payload["error"], true);
        assert_eq!(payload["kind"], "upstream_rejected");
        assert_eq!(payload["status"], 404);
    }
}
