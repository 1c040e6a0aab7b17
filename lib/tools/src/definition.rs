//! Tool definitions derived from API operations.
//!
//! A definition is both the schema shown to the model and the invocation
//! template used to turn a tool call back into an HTTP request.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// HTTP methods an operation may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Parses an OpenAPI path-item key. Keys that are not operations
    /// (`parameters`, `summary`, `head`, ...) yield `None`.
    #[must_use]
    pub fn from_openapi_key(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "get" => Some(Self::Get),
            "post" => Some(Self::Post),
            "put" => Some(Self::Put),
            "patch" => Some(Self::Patch),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Returns the method as an uppercase string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Converts to the reqwest method type.
    #[must_use]
    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an argument ends up in the upstream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterLocation {
    /// Substituted into the path template.
    Path,
    /// Appended to the query string.
    Query,
    /// Sent in the request body.
    Body,
}

impl fmt::Display for ParameterLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path => write!(f, "path"),
            Self::Query => write!(f, "query"),
            Self::Body => write!(f, "body"),
        }
    }
}

/// How the body is encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    Json,
    Form,
}

/// How body arguments map onto the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyShape {
    /// Each body argument is one field of an object body.
    Fields,
    /// A single argument is the entire body.
    Whole { argument: String },
}

/// Request body layout of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodySpec {
    pub encoding: BodyEncoding,
    pub shape: BodyShape,
}

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name, derived from the operation id.
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON schema object describing the arguments.
    pub parameter_schema: JsonValue,
    /// HTTP method of the operation.
    pub method: HttpMethod,
    /// Path template, e.g. `/bookings/{bookingId}`.
    pub path_template: String,
    /// Location of every argument.
    pub parameter_locations: BTreeMap<String, ParameterLocation>,
    /// Body layout, if the operation takes a body.
    pub body: Option<BodySpec>,
}

impl ToolDefinition {
    /// Returns the names the schema marks as required.
    pub fn required_parameters(&self) -> impl Iterator<Item = &str> {
        self.parameter_schema
            .get("required")
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
            .filter_map(JsonValue::as_str)
    }

    /// Returns the location of an argument, if the tool declares it.
    #[must_use]
    pub fn location_of(&self, parameter: &str) -> Option<ParameterLocation> {
        self.parameter_locations.get(parameter).copied()
    }

    /// Renders the definition in the OpenAI function-calling format.
    #[must_use]
    pub fn to_openai_function(&self) -> JsonValue {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameter_schema,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking_status() -> ToolDefinition {
        ToolDefinition {
            name: "getBookingStatus".to_string(),
            description: "Returns the status of a booking".to_string(),
            parameter_schema: serde_json::json!({
                "type": "object",
                "properties": { "bookingId": { "type": "string" } },
                "required": ["bookingId"]
            }),
            method: HttpMethod::Get,
            path_template: "/bookings/{bookingId}/status".to_string(),
            parameter_locations: [("bookingId".to_string(), ParameterLocation::Path)]
                .into_iter()
                .collect(),
            body: None,
        }
    }

    #[test]
    fn method_parsing_ignores_non_operations() {
        assert_eq!(HttpMethod::from_openapi_key("GET"), Some(HttpMethod::Get));
        assert_eq!(HttpMethod::from_openapi_key("parameters"), None);
        assert_eq!(HttpMethod::from_openapi_key("head"), None);
    }

    #[test]
    fn required_parameters_come_from_schema() {
        let tool = booking_status();
        let required: Vec<_> = tool.required_parameters().collect();
        assert_eq!(required, vec!["bookingId"]);
        assert_eq!(tool.location_of("bookingId"), Some(ParameterLocation::Path));
        assert_eq!(tool.location_of("other"), None);
    }

    #[test]
    fn openai_format() {
        let function = booking_status().to_openai_function();
        assert_eq!(function["type"], "function");
        assert_eq!(function["function"]["name"], "getBookingStatus");
        assert_eq!(
            function["function"]["parameters"]["required"][0],
            "bookingId"
        );
    }
}
