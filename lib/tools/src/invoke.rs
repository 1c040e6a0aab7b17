//! Tool invocation against the upstream REST API.

use crate::definition::{BodyEncoding, BodyShape, HttpMethod, ParameterLocation, ToolDefinition};
use crate::error::{InvokerConfigError, ToolExecutionError};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Upstream error bodies longer than this are cut before reaching the model.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Executes tool calls.
///
/// The worker depends on this trait rather than [`ApiInvoker`] so tests can
/// substitute scripted tools.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invokes `tool` with model-supplied `arguments`.
    async fn invoke(
        &self,
        tool: &ToolDefinition,
        arguments: &JsonValue,
    ) -> Result<JsonValue, ToolExecutionError>;
}

/// Settings for [`ApiInvoker`].
#[derive(Clone)]
pub struct ApiInvokerConfig {
    /// Base URL the path templates are appended to.
    pub base_url: String,
    /// Optional static bearer token.
    pub api_token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl fmt::Debug for ApiInvokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiInvokerConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Body of a prepared request.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedBody {
    Json(JsonValue),
    Form(Vec<(String, String)>),
}

/// A tool call translated into an HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub body: Option<PreparedBody>,
}

impl PreparedRequest {
    /// Substitutes `arguments` into the tool's template.
    ///
    /// Arguments the tool does not declare are dropped.
    pub fn build(
        tool: &ToolDefinition,
        arguments: &JsonValue,
        base_url: &Url,
    ) -> Result<Self, ToolExecutionError> {
        let empty = Map::new();
        let arguments = match arguments {
            JsonValue::Object(map) => map,
            JsonValue::Null => &empty,
            other => {
                return Err(ToolExecutionError::InvalidArguments {
                    reason: format!("expected a JSON object, got {}", json_type(other)),
                });
            }
        };

        for name in tool.required_parameters() {
            if arguments.get(name).is_none_or(JsonValue::is_null) {
                return Err(ToolExecutionError::MissingArgument {
                    name: name.to_string(),
                });
            }
        }
        for name in arguments.keys() {
            if tool.location_of(name).is_none() {
                debug!(tool = %tool.name, argument = %name, "Ignoring undeclared argument");
            }
        }

        let mut url = base_url.clone();
        let segments = substitute_path(&tool.path_template, arguments)?;
        url.path_segments_mut()
            .map_err(|()| ToolExecutionError::Unavailable {
                reason: format!("base URL {base_url} cannot carry a path"),
            })?
            .pop_if_empty()
            .extend(segments.iter().map(String::as_str));

        let query: Vec<(String, String)> = arguments
            .iter()
            .filter(|(name, _)| tool.location_of(name) == Some(ParameterLocation::Query))
            .flat_map(|(name, value)| query_values(value).into_iter().map(move |v| (name.clone(), v)))
            .collect();
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        Ok(Self {
            method: tool.method,
            url,
            body: prepare_body(tool, arguments),
        })
    }
}

fn prepare_body(tool: &ToolDefinition, arguments: &Map<String, JsonValue>) -> Option<PreparedBody> {
    let spec = tool.body.as_ref()?;
    match (&spec.shape, spec.encoding) {
        (BodyShape::Whole { argument }, _) => arguments
            .get(argument)
            .filter(|value| !value.is_null())
            .cloned()
            .map(PreparedBody::Json),
        (BodyShape::Fields, encoding) => {
            let fields = arguments
                .iter()
                .filter(|(name, value)| {
                    tool.location_of(name) == Some(ParameterLocation::Body) && !value.is_null()
                })
                .map(|(name, value)| (name.clone(), value.clone()));
            match encoding {
                BodyEncoding::Json => Some(PreparedBody::Json(JsonValue::Object(fields.collect()))),
                BodyEncoding::Form => Some(PreparedBody::Form(
                    fields
                        .map(|(name, value)| (name, scalar_text(&value)))
                        .collect(),
                )),
            }
        }
    }
}

/// Splits the template into segments with placeholders filled in.
fn substitute_path(
    template: &str,
    arguments: &Map<String, JsonValue>,
) -> Result<Vec<String>, ToolExecutionError> {
    let mut segments = Vec::new();
    for segment in template.trim_start_matches('/').split('/') {
        let mut filled = String::with_capacity(segment.len());
        let mut rest = segment;
        while let Some(open) = rest.find('{') {
            filled.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                filled.push_str(&rest[open..]);
                rest = "";
                break;
            };
            let name = &after[..close];
            let value = match arguments.get(name) {
                None | Some(JsonValue::Null) => {
                    return Err(ToolExecutionError::MissingArgument {
                        name: name.to_string(),
                    });
                }
                Some(value @ (JsonValue::Array(_) | JsonValue::Object(_))) => {
                    return Err(ToolExecutionError::InvalidArguments {
                        reason: format!(
                            "path parameter '{name}' must be a scalar, got {}",
                            json_type(value)
                        ),
                    });
                }
                Some(value) => scalar_text(value),
            };
            filled.push_str(&value);
            rest = &after[close + 1..];
        }
        filled.push_str(rest);
        segments.push(filled);
    }
    Ok(segments)
}

fn query_values(value: &JsonValue) -> Vec<String> {
    match value {
        JsonValue::Null => Vec::new(),
        JsonValue::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(scalar_text)
            .collect(),
        other => vec![scalar_text(other)],
    }
}

/// Renders a value the way it appears in a URL or form field.
fn scalar_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// [`ToolInvoker`] that calls the Mobility REST API over HTTP.
#[derive(Debug, Clone)]
pub struct ApiInvoker {
    client: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
}

impl ApiInvoker {
    /// Creates an invoker for the given upstream.
    pub fn new(config: ApiInvokerConfig) -> Result<Self, InvokerConfigError> {
        let base_url =
            Url::parse(&config.base_url).map_err(|e| InvokerConfigError::InvalidBaseUrl {
                url: config.base_url.clone(),
                reason: e.to_string(),
            })?;
        if base_url.cannot_be_a_base() {
            return Err(InvokerConfigError::InvalidBaseUrl {
                url: config.base_url,
                reason: "not a hierarchical URL".to_string(),
            });
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| InvokerConfigError::Client {
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url,
            api_token: config.api_token,
        })
    }
}

#[async_trait]
impl ToolInvoker for ApiInvoker {
    #[instrument(skip_all, fields(tool = %tool.name, method = %tool.method))]
    async fn invoke(
        &self,
        tool: &ToolDefinition,
        arguments: &JsonValue,
    ) -> Result<JsonValue, ToolExecutionError> {
        let prepared = PreparedRequest::build(tool, arguments, &self.base_url)?;
        debug!(url = %prepared.url, "Calling upstream API");

        let mut request = self
            .client
            .request(prepared.method.to_reqwest(), prepared.url);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        request = match prepared.body {
            Some(PreparedBody::Json(body)) => request.json(&body),
            Some(PreparedBody::Form(fields)) => request.form(&fields),
            None => request,
        };

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Upstream API returned an error");
            return Err(ToolExecutionError::UpstreamStatus {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }
        if text.trim().is_empty() {
            return Ok(serde_json::json!({ "status": status.as_u16() }));
        }
        Ok(serde_json::from_str(&text).unwrap_or(JsonValue::String(text)))
    }
}

fn transport_error(error: reqwest::Error) -> ToolExecutionError {
    if error.is_timeout() {
        ToolExecutionError::Timeout
    } else {
        ToolExecutionError::Unavailable {
            reason: error.to_string(),
        }
    }
}
