//! OpenAI-compatible chat completions client.

use crate::backend::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, ChatToolCall, LlmBackend, TokenUsage,
};
use crate::error::LlmError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const PROVIDER: &str = "openai";

/// Settings for [`OpenAiClient`].
#[derive(Clone)]
pub struct OpenAiConfig {
    /// API base, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Client for OpenAI-compatible chat completion APIs.
#[derive(Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded arguments.
    #[serde(default)]
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        let tool_calls: Option<Vec<WireToolCall>> = (!message.tool_calls.is_empty()).then(|| {
            message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    call_type: function_type(),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect()
        });
        // Assistant messages that only carry tool calls send `content: null`.
        let content = if message.role == ChatRole::Assistant
            && tool_calls.is_some()
            && message.content.is_empty()
        {
            None
        } else {
            Some(message.content.clone())
        };
        Self {
            role: message.role.as_str().to_string(),
            content,
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
            name: message.name.clone(),
        }
    }
}

impl OpenAiClient {
    /// Creates a client from its settings.
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        if config.model.trim().is_empty() {
            return Err(LlmError::InvalidConfig {
                reason: "model name is empty".to_string(),
            });
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::InvalidConfig {
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key,
            model: config.model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn build_body<'a>(&'a self, request: &ChatRequest<'_>) -> CompletionRequest<'a> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system {
            messages.push(WireMessage::from(&ChatMessage::system(system)));
        }
        messages.extend(request.messages.iter().map(WireMessage::from));

        let tools: Vec<JsonValue> = request
            .tools
            .iter()
            .map(|tool| tool.to_openai_function())
            .collect();
        let tool_choice = (!tools.is_empty()).then_some("auto");

        CompletionRequest {
            model: &self.model,
            messages,
            tools,
            tool_choice,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    async fn error_from_response(response: reqwest::Response) -> LlmError {
        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok());
            return LlmError::RateLimited { retry_after_secs };
        }
        let body = response.text().await.unwrap_or_default();
        let reason = if body.is_empty() {
            status.canonical_reason().unwrap_or("unknown error").to_string()
        } else {
            body
        };
        if status.is_server_error() {
            LlmError::ProviderUnavailable {
                provider: PROVIDER.to_string(),
                reason: format!("HTTP {}: {reason}", status.as_u16()),
            }
        } else {
            LlmError::RequestFailed {
                status: status.as_u16(),
                reason,
            }
        }
    }
}

fn parse_tool_call(call: WireToolCall) -> Result<ChatToolCall, LlmError> {
    let raw = call.function.arguments.trim();
    let arguments = if raw.is_empty() {
        JsonValue::Object(serde_json::Map::new())
    } else {
        serde_json::from_str(raw).map_err(|e| LlmError::MalformedToolArguments {
            tool: call.function.name.clone(),
            reason: e.to_string(),
        })?
    };
    Ok(ChatToolCall {
        id: call.id,
        name: call.function.name,
        arguments,
    })
}

#[async_trait]
impl LlmBackend for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.model, messages = request.messages.len()))]
    async fn complete(&self, request: &ChatRequest<'_>) -> Result<ChatResponse, LlmError> {
        let body = self.build_body(request);
        let mut http = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::ProviderUnavailable {
                    provider: PROVIDER.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
        if !response.status().is_success() {
            let error = Self::error_from_response(response).await;
            warn!(error = %error, "LLM call failed");
            return Err(error);
        }

        let completion: CompletionResponse =
            response.json().await.map_err(|e| LlmError::ResponseParseFailed {
                reason: e.to_string(),
            })?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ResponseParseFailed {
                reason: "response contained no choices".to_string(),
            })?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(parse_tool_call)
            .collect::<Result<Vec<_>, _>>()?;
        let usage = completion
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();
        debug!(
            tool_calls = tool_calls.len(),
            tokens = usage.total(),
            "LLM call completed"
        );

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
