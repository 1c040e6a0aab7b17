//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables, with `__`
//! separating nested keys: `WEBHOOK__SECRET`, `NATS__URL`, `WORKER__CONCURRENCY`.

use crate::error::ConfigurationError;
use mobility_relay_ai::OpenAiConfig;
use mobility_relay_messaging::InfobipConfig;
use mobility_relay_state::NatsConfig;
use mobility_relay_tools::ApiInvokerConfig;
use mobility_relay_worker::{Backoff, RateLimitConfig, WorkerConfig};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address the webhook listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// OpenAPI document describing the Mobility API.
    pub openapi_path: PathBuf,

    #[serde(default)]
    pub nats: NatsSettings,

    pub webhook: WebhookSettings,

    pub infobip: InfobipSettings,

    pub llm: LlmSettings,

    pub upstream: UpstreamSettings,

    #[serde(default)]
    pub worker: WorkerSettings,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_environment(config::Environment::default())
    }

    fn from_environment(environment: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Checks settings that are individually valid but unusable together.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.webhook.secret.is_empty() {
            return Err(ConfigurationError::Invalid {
                key: "webhook.secret",
                reason: "must not be empty".to_string(),
            });
        }
        if self.nats.ack_wait_seconds <= self.worker.item_deadline_seconds {
            return Err(ConfigurationError::Invalid {
                key: "nats.ack_wait_seconds",
                reason: format!(
                    "must exceed worker.item_deadline_seconds ({})",
                    self.worker.item_deadline_seconds
                ),
            });
        }
        if self.nats.lock_ttl_seconds <= self.worker.item_deadline_seconds {
            return Err(ConfigurationError::Invalid {
                key: "nats.lock_ttl_seconds",
                reason: format!(
                    "must exceed worker.item_deadline_seconds ({})",
                    self.worker.item_deadline_seconds
                ),
            });
        }
        if self.worker.concurrency == 0 {
            return Err(ConfigurationError::Invalid {
                key: "worker.concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// NATS connection and retention settings.
#[derive(Debug, Clone, Deserialize)]
pub struct NatsSettings {
    #[serde(default = "default_nats_url")]
    pub url: String,

    /// Redelivery timeout for unacknowledged work items.
    #[serde(default = "default_ack_wait_seconds")]
    pub ack_wait_seconds: u64,

    /// Lease on a per-sender lock.
    #[serde(default = "default_lock_ttl_seconds")]
    pub lock_ttl_seconds: u64,

    /// How long accepted message ids are remembered for deduplication.
    #[serde(default = "default_ledger_ttl_hours")]
    pub ledger_ttl_hours: u64,

    /// Idle sessions are dropped after this many days. Unset keeps them.
    #[serde(default)]
    pub session_ttl_days: Option<u64>,
}

fn default_nats_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_ack_wait_seconds() -> u64 {
    300
}

fn default_lock_ttl_seconds() -> u64 {
    300
}

fn default_ledger_ttl_hours() -> u64 {
    24
}

impl Default for NatsSettings {
    fn default() -> Self {
        Self {
            url: default_nats_url(),
            ack_wait_seconds: default_ack_wait_seconds(),
            lock_ttl_seconds: default_lock_ttl_seconds(),
            ledger_ttl_hours: default_ledger_ttl_hours(),
            session_ttl_days: None,
        }
    }
}

impl NatsSettings {
    #[must_use]
    pub fn to_nats_config(&self) -> NatsConfig {
        NatsConfig {
            ack_wait: Duration::from_secs(self.ack_wait_seconds),
            lock_ttl: Duration::from_secs(self.lock_ttl_seconds),
            ledger_ttl: Duration::from_secs(self.ledger_ttl_hours * 3600),
            session_ttl: self
                .session_ttl_days
                .map(|days| Duration::from_secs(days * 86_400)),
            ..NatsConfig::new(self.url.clone())
        }
    }
}

/// Shared secret for webhook signatures.
#[derive(Clone, Deserialize)]
pub struct WebhookSettings {
    pub secret: String,
}

impl fmt::Debug for WebhookSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookSettings")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Infobip WhatsApp API settings.
#[derive(Clone, Deserialize)]
pub struct InfobipSettings {
    pub base_url: String,
    pub api_key: String,
    /// Our WhatsApp sender number.
    pub sender_number: String,
    #[serde(default = "default_infobip_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_infobip_timeout_seconds() -> u64 {
    10
}

impl fmt::Debug for InfobipSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfobipSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("sender_number", &self.sender_number)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl InfobipSettings {
    #[must_use]
    pub fn to_infobip_config(&self) -> InfobipConfig {
        InfobipConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            sender_number: self.sender_number.clone(),
            timeout: Duration::from_secs(self.timeout_seconds),
        }
    }
}

/// OpenAI-compatible model endpoint.
#[derive(Clone, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_llm_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_llm_timeout_seconds() -> u64 {
    60
}

impl fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl LlmSettings {
    #[must_use]
    pub fn to_openai_config(&self) -> OpenAiConfig {
        OpenAiConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout: Duration::from_secs(self.timeout_seconds),
        }
    }
}

/// The Mobility API the tools call.
#[derive(Clone, Deserialize)]
pub struct UpstreamSettings {
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_upstream_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_upstream_timeout_seconds() -> u64 {
    15
}

impl fmt::Debug for UpstreamSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamSettings")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl UpstreamSettings {
    #[must_use]
    pub fn to_invoker_config(&self) -> ApiInvokerConfig {
        ApiInvokerConfig {
            base_url: self.base_url.clone(),
            api_token: self.api_token.clone(),
            timeout: Duration::from_secs(self.timeout_seconds),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,
    /// Budget for one message, model calls and reply send included.
    #[serde(default = "default_item_deadline_seconds")]
    pub item_deadline_seconds: u64,
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,
    /// Turns kept in the stored transcript.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    /// Size cap of the stored transcript; must stay below the NATS max payload.
    #[serde(default = "default_history_bytes")]
    pub history_bytes: usize,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub fallback_reply: Option<String>,
    /// Messages per sender per window; 0 disables the limit.
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: u32,
    #[serde(default = "default_rate_limit_window_seconds")]
    pub rate_limit_window_seconds: u32,
}

fn default_concurrency() -> usize {
    4
}

fn default_max_iterations() -> u32 {
    5
}

fn default_max_deliveries() -> u32 {
    5
}

fn default_item_deadline_seconds() -> u64 {
    120
}

fn default_context_turns() -> usize {
    40
}

fn default_history_turns() -> usize {
    100
}

fn default_history_bytes() -> usize {
    256 * 1024
}

fn default_rate_limit_max() -> u32 {
    20
}

fn default_rate_limit_window_seconds() -> u32 {
    60
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_iterations: default_max_iterations(),
            max_deliveries: default_max_deliveries(),
            item_deadline_seconds: default_item_deadline_seconds(),
            context_turns: default_context_turns(),
            history_turns: default_history_turns(),
            history_bytes: default_history_bytes(),
            system_prompt: None,
            fallback_reply: None,
            rate_limit_max: default_rate_limit_max(),
            rate_limit_window_seconds: default_rate_limit_window_seconds(),
        }
    }
}

impl WorkerSettings {
    #[must_use]
    pub fn to_worker_config(&self) -> WorkerConfig {
        let defaults = WorkerConfig::default();
        let rate_limit = if self.rate_limit_max == 0 {
            RateLimitConfig::new(u32::MAX, self.rate_limit_window_seconds)
        } else {
            RateLimitConfig::new(self.rate_limit_max, self.rate_limit_window_seconds)
        };
        WorkerConfig {
            concurrency: self.concurrency,
            max_iterations: self.max_iterations,
            max_deliveries: self.max_deliveries,
            item_deadline: Duration::from_secs(self.item_deadline_seconds),
            context_turns: self.context_turns,
            history_turns: self.history_turns,
            history_bytes: self.history_bytes,
            system_prompt: self.system_prompt.clone().unwrap_or(defaults.system_prompt),
            fallback_reply: self.fallback_reply.clone().unwrap_or(defaults.fallback_reply),
            rate_limit,
            backoff: Backoff::default(),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn environment(vars: &[(&str, &str)]) -> config::Environment {
        let source = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        config::Environment::default().source(Some(source))
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("OPENAPI_PATH", "/etc/relay/mobility.yaml"),
            ("WEBHOOK__SECRET", "whsec"),
            ("INFOBIP__BASE_URL", "xyz.api.infobip.com"),
            ("INFOBIP__API_KEY", "ib-key"),
            ("INFOBIP__SENDER_NUMBER", "447860099299"),
            ("LLM__MODEL", "gpt-4o-mini"),
            ("UPSTREAM__BASE_URL", "https://api.mobility.example"),
        ]
    }

    #[test]
    fn loads_with_defaults() {
        let config = ServerConfig::from_environment(environment(&required())).unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.openapi_path, PathBuf::from("/etc/relay/mobility.yaml"));
        assert_eq!(config.nats.url, "nats://127.0.0.1:4222");
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn nested_values_are_parsed() {
        let mut vars = required();
        vars.push(("WORKER__CONCURRENCY", "8"));
        vars.push(("NATS__SESSION_TTL_DAYS", "30"));
        let config = ServerConfig::from_environment(environment(&vars)).unwrap();

        assert_eq!(config.worker.concurrency, 8);
        assert_eq!(
            config.nats.to_nats_config().session_ttl,
            Some(Duration::from_secs(30 * 86_400))
        );
    }

    #[test]
    fn missing_secret_fails() {
        let vars: Vec<_> = required()
            .into_iter()
            .filter(|(k, _)| *k != "WEBHOOK__SECRET")
            .collect();
        assert!(ServerConfig::from_environment(environment(&vars)).is_err());
    }

    #[test]
    fn ack_wait_must_exceed_deadline() {
        let mut vars = required();
        vars.push(("NATS__ACK_WAIT_SECONDS", "60"));
        let config = ServerConfig::from_environment(environment(&vars)).unwrap();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("nats.ack_wait_seconds"));
    }

    #[test]
    fn lock_lease_must_outlive_deadline() {
        let mut vars = required();
        vars.push(("WORKER__ITEM_DEADLINE_SECONDS", "200"));
        vars.push(("NATS__LOCK_TTL_SECONDS", "180"));
        let config = ServerConfig::from_environment(environment(&vars)).unwrap();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("nats.lock_ttl_seconds"));

        let mut vars = required();
        vars.push(("NATS__LOCK_TTL_SECONDS", "400"));
        let config = ServerConfig::from_environment(environment(&vars)).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn secrets_are_redacted() {
        let config = ServerConfig::from_environment(environment(&required())).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("whsec"));
        assert!(!debug.contains("ib-key"));
    }

    #[test]
    fn worker_settings_map_to_worker_config() {
        let settings = WorkerSettings {
            item_deadline_seconds: 90,
            system_prompt: Some("Be brief.".to_string()),
            ..WorkerSettings::default()
        };
        let config = settings.to_worker_config();
        assert_eq!(config.item_deadline, Duration::from_secs(90));
        assert_eq!(config.system_prompt, "Be brief.");
        assert_eq!(config.rate_limit, RateLimitConfig::new(20, 60));
        assert_eq!(config.history_turns, 100);
        assert_eq!(config.history_bytes, 256 * 1024);
    }
}
