//! Reply delivery through the Infobip WhatsApp API.

use crate::error::SendError;
use async_trait::async_trait;
use mobility_relay_core::SenderAddress;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Longest text body WhatsApp accepts.
pub const MAX_REPLY_CHARS: usize = 4096;

const MAX_ERROR_BODY: usize = 512;

/// Delivers reply text to a user.
#[async_trait]
pub trait ReplySender: Send + Sync {
    /// Sends `text` to `to`. Returns once the provider accepted the message.
    async fn send(&self, to: &SenderAddress, text: &str) -> Result<(), SendError>;
}

/// Settings for [`InfobipClient`].
#[derive(Clone)]
pub struct InfobipConfig {
    /// API base, e.g. `https://xyz.api.infobip.com`. A bare host gets `https://`.
    pub base_url: String,
    pub api_key: String,
    /// Our WhatsApp number, used as `from`.
    pub sender_number: String,
    pub timeout: Duration,
}

impl fmt::Debug for InfobipConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfobipConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("sender_number", &self.sender_number)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct TextMessage<'a> {
    from: &'a str,
    to: &'a str,
    content: TextContent<'a>,
}

#[derive(Debug, Serialize)]
struct TextContent<'a> {
    text: &'a str,
}

/// Infobip WhatsApp text message client.
#[derive(Clone)]
pub struct InfobipClient {
    client: reqwest::Client,
    endpoint: String,
    authorization: String,
    sender_number: String,
}

impl fmt::Debug for InfobipClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfobipClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl InfobipClient {
    pub fn new(config: InfobipConfig) -> Result<Self, SendError> {
        if config.api_key.trim().is_empty() {
            return Err(SendError::InvalidConfig {
                reason: "API key is empty".to_string(),
            });
        }
        let base = config.base_url.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(SendError::InvalidConfig {
                reason: "base URL is empty".to_string(),
            });
        }
        let base = if base.contains("://") {
            base.to_string()
        } else {
            format!("https://{base}")
        };
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SendError::InvalidConfig {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint: format!("{base}/whatsapp/1/message/text"),
            authorization: format!("App {}", config.api_key),
            sender_number: config.sender_number,
        })
    }
}

/// Cuts `text` to the provider's limit on a character boundary.
fn truncate_reply(text: &str) -> &str {
    match text.char_indices().nth(MAX_REPLY_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[async_trait]
impl ReplySender for InfobipClient {
    #[instrument(skip_all, fields(sender = %to, chars = text.chars().count()))]
    async fn send(&self, to: &SenderAddress, text: &str) -> Result<(), SendError> {
        let text = truncate_reply(text);
        let body = TextMessage {
            from: &self.sender_number,
            to: to.as_str(),
            content: TextContent { text },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SendError::Timeout
                } else {
                    SendError::Unavailable {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.is_success() {
            debug!("reply accepted by provider");
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let end = body
                .char_indices()
                .nth(MAX_ERROR_BODY)
                .map_or(body.len(), |(i, _)| i);
            body.truncate(end);
        }
        let error = if status.as_u16() == 429 {
            SendError::RateLimited
        } else if status.is_server_error() {
            SendError::Unavailable {
                reason: format!("HTTP {}: {body}", status.as_u16()),
            }
        } else {
            SendError::Rejected {
                status: status.as_u16(),
                body,
            }
        };
        warn!(error = %error, "reply send failed");
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> InfobipClient {
        InfobipClient::new(InfobipConfig {
            base_url: base_url.to_string(),
            api_key: "secret-key".to_string(),
            sender_number: "447860099299".to_string(),
            timeout: Duration::from_secs(5),
        })
        .expect("client")
    }

    #[tokio::test]
    async fn posts_text_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/whatsapp/1/message/text"))
            .and(header("authorization", "App secret-key"))
            .and(body_json(json!({
                "from": "447860099299",
                "to": "385911234567",
                "content": { "text": "Booking 123 is confirmed." }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "messageId": "out-1" })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server.uri())
            .send(&SenderAddress::new("385911234567"), "Booking 123 is confirmed.")
            .await
            .expect("send");
    }

    #[tokio::test]
    async fn client_errors_are_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid destination"))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .send(&SenderAddress::new("1"), "hi")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SendError::Rejected {
                status: 400,
                body: "invalid destination".to_string()
            }
        );
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn throttling_and_server_errors_are_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client(&server.uri());
        let to = SenderAddress::new("385911234567");
        assert_eq!(client.send(&to, "hi").await, Err(SendError::RateLimited));
        assert!(matches!(
            client.send(&to, "hi").await,
            Err(SendError::Unavailable { .. })
        ));
    }

    #[test]
    fn long_replies_are_truncated_on_char_boundary() {
        let text = "č".repeat(MAX_REPLY_CHARS + 10);
        let cut = truncate_reply(&text);
        assert_eq!(cut.chars().count(), MAX_REPLY_CHARS);
        assert_eq!(truncate_reply("short"), "short");
    }

    #[test]
    fn bare_host_gets_https() {
        let client = client("xyz.api.infobip.com/");
        assert_eq!(
            client.endpoint,
            "https://xyz.api.infobip.com/whatsapp/1/message/text"
        );
    }

    #[test]
    fn empty_key_is_rejected() {
        let err = InfobipClient::new(InfobipConfig {
            base_url: "https://x".to_string(),
            api_key: " ".to_string(),
            sender_number: "1".to_string(),
            timeout: Duration::from_secs(1),
        })
        .unwrap_err();
        assert!(matches!(err, SendError::InvalidConfig { .. }));
    }

    #[test]
    fn debug_redacts_key() {
        let config = InfobipConfig {
            base_url: "https://x".to_string(),
            api_key: "top-secret".to_string(),
            sender_number: "1".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert!(!format!("{config:?}").contains("top-secret"));
    }
}
