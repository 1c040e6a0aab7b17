//! Webhook ingress.
//!
//! `POST /webhook/{provider}` verifies the signature over the raw body,
//! parses the messages, drops ids the ledger has already seen and enqueues
//! the rest. Nothing here touches conversation state.

use crate::error::IngressError;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use mobility_relay_messaging::{Provider, SIGNATURE_HEADER, verify_signature};
use mobility_relay_state::{ClaimOutcome, DeliveryLedger, QueueMessage, WorkQueue};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Shared state of the ingress handlers.
#[derive(Clone)]
pub struct IngressState {
    secret: Arc<[u8]>,
    queue: Arc<dyn WorkQueue>,
    ledger: Arc<dyn DeliveryLedger>,
}

impl IngressState {
    #[must_use]
    pub fn new(secret: &str, queue: Arc<dyn WorkQueue>, ledger: Arc<dyn DeliveryLedger>) -> Self {
        Self {
            secret: Arc::from(secret.as_bytes()),
            queue,
            ledger,
        }
    }
}

pub fn router(state: IngressState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook/{provider}", post(webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn webhook(
    State(state): State<IngressState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, IngressError> {
    let result = accept(&state, &provider, &headers, &body).await;
    if let Err(error) = &result {
        warn!(provider = %provider, %error, "webhook rejected");
    }
    result
}

async fn accept(
    state: &IngressState,
    provider: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<StatusCode, IngressError> {
    let provider = Provider::from_path(provider).ok_or_else(|| IngressError::UnknownProvider {
        name: provider.to_string(),
    })?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    verify_signature(&state.secret, body, signature)?;

    let messages = provider.parse(body)?;
    for message in messages {
        let id = message.correlation_id();
        if state.ledger.claim(&id).await? == ClaimOutcome::Duplicate {
            debug!(correlation_id = %id, "duplicate delivery, skipping");
            continue;
        }

        let sender = message.from.clone();
        let item = QueueMessage::new(id.clone(), message.from, message.text, message.raw);
        if let Err(error) = state.queue.enqueue(item).await {
            // Forget the id so the provider's retry is not dropped as a duplicate.
            if let Err(release_error) = state.ledger.release(&id).await {
                warn!(correlation_id = %id, %release_error, "failed to release ledger claim");
            }
            return Err(error.into());
        }
        info!(correlation_id = %id, %sender, "message enqueued");
    }
    Ok(StatusCode::OK)
}
