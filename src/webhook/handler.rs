//! Axum receiver for platform webhooks
//!
//! - `POST /webhooks` - verify, parse, dispatch
//! - `GET /health` - liveness probe
//! - `GET /metrics` - Prometheus text
//!
//! ```text
//! POST /webhooks --> verify (raw bytes) --> parse JSON --> dispatch
//!                        |                      |              |
//!                        v                      v              v
//!                 401 invalid_signature   400 invalid_payload  200 / 500
//! ```
//!
//! Every verification failure gets the same 401 body; the failure kind is
//! only logged. The body is verified before it is parsed, as received.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::metrics::global_metrics;
use crate::webhook::dispatch::{DispatchOutcome, EventDispatcher};
use crate::webhook::error::DispatchError;
use crate::webhook::event::WebhookEvent;
use crate::webhook::header::SIGNATURE_HEADER;
use crate::webhook::secret::AsyncSecretResolver;
use crate::webhook::verifier::SignatureVerifier;

/// Shared state of the webhook receiver
pub struct WebhookState {
    /// Verifier settings
    pub verifier: SignatureVerifier,
    /// Secret lookup by key id
    pub resolver: Arc<dyn AsyncSecretResolver>,
    /// Routes verified events to handlers
    pub dispatcher: Arc<EventDispatcher>,
}

impl WebhookState {
    /// Create receiver state
    pub fn new(
        verifier: SignatureVerifier,
        resolver: Arc<dyn AsyncSecretResolver>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            verifier,
            resolver,
            dispatcher,
        }
    }
}

/// Body of a successful delivery
#[derive(Debug, Clone, Serialize)]
pub struct ReceivedResponse {
    /// Always true
    pub received: bool,
    /// Set when the event id was already processed
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

/// Webhook delivery endpoint.
///
/// # Route
/// `POST /webhooks`
///
/// # Response
/// - `200 OK` - `{"received":true}`, plus `"duplicate":true` for redeliveries
/// - `400 Bad Request` - signature valid, body not an event envelope
/// - `401 Unauthorized` - any verification failure
/// - `500 Internal Server Error` - handler failed or timed out; the platform
///   will redeliver
#[instrument(skip_all)]
pub async fn webhook_handler(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let response = handle_delivery(&state, &headers, &body).await;
    global_metrics().record_delivery(started.elapsed());
    response
}

async fn handle_delivery(state: &WebhookState, headers: &HeaderMap, body: &[u8]) -> Response {
    // Missing or non-UTF-8 header verifies as an empty, malformed header
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if let Err(e) = state
        .verifier
        .verify_async(signature, body, state.resolver.as_ref())
        .await
    {
        debug!(kind = %e.kind(), "Rejecting webhook delivery");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid_signature" })),
        )
            .into_response();
    }

    let event = match WebhookEvent::from_bytes(body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Verified webhook body is not a valid event");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid_payload" })),
            )
                .into_response();
        }
    };

    match state.dispatcher.dispatch(&event).await {
        Ok(DispatchOutcome::Duplicate) => {
            global_metrics().record_duplicate();
            received(true)
        }
        Ok(_) => {
            global_metrics().record_event_processed();
            received(false)
        }
        Err(e) => {
            global_metrics().record_dispatch_error();
            let status = match e {
                DispatchError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
                DispatchError::HandlerFailed { .. } | DispatchError::Timeout { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            (status, Json(json!({ "error": "processing_failed" }))).into_response()
        }
    }
}

fn received(duplicate: bool) -> Response {
    (
        StatusCode::OK,
        Json(ReceivedResponse {
            received: true,
            duplicate,
        }),
    )
        .into_response()
}

/// Liveness probe
#[instrument(skip_all)]
pub async fn health_handler() -> impl IntoResponse {
    debug!("Health check requested");
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// Prometheus scrape endpoint
#[instrument(skip_all)]
pub async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        global_metrics().to_prometheus_format(),
    )
}

/// Create the receiver router.
///
/// # Routes
/// - `POST /webhooks`
/// - `GET /health`
/// - `GET /metrics`
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhooks", post(webhook_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
