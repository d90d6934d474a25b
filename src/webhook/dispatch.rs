//! Event Dispatch
//!
//! Routes verified events to domain handlers.
//!
//! ```text
//! Verified event
//!       |
//!       v
//! [Seen this id?] --> yes --> Duplicate (ack, do nothing)
//!       |
//!       v
//! [Handler, with timeout] --> error or cancelled --> forget id (platform redelivers)
//!       |
//!       v
//! Handled / Ignored
//! ```
//!
//! Deduplication is by event id within a retention window. It protects
//! against at-least-once redelivery of the same event; it is unrelated to
//! outbound idempotency keys.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::timeout;

use crate::webhook::error::{DispatchError, DispatchResult};
use crate::webhook::event::{EventType, WebhookEvent};

/// Handler trait for platform events. Every method defaults to a no-op.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// `payment.succeeded` and `payment_intent.succeeded`
    async fn on_payment_succeeded(&self, _event: &WebhookEvent) -> anyhow::Result<()> {
        Ok(())
    }

    /// `payment.failed` and `payment_intent.failed`
    async fn on_payment_failed(&self, _event: &WebhookEvent) -> anyhow::Result<()> {
        Ok(())
    }

    /// `payment_intent.canceled`
    async fn on_payment_canceled(&self, _event: &WebhookEvent) -> anyhow::Result<()> {
        Ok(())
    }

    /// `refund.created`
    async fn on_refund_created(&self, _event: &WebhookEvent) -> anyhow::Result<()> {
        Ok(())
    }

    /// `refund.succeeded`
    async fn on_refund_succeeded(&self, _event: &WebhookEvent) -> anyhow::Result<()> {
        Ok(())
    }

    /// `payout.paid`
    async fn on_payout_paid(&self, _event: &WebhookEvent) -> anyhow::Result<()> {
        Ok(())
    }

    /// Any other event type
    async fn on_unknown(&self, _event: &WebhookEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound on a single handler call
    pub processing_timeout: Duration,
    /// How long a processed event id is remembered
    pub dedup_ttl: Duration,
    /// Maximum remembered ids
    pub max_tracked_events: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            processing_timeout: Duration::from_secs(30),
            dedup_ttl: Duration::from_secs(24 * 60 * 60),
            max_tracked_events: 100_000,
        }
    }
}

/// What happened to a dispatched event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A typed handler ran
    Handled(EventType),
    /// Unknown event type; `on_unknown` ran
    Ignored,
    /// Event id already processed or in progress
    Duplicate,
}

/// Routes events to an [`EventHandler`], suppressing redeliveries
pub struct EventDispatcher {
    handler: Arc<dyn EventHandler>,
    config: DispatchConfig,
    seen: Mutex<HashMap<String, Instant>>,
}

impl EventDispatcher {
    /// Create a dispatcher
    pub fn new(handler: Arc<dyn EventHandler>, config: DispatchConfig) -> Self {
        Self {
            handler,
            config,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatch one verified event
    pub async fn dispatch(&self, event: &WebhookEvent) -> DispatchResult<DispatchOutcome> {
        if !self.claim(&event.id) {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Duplicate webhook event ignored"
            );
            return Ok(DispatchOutcome::Duplicate);
        }

        let claim = Claim {
            seen: &self.seen,
            event_id: &event.id,
            completed: false,
        };
        let result = self.run_handler(event).await;
        if result.is_ok() {
            claim.complete();
        }
        result
    }

    /// Number of remembered event ids
    pub fn tracked_events(&self) -> usize {
        self.seen.lock().len()
    }

    /// Record `event_id` as seen; false if it already was
    fn claim(&self, event_id: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock();

        if let Some(at) = seen.get(event_id) {
            if now.duration_since(*at) < self.config.dedup_ttl {
                return false;
            }
        }

        if seen.len() >= self.config.max_tracked_events {
            let ttl = self.config.dedup_ttl;
            seen.retain(|_, at| now.duration_since(*at) < ttl);
            if seen.len() >= self.config.max_tracked_events {
                if let Some(oldest) = seen
                    .iter()
                    .min_by_key(|(_, at)| **at)
                    .map(|(id, _)| id.clone())
                {
                    seen.remove(&oldest);
                }
            }
        }

        seen.insert(event_id.to_string(), now);
        true
    }

    async fn run_handler(&self, event: &WebhookEvent) -> DispatchResult<DispatchOutcome> {
        let event_type = event.typed_event_type();
        let handler = &self.handler;

        let result = timeout(self.config.processing_timeout, async {
            match event_type {
                EventType::PaymentSucceeded | EventType::PaymentIntentSucceeded => {
                    handler.on_payment_succeeded(event).await
                }
                EventType::PaymentFailed | EventType::PaymentIntentFailed => {
                    handler.on_payment_failed(event).await
                }
                EventType::PaymentIntentCanceled => handler.on_payment_canceled(event).await,
                EventType::RefundCreated => handler.on_refund_created(event).await,
                EventType::RefundSucceeded => handler.on_refund_succeeded(event).await,
                EventType::PayoutPaid => handler.on_payout_paid(event).await,
                EventType::Unknown => {
                    tracing::debug!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        "Unknown event type"
                    );
                    handler.on_unknown(event).await
                }
            }
        })
        .await;

        match result {
            Ok(Ok(())) => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Webhook event processed"
                );
                Ok(if event_type.is_known() {
                    DispatchOutcome::Handled(event_type)
                } else {
                    DispatchOutcome::Ignored
                })
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Webhook event handler failed"
                );
                Err(DispatchError::HandlerFailed {
                    event_id: event.id.clone(),
                    message: e.to_string(),
                })
            }
            Err(_) => Err(DispatchError::Timeout {
                event_id: event.id.clone(),
                timeout_ms: self.config.processing_timeout.as_millis() as u64,
            }),
        }
    }
}

/// Seen-marker for an event id whose handler has not finished yet.
///
/// Dropping it without [`Claim::complete`] forgets the id, so a failed,
/// timed out or cancelled dispatch lets the redelivery through.
struct Claim<'a> {
    seen: &'a Mutex<HashMap<String, Instant>>,
    event_id: &'a str,
    completed: bool,
}

impl Claim<'_> {
    fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.seen.lock().remove(self.event_id);
        }
    }
}

/// Logging handler that logs all events
#[derive(Clone)]
pub struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn on_payment_succeeded(&self, event: &WebhookEvent) -> anyhow::Result<()> {
        tracing::info!(
            event_id = %event.id,
            object_id = ?event.object_id(),
            amount = ?event.data.get("amount"),
            currency = ?event.data.get("currency"),
            "Payment succeeded"
        );
        Ok(())
    }

    async fn on_payment_failed(&self, event: &WebhookEvent) -> anyhow::Result<()> {
        tracing::warn!(
            event_id = %event.id,
            object_id = ?event.object_id(),
            "Payment failed"
        );
        Ok(())
    }

    async fn on_payment_canceled(&self, event: &WebhookEvent) -> anyhow::Result<()> {
        tracing::info!(event_id = %event.id, object_id = ?event.object_id(), "Payment canceled");
        Ok(())
    }

    async fn on_refund_created(&self, event: &WebhookEvent) -> anyhow::Result<()> {
        tracing::info!(event_id = %event.id, object_id = ?event.object_id(), "Refund created");
        Ok(())
    }

    async fn on_refund_succeeded(&self, event: &WebhookEvent) -> anyhow::Result<()> {
        tracing::info!(event_id = %event.id, object_id = ?event.object_id(), "Refund succeeded");
        Ok(())
    }

    async fn on_payout_paid(&self, event: &WebhookEvent) -> anyhow::Result<()> {
        tracing::info!(event_id = %event.id, object_id = ?event.object_id(), "Payout paid");
        Ok(())
    }

    async fn on_unknown(&self, event: &WebhookEvent) -> anyhow::Result<()> {
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Unhandled event type"
        );
        Ok(())
    }
}
