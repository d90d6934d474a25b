//! Webhook Event Types
//!
//! The envelope handed to the dispatcher once a delivery has been verified.
//! Payloads stay as `serde_json::Value`; payment-domain modeling belongs to
//! the resource clients.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::webhook::error::{DispatchError, DispatchResult};

/// Event types emitted by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// `payment.succeeded`
    PaymentSucceeded,
    /// `payment.failed`
    PaymentFailed,

    /// `payment_intent.succeeded`
    PaymentIntentSucceeded,
    /// `payment_intent.failed`
    PaymentIntentFailed,
    /// `payment_intent.canceled`
    PaymentIntentCanceled,

    /// `refund.created`
    RefundCreated,
    /// `refund.succeeded`
    RefundSucceeded,

    /// `payout.paid`
    PayoutPaid,

    /// Any type this crate does not name
    Unknown,
}

impl FromStr for EventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl EventType {
    /// Map a wire name to a type; unrecognised names are `Unknown`
    pub fn parse(s: &str) -> Self {
        match s {
            "payment.succeeded" => Self::PaymentSucceeded,
            "payment.failed" => Self::PaymentFailed,
            "payment_intent.succeeded" => Self::PaymentIntentSucceeded,
            "payment_intent.failed" => Self::PaymentIntentFailed,
            "payment_intent.canceled" => Self::PaymentIntentCanceled,
            "refund.created" => Self::RefundCreated,
            "refund.succeeded" => Self::RefundSucceeded,
            "payout.paid" => Self::PayoutPaid,
            _ => Self::Unknown,
        }
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentSucceeded => "payment.succeeded",
            Self::PaymentFailed => "payment.failed",
            Self::PaymentIntentSucceeded => "payment_intent.succeeded",
            Self::PaymentIntentFailed => "payment_intent.failed",
            Self::PaymentIntentCanceled => "payment_intent.canceled",
            Self::RefundCreated => "refund.created",
            Self::RefundSucceeded => "refund.succeeded",
            Self::PayoutPaid => "payout.paid",
            Self::Unknown => "unknown",
        }
    }

    /// Check if this is a known event type
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generic webhook event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Unique identifier for the event, used for inbound deduplication
    pub id: String,

    /// Type of event, as sent
    #[serde(rename = "type")]
    pub event_type: String,

    /// Creation time, if the platform included it
    #[serde(default)]
    pub created: Option<i64>,

    /// Whether this is a live mode event
    #[serde(default)]
    pub livemode: bool,

    /// Event payload (payment, refund, payout object...)
    #[serde(default)]
    pub data: serde_json::Value,
}

impl WebhookEvent {
    /// Parse from raw JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> DispatchResult<Self> {
        let event: Self = serde_json::from_slice(bytes)
            .map_err(|e| DispatchError::InvalidPayload(e.to_string()))?;

        if event.id.is_empty() {
            return Err(DispatchError::InvalidPayload(
                "event id is empty".to_string(),
            ));
        }
        Ok(event)
    }

    /// Get the typed event type
    pub fn typed_event_type(&self) -> EventType {
        EventType::parse(&self.event_type)
    }

    /// Object id inside `data`, when present (`data.id` or `data.object.id`)
    pub fn object_id(&self) -> Option<&str> {
        self.data
            .get("id")
            .or_else(|| self.data.get("object").and_then(|o| o.get("id")))
            .and_then(|v| v.as_str())
    }
}
