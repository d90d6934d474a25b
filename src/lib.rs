//! Molam Webhooks - Signature Verification & Idempotency for the Molam SDK
//!
//! This crate implements the two protocol primitives every Molam SDK
//! surface shares:
//!
//! # Features
//!
//! - **Webhook Verification**: HMAC-SHA256 `Molam-Signature` headers with a
//!   freshness window and key rotation by `kid`
//! - **Signing**: produce headers for tests, simulators and the platform side
//! - **Idempotency Keys**: validated caller keys or generated
//!   `molam-<ms>-<hex>` keys for mutating calls
//! - **Receiver**: an axum router that verifies, deduplicates and dispatches
//!
//! # Architecture
//!
//! ```text
//! Platform ──▶ POST /webhooks ──▶ SignatureVerifier ──▶ EventDispatcher ──▶ EventHandler
//!                                      │
//!                                      ▼
//!                               SecretResolver (kid → secret)
//!
//! SDK call ──▶ IdempotencyKeyManager ──▶ Idempotency-Key header
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use molam_webhooks::idempotency::make_key;
//! use molam_webhooks::webhook::{verify_signature, KeyRing, WebhookSigner};
//!
//! let secrets = KeyRing::new().with_secret("v1", "whsec_test");
//! let signer = WebhookSigner::new("whsec_test", "v1");
//!
//! let body = br#"{"id":"evt_1","type":"payment.succeeded","data":{}}"#;
//! let header = signer.sign(body).unwrap();
//! assert!(verify_signature(&header, body, &secrets, 300_000).is_ok());
//!
//! let key = make_key(None).unwrap();
//! assert!(key.as_str().starts_with("molam-"));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod idempotency;
pub mod metrics;
pub mod webhook;

// Re-exports for convenience
pub use config::WebhookConfig;
pub use error::{Error, Result};
pub use idempotency::{IdempotencyKey, IdempotencyKeyManager};
pub use webhook::{SignatureVerifier, VerificationError, WebhookEvent, WebhookSigner};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
