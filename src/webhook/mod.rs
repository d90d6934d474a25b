//! Webhook Signature Verification Module
//!
//! One implementation of the platform's webhook protocol, shared by every
//! SDK surface (sync, async, framework handlers):
//!
//! - **Signature Verification**: HMAC-SHA256 over `{t}.{raw_body}`, checked
//!   in constant time
//! - **Replay Protection**: symmetric freshness window, 5 minutes by default
//! - **Key Rotation**: the header's `kid` selects the secret, resolved on
//!   every call
//! - **Event Dispatch**: verified events routed to typed handlers with
//!   redelivery suppression
//!
//! # Architecture
//!
//! ```text
//! Request -> Parse Header -> Freshness -> Resolve kid -> HMAC + compare -> Parse JSON -> Dispatch
//!                 |              |             |               |               |
//!                 v              v             v               v               v
//!                401            401           401             401             400
//! ```
//!
//! # Example
//!
//! ```rust
//! use molam_webhooks::webhook::{generate_signature, KeyRing, SignatureVerifier};
//!
//! let secrets = KeyRing::new()
//!     .with_secret("v1", "whsec_old")
//!     .with_secret("v2", "whsec_new");
//!
//! let body = br#"{"id":"evt_1","type":"payment.succeeded","data":{}}"#;
//! let now = chrono::Utc::now().timestamp_millis();
//! let header = generate_signature(&"whsec_new".into(), now, body, "v2").unwrap();
//!
//! let verified = SignatureVerifier::default()
//!     .verify(&header, body, &secrets)
//!     .unwrap();
//! assert_eq!(verified.key_id, "v2");
//! ```

pub mod canonical;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod handler;
pub mod header;
pub mod secret;
pub mod signer;
pub mod verifier;

// Re-export commonly used items
pub use canonical::canonicalize;
pub use dispatch::{DispatchConfig, DispatchOutcome, EventDispatcher, EventHandler, LoggingHandler};
pub use error::{
    DispatchError, FailureKind, HeaderError, ResolverError, SigningError, VerificationError,
    VerificationResult,
};
pub use event::{EventType, WebhookEvent};
pub use handler::{webhook_handler, webhook_router, WebhookState};
pub use header::{ParseOptions, SignatureHeader, DEFAULT_KEY_ID, SIGNATURE_HEADER};
pub use secret::{
    resolver_fn, AsyncSecretResolver, EnvSecretResolver, KeyRing, SecretResolver, WebhookSecret,
};
pub use signer::{compute_digest, generate_signature, WebhookSigner};
pub use verifier::{
    verify_signature, SignatureVerifier, VerifiedSignature, VerifierConfig, DEFAULT_TOLERANCE_MS,
};
