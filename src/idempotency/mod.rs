//! Idempotency Keys for Mutating Calls
//!
//! - **Key contract**: caller-supplied keys pass through after validation
//!   (at most 128 characters, visible ASCII); absent keys are generated with
//!   96 bits of entropy
//! - **Header**: `Idempotency-Key` on every POST/PUT
//! - **Replay contract**: a repeated key on the same route returns the stored
//!   response for the retention window (24h by default) instead of running
//!   the operation again; concurrent repeats wait for the first execution
//!
//! # Example
//!
//! ```rust
//! use molam_webhooks::idempotency::{make_key, IDEMPOTENCY_HEADER};
//!
//! let generated = make_key(None).unwrap();
//! assert!(generated.as_str().starts_with("molam-"));
//!
//! let supplied = make_key(Some("order-12345")).unwrap();
//! assert_eq!(supplied.as_str(), "order-12345");
//! assert_eq!(IDEMPOTENCY_HEADER, "Idempotency-Key");
//! ```

pub mod key;
pub mod store;

pub use key::{
    make_key, IdempotencyKey, IdempotencyKeyError, IdempotencyKeyManager, IDEMPOTENCY_HEADER,
    MAX_KEY_LENGTH,
};
pub use store::{IdempotentResponse, InMemoryIdempotencyStore, StoredResponse};
