//! Error types for Molam webhooks
//!
//! Each component keeps its own `thiserror` enum; [`Error`] rolls them up
//! for callers that go through several components in one call.

use thiserror::Error;

use crate::config::ConfigError;
use crate::idempotency::IdempotencyKeyError;
use crate::webhook::error::{DispatchError, SigningError, VerificationError};

/// The main error type for Molam webhook operations
#[derive(Error, Debug)]
pub enum Error {
    /// Signature verification errors
    #[error("Verification error: {0}")]
    Verification(#[from] VerificationError),

    /// Event parsing and dispatch errors
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Idempotency key errors
    #[error("Idempotency key error: {0}")]
    IdempotencyKey(#[from] IdempotencyKeyError),

    /// Signing errors
    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Molam webhook operations
pub type Result<T> = std::result::Result<T, Error>;
