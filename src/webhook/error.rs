//! Webhook Error Types
//!
//! Every verification failure is a typed value the caller branches on.
//! Malformed input from the wire is expected, so nothing here is raised as a
//! panic, and the claimed or computed digest never appears in a message.

use std::fmt;

use thiserror::Error;

/// Reasons a `Molam-Signature` header could not be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// Header absent, empty or whitespace only
    #[error("signature header is empty")]
    Empty,

    /// A comma-separated segment has no `=`
    #[error("segment {0} is not a key=value pair")]
    MissingSeparator(usize),

    /// A segment starts with `=`
    #[error("segment {0} has an empty key")]
    EmptyKey(usize),

    /// A required field is absent
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// A known field is present with an empty value
    #[error("field `{0}` is empty")]
    EmptyField(&'static str),

    /// A known field appears more than once
    #[error("field `{0}` appears more than once")]
    DuplicateField(&'static str),
}

/// Failure raised by a secret resolver itself (store unreachable, decode
/// error, ...). Kept apart from "no secret for this kid".
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ResolverError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ResolverError {
    /// Create a resolver error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a resolver error wrapping an underlying cause
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Webhook signature verification failure
#[derive(Error, Debug)]
pub enum VerificationError {
    /// Header missing, empty, or fields unparsable
    #[error("Malformed signature header: {0}")]
    MalformedHeader(#[from] HeaderError),

    /// `t` is not a valid integer
    #[error("Invalid signature timestamp")]
    InvalidTimestamp,

    /// Timestamp is outside the freshness window (past or future)
    #[error("Signature timestamp outside tolerance: {age_ms}ms > {tolerance_ms}ms")]
    TimestampOutOfTolerance {
        /// Absolute distance between the claimed timestamp and now
        age_ms: u64,
        /// Configured window
        tolerance_ms: u64,
    },

    /// No secret registered for the claimed key id
    #[error("Unknown key id: {0}")]
    UnknownKeyId(String),

    /// Computed digest does not match the claimed digest
    #[error("Signature mismatch")]
    SignatureMismatch,

    /// The secret resolver failed
    #[error("Secret resolver failed: {0}")]
    Resolver(#[from] ResolverError),

    /// Digest computation failed
    #[error("Internal verification error: {0}")]
    Internal(#[from] SigningError),
}

/// Digest computation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    /// The secret was rejected as an HMAC key
    #[error("Invalid HMAC key: {0}")]
    InvalidKey(String),
}

impl VerificationError {
    /// Stable failure kind, used for logs and metrics labels
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MalformedHeader(_) => FailureKind::MalformedHeader,
            Self::InvalidTimestamp => FailureKind::InvalidTimestamp,
            Self::TimestampOutOfTolerance { .. } => FailureKind::TimestampOutOfTolerance,
            Self::UnknownKeyId(_) => FailureKind::UnknownKeyId,
            Self::SignatureMismatch => FailureKind::SignatureMismatch,
            Self::Resolver(_) => FailureKind::ResolverError,
            Self::Internal(_) => FailureKind::Internal,
        }
    }

    /// HTTP status returned to the sender. Uniform for every kind so the
    /// response does not reveal which check failed.
    pub fn status_code(&self) -> u16 {
        401
    }
}

/// Verification failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// See [`VerificationError::MalformedHeader`]
    MalformedHeader,
    /// See [`VerificationError::InvalidTimestamp`]
    InvalidTimestamp,
    /// See [`VerificationError::TimestampOutOfTolerance`]
    TimestampOutOfTolerance,
    /// See [`VerificationError::UnknownKeyId`]
    UnknownKeyId,
    /// See [`VerificationError::SignatureMismatch`]
    SignatureMismatch,
    /// See [`VerificationError::Resolver`]
    ResolverError,
    /// See [`VerificationError::Internal`]
    Internal,
}

impl FailureKind {
    /// All kinds, in metrics export order
    pub const ALL: [FailureKind; 7] = [
        Self::MalformedHeader,
        Self::InvalidTimestamp,
        Self::TimestampOutOfTolerance,
        Self::UnknownKeyId,
        Self::SignatureMismatch,
        Self::ResolverError,
        Self::Internal,
    ];

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedHeader => "malformed_header",
            Self::InvalidTimestamp => "invalid_timestamp",
            Self::TimestampOutOfTolerance => "timestamp_out_of_tolerance",
            Self::UnknownKeyId => "unknown_key_id",
            Self::SignatureMismatch => "signature_mismatch",
            Self::ResolverError => "resolver_error",
            Self::Internal => "internal",
        }
    }

    /// Position in [`FailureKind::ALL`]
    pub(crate) fn index(&self) -> usize {
        match self {
            Self::MalformedHeader => 0,
            Self::InvalidTimestamp => 1,
            Self::TimestampOutOfTolerance => 2,
            Self::UnknownKeyId => 3,
            Self::SignatureMismatch => 4,
            Self::ResolverError => 5,
            Self::Internal => 6,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a verification call
pub type VerificationResult<T> = std::result::Result<T, VerificationError>;

/// Event dispatch errors
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Body is not a valid event envelope
    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),

    /// The domain handler returned an error
    #[error("Handler failed for event {event_id}: {message}")]
    HandlerFailed {
        /// Event being processed
        event_id: String,
        /// Handler error message
        message: String,
    },

    /// The domain handler did not finish in time
    #[error("Handler for event {event_id} timed out after {timeout_ms}ms")]
    Timeout {
        /// Event being processed
        event_id: String,
        /// Configured processing timeout
        timeout_ms: u64,
    },
}

/// Result of a dispatch call
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
