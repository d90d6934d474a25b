//! Idempotency keys
//!
//! Every mutating call carries an `Idempotency-Key` header. A key supplied
//! by the caller is passed through untouched after validation; otherwise one
//! is generated as `<prefix>-<epoch_ms>-<24 hex chars>`. The 96-bit random
//! suffix is what guarantees uniqueness across processes and retries; the
//! timestamp only makes keys easy to find in logs.

use std::fmt;

use http::{HeaderMap, HeaderName, HeaderValue};
use rand::Rng;
use thiserror::Error;

/// Header carrying the key on outbound requests
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Maximum key length, in characters
pub const MAX_KEY_LENGTH: usize = 128;

/// Prefix of generated keys
pub const DEFAULT_KEY_PREFIX: &str = "molam";

/// Maximum prefix length, leaving room for `-<ms>-<hex>`
pub const MAX_PREFIX_LENGTH: usize = 64;

/// Random bytes in a generated key (96 bits)
const RANDOM_BYTES: usize = 12;

/// Idempotency key validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyKeyError {
    /// Supplied key longer than [`MAX_KEY_LENGTH`]
    #[error("Idempotency key too long: {len} characters (max {max})")]
    KeyTooLong {
        /// Length of the supplied key
        len: usize,
        /// Allowed maximum
        max: usize,
    },

    /// Supplied key cannot be sent as an HTTP header value
    #[error("Idempotency key must be visible ASCII")]
    InvalidCharacters,

    /// Prefix for generated keys is empty, too long or not visible ASCII
    #[error("Invalid idempotency key prefix: {0}")]
    InvalidPrefix(String),
}

/// Validated idempotency key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Validate a caller-supplied key
    pub fn new(key: impl Into<String>) -> Result<Self, IdempotencyKeyError> {
        let key = key.into();

        let len = key.chars().count();
        if len > MAX_KEY_LENGTH {
            return Err(IdempotencyKeyError::KeyTooLong {
                len,
                max: MAX_KEY_LENGTH,
            });
        }

        if !key.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(IdempotencyKeyError::InvalidCharacters);
        }

        Ok(Self(key))
    }

    /// Key text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Header value for the transport
    pub fn header_value(&self) -> Result<HeaderValue, IdempotencyKeyError> {
        HeaderValue::from_str(&self.0).map_err(|_| IdempotencyKeyError::InvalidCharacters)
    }

    /// Set `Idempotency-Key` on an outbound request
    pub fn apply_to(&self, headers: &mut HeaderMap) -> Result<(), IdempotencyKeyError> {
        headers.insert(
            HeaderName::from_static("idempotency-key"),
            self.header_value()?,
        );
        Ok(())
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IdempotencyKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

/// Produces idempotency keys for mutating calls
#[derive(Debug, Clone)]
pub struct IdempotencyKeyManager {
    prefix: String,
}

impl Default for IdempotencyKeyManager {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl IdempotencyKeyManager {
    /// Manager generating keys with `prefix`
    pub fn new(prefix: impl Into<String>) -> Result<Self, IdempotencyKeyError> {
        let prefix = prefix.into();

        if prefix.is_empty() || prefix.len() > MAX_PREFIX_LENGTH {
            return Err(IdempotencyKeyError::InvalidPrefix(format!(
                "length must be 1..={MAX_PREFIX_LENGTH}"
            )));
        }
        if !prefix.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(IdempotencyKeyError::InvalidPrefix(
                "must be visible ASCII".to_string(),
            ));
        }

        Ok(Self { prefix })
    }

    /// Prefix of generated keys
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Return `provided` unchanged after validation, or generate a key when
    /// it is absent or empty.
    pub fn make_key(&self, provided: Option<&str>) -> Result<IdempotencyKey, IdempotencyKeyError> {
        match provided {
            Some(key) if !key.is_empty() => IdempotencyKey::new(key),
            _ => Ok(self.generate()),
        }
    }

    /// Generate a fresh key
    pub fn generate(&self) -> IdempotencyKey {
        let mut random = [0u8; RANDOM_BYTES];
        rand::rng().fill(&mut random);

        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        IdempotencyKey(format!(
            "{}-{}-{}",
            self.prefix,
            timestamp_ms,
            hex::encode(random)
        ))
    }
}

/// [`IdempotencyKeyManager::make_key`] with the default prefix
pub fn make_key(provided: Option<&str>) -> Result<IdempotencyKey, IdempotencyKeyError> {
    IdempotencyKeyManager::default().make_key(provided)
}
