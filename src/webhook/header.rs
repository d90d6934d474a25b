//! Signature Header Parsing
//!
//! The `Molam-Signature` header carries comma-separated `key=value` pairs:
//!
//! - `t`: sender timestamp, Unix milliseconds
//! - `v1`: HMAC-SHA256 digest of the signed payload, lowercase hex
//! - `kid`: id of the secret that produced the digest
//!
//! Example: `t=1705420800000,v1=5257a869...,kid=v2`
//!
//! Field order is free and unknown keys are ignored so the platform can add
//! fields (e.g. a future `v2` scheme) without breaking receivers.

use std::fmt;
use std::str::FromStr;

use crate::webhook::error::HeaderError;

/// Header name used by the platform
pub const SIGNATURE_HEADER: &str = "Molam-Signature";

/// Key id assumed when the header carries no `kid`
pub const DEFAULT_KEY_ID: &str = "v1";

/// Options controlling how lenient the parser is about `kid`
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Reject headers without an explicit `kid`
    pub require_kid: bool,
    /// Key id used when `kid` is absent and not required
    pub default_key_id: String,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            require_kid: false,
            default_key_id: DEFAULT_KEY_ID.to_string(),
        }
    }
}

/// Parsed `Molam-Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Timestamp exactly as received (decimal text, not re-formatted)
    pub timestamp: String,
    /// Claimed digest, hex
    pub digest_hex: String,
    /// Key id, explicit or defaulted
    pub key_id: String,
    /// Whether `kid` was present on the wire
    pub key_id_explicit: bool,
}

impl SignatureHeader {
    /// Parse with default options (`kid` defaults to `v1`)
    pub fn parse(header: &str) -> Result<Self, HeaderError> {
        Self::parse_with(header, &ParseOptions::default())
    }

    /// Parse with explicit options
    pub fn parse_with(header: &str, options: &ParseOptions) -> Result<Self, HeaderError> {
        if header.trim().is_empty() {
            return Err(HeaderError::Empty);
        }

        let mut timestamp: Option<&str> = None;
        let mut digest: Option<&str> = None;
        let mut key_id: Option<&str> = None;

        for (index, segment) in header.split(',').enumerate() {
            let segment = segment.trim();
            // Split on the first '=' only; values may contain '='
            let (key, value) = segment
                .split_once('=')
                .ok_or(HeaderError::MissingSeparator(index))?;
            let key = key.trim();
            let value = value.trim();

            let slot = match key {
                "" => return Err(HeaderError::EmptyKey(index)),
                "t" => (&mut timestamp, "t"),
                "v1" => (&mut digest, "v1"),
                "kid" => (&mut key_id, "kid"),
                // Unknown keys are ignored for forward compatibility
                _ => continue,
            };

            let (field, name) = slot;
            if field.is_some() {
                return Err(HeaderError::DuplicateField(name));
            }
            if value.is_empty() {
                return Err(HeaderError::EmptyField(name));
            }
            *field = Some(value);
        }

        let timestamp = timestamp.ok_or(HeaderError::MissingField("t"))?;
        let digest = digest.ok_or(HeaderError::MissingField("v1"))?;

        let (key_id, key_id_explicit) = match key_id {
            Some(kid) => (kid.to_string(), true),
            None if options.require_kid => return Err(HeaderError::MissingField("kid")),
            None => (options.default_key_id.clone(), false),
        };

        Ok(Self {
            timestamp: timestamp.to_string(),
            digest_hex: digest.to_string(),
            key_id,
            key_id_explicit,
        })
    }

    /// Timestamp as integer milliseconds, `None` if not a plain decimal `i64`
    pub fn timestamp_ms(&self) -> Option<i64> {
        if !self.timestamp.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.timestamp.parse::<i64>().ok()
    }
}

impl FromStr for SignatureHeader {
    type Err = HeaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SignatureHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={},v1={},kid={}",
            self.timestamp, self.digest_hex, self.key_id
        )
    }
}
