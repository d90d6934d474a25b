//! Webhook signing
//!
//! The sending side of the protocol. Receivers only need it in tests and
//! tooling, but it shares [`compute_digest`] with the verifier so there is
//! exactly one HMAC construction in the crate.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::webhook::canonical::canonicalize;
use crate::webhook::error::SigningError;
use crate::webhook::secret::WebhookSecret;

type HmacSha256 = Hmac<Sha256>;

/// Compute the lowercase hex HMAC-SHA256 of `{timestamp}.{raw_body}`
pub fn compute_digest(
    secret: &WebhookSecret,
    timestamp: &str,
    raw_body: &[u8],
) -> Result<String, SigningError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SigningError::InvalidKey(e.to_string()))?;

    mac.update(&canonicalize(timestamp, raw_body));
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a complete `Molam-Signature` header value
///
/// Output: `t=<timestamp_ms>,v1=<64 hex chars>,kid=<key_id>`
pub fn generate_signature(
    secret: &WebhookSecret,
    timestamp_ms: i64,
    raw_body: &[u8],
    key_id: &str,
) -> Result<String, SigningError> {
    let timestamp = timestamp_ms.to_string();
    let digest = compute_digest(secret, &timestamp, raw_body)?;
    Ok(format!("t={timestamp},v1={digest},kid={key_id}"))
}

/// Signs payloads with one secret under one key id
#[derive(Debug, Clone)]
pub struct WebhookSigner {
    secret: WebhookSecret,
    key_id: String,
}

impl WebhookSigner {
    /// Create a signer
    pub fn new(secret: impl Into<WebhookSecret>, key_id: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            key_id: key_id.into(),
        }
    }

    /// Key id written into generated headers
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Sign with the current time
    pub fn sign(&self, raw_body: &[u8]) -> Result<String, SigningError> {
        self.sign_at(chrono::Utc::now().timestamp_millis(), raw_body)
    }

    /// Sign with an explicit timestamp
    pub fn sign_at(&self, timestamp_ms: i64, raw_body: &[u8]) -> Result<String, SigningError> {
        generate_signature(&self.secret, timestamp_ms, raw_body, &self.key_id)
    }

    /// Digest alone, for callers assembling the header themselves
    pub fn compute_digest(&self, timestamp: &str, raw_body: &[u8]) -> Result<String, SigningError> {
        compute_digest(&self.secret, timestamp, raw_body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // echo -n '1700000000000.{"a":1}' | openssl dgst -sha256 -hmac secret
        let digest = compute_digest(&WebhookSecret::from("secret"), "1700000000000", br#"{"a":1}"#)
            .unwrap();

        assert_eq!(
            digest,
            "4ef2732b0d632a6897af3a6d02a6de287f60d6c5f15dabdb0ceb045a34e3c5a7"
        );
    }

    #[test]
    fn test_digest_is_lowercase_hex_64() {
        let digest = compute_digest(&WebhookSecret::from("k"), "1", b"body").unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_generate_signature_format() {
        let header =
            generate_signature(&WebhookSecret::from("k"), 1_705_420_800_000, b"{}", "v2").unwrap();

        assert!(header.starts_with("t=1705420800000,v1="));
        assert!(header.ends_with(",kid=v2"));
    }

    #[test]
    fn test_signer_uses_key_id() {
        let signer = WebhookSigner::new("whsec_a", "v9");
        let header = signer.sign_at(1, b"x").unwrap();
        assert_eq!(signer.key_id(), "v9");
        assert!(header.ends_with(",kid=v9"));

        let digest = signer.compute_digest("1", b"x").unwrap();
        assert_eq!(header, format!("t=1,v1={digest},kid=v9"));
    }

    #[test]
    fn test_empty_secret_is_accepted() {
        // HMAC pads short keys; an empty secret still yields a digest
        assert!(compute_digest(&WebhookSecret::from(""), "1", b"x").is_ok());
    }
}
