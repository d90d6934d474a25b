//! Webhook Signature Verification
//!
//! Implements HMAC-SHA256 signature verification for platform webhooks with
//! replay protection and key rotation.
//!
//! # Verification Process
//!
//! 1. Parse the `Molam-Signature` header
//! 2. Validate `t` is a plain decimal integer
//! 3. Reject if `|now - t| > tolerance` (past and future alike)
//! 4. Resolve the secret for `kid`
//! 5. Compute HMAC-SHA256 over `{t}.{raw_body}`
//! 6. Compare digests in constant time
//!
//! The window is inclusive: a timestamp exactly `tolerance_ms` away is
//! accepted.

use subtle::ConstantTimeEq;

use crate::error::Result;
use crate::metrics::global_metrics;
use crate::webhook::error::{VerificationError, VerificationResult};
use crate::webhook::event::WebhookEvent;
use crate::webhook::header::{ParseOptions, SignatureHeader, DEFAULT_KEY_ID};
use crate::webhook::secret::{AsyncSecretResolver, SecretResolver, WebhookSecret};
use crate::webhook::signer::compute_digest;

/// Default freshness window: 5 minutes
pub const DEFAULT_TOLERANCE_MS: u64 = 300_000;

/// Verifier settings
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Maximum `|now - t|` in milliseconds
    pub tolerance_ms: u64,
    /// Reject headers that omit `kid`
    pub require_kid: bool,
    /// Key id assumed when `kid` is omitted and not required
    pub default_key_id: String,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            tolerance_ms: DEFAULT_TOLERANCE_MS,
            require_kid: false,
            default_key_id: DEFAULT_KEY_ID.to_string(),
        }
    }
}

/// Successful verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSignature {
    /// Sender timestamp
    pub timestamp_ms: i64,
    /// Key id whose secret matched
    pub key_id: String,
    /// `|now - t|` at verification time
    pub age_ms: u64,
}

/// Header that passed the parse and freshness checks
struct FreshHeader {
    header: SignatureHeader,
    timestamp_ms: i64,
    age_ms: u64,
}

/// Signature verifier for platform webhooks
#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier {
    config: VerifierConfig,
}

impl SignatureVerifier {
    /// Create a verifier
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    /// Verifier with default settings and a custom window
    pub fn with_tolerance_ms(tolerance_ms: u64) -> Self {
        Self::new(VerifierConfig {
            tolerance_ms,
            ..VerifierConfig::default()
        })
    }

    /// Active settings
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verify against the current clock
    ///
    /// # Arguments
    ///
    /// * `header` - The `Molam-Signature` header value
    /// * `raw_body` - The request body exactly as received
    /// * `resolver` - Secret lookup by key id
    pub fn verify(
        &self,
        header: &str,
        raw_body: &[u8],
        resolver: &dyn SecretResolver,
    ) -> VerificationResult<VerifiedSignature> {
        self.verify_at(now_ms(), header, raw_body, resolver)
    }

    /// Verify against an explicit clock reading
    pub fn verify_at(
        &self,
        now_ms: i64,
        header: &str,
        raw_body: &[u8],
        resolver: &dyn SecretResolver,
    ) -> VerificationResult<VerifiedSignature> {
        let fresh = self.fresh_header(now_ms, header)?;
        let secret = resolver
            .resolve(&fresh.header.key_id)
            .map_err(|e| self.reject(Some(&fresh.header), e.into()))?;
        self.check_digest(fresh, secret, raw_body)
    }

    /// Verify with a resolver that performs async I/O
    pub async fn verify_async(
        &self,
        header: &str,
        raw_body: &[u8],
        resolver: &dyn AsyncSecretResolver,
    ) -> VerificationResult<VerifiedSignature> {
        self.verify_async_at(now_ms(), header, raw_body, resolver)
            .await
    }

    /// Async variant of [`SignatureVerifier::verify_at`]
    pub async fn verify_async_at(
        &self,
        now_ms: i64,
        header: &str,
        raw_body: &[u8],
        resolver: &dyn AsyncSecretResolver,
    ) -> VerificationResult<VerifiedSignature> {
        let fresh = self.fresh_header(now_ms, header)?;
        let secret = resolver
            .resolve_async(&fresh.header.key_id)
            .await
            .map_err(|e| self.reject(Some(&fresh.header), e.into()))?;
        self.check_digest(fresh, secret, raw_body)
    }

    /// Verify, then parse the body as an event envelope
    pub fn construct_event(
        &self,
        header: &str,
        raw_body: &[u8],
        resolver: &dyn SecretResolver,
    ) -> Result<WebhookEvent> {
        self.verify(header, raw_body, resolver)?;
        Ok(WebhookEvent::from_bytes(raw_body)?)
    }

    /// Steps 1-3: parse, timestamp format, freshness window
    fn fresh_header(&self, now_ms: i64, header: &str) -> VerificationResult<FreshHeader> {
        let options = ParseOptions {
            require_kid: self.config.require_kid,
            default_key_id: self.config.default_key_id.clone(),
        };

        let header = SignatureHeader::parse_with(header, &options)
            .map_err(|e| self.reject(None, e.into()))?;

        let timestamp_ms = header
            .timestamp_ms()
            .ok_or_else(|| self.reject(Some(&header), VerificationError::InvalidTimestamp))?;

        let age_ms = now_ms.abs_diff(timestamp_ms);
        if age_ms > self.config.tolerance_ms {
            let err = VerificationError::TimestampOutOfTolerance {
                age_ms,
                tolerance_ms: self.config.tolerance_ms,
            };
            return Err(self.reject(Some(&header), err));
        }

        Ok(FreshHeader {
            header,
            timestamp_ms,
            age_ms,
        })
    }

    /// Steps 4-6 once the resolver has answered
    fn check_digest(
        &self,
        fresh: FreshHeader,
        secret: Option<WebhookSecret>,
        raw_body: &[u8],
    ) -> VerificationResult<VerifiedSignature> {
        let FreshHeader {
            header,
            timestamp_ms,
            age_ms,
        } = fresh;

        let Some(secret) = secret else {
            let err = VerificationError::UnknownKeyId(header.key_id.clone());
            return Err(self.reject(Some(&header), err));
        };

        let expected = compute_digest(&secret, &header.timestamp, raw_body)
            .map_err(|e| self.reject(Some(&header), e.into()))?;

        let matches: bool = expected
            .as_bytes()
            .ct_eq(header.digest_hex.as_bytes())
            .into();
        if !matches {
            return Err(self.reject(Some(&header), VerificationError::SignatureMismatch));
        }

        global_metrics().record_verified();
        tracing::debug!(
            key_id = %header.key_id,
            timestamp_ms,
            age_ms,
            "Webhook signature verified"
        );

        Ok(VerifiedSignature {
            timestamp_ms,
            key_id: header.key_id,
            age_ms,
        })
    }

    /// Log and count a failure. Digests are never logged.
    fn reject(&self, header: Option<&SignatureHeader>, err: VerificationError) -> VerificationError {
        global_metrics().record_failure(err.kind());
        match header {
            Some(h) => tracing::warn!(
                kind = %err.kind(),
                key_id = %h.key_id,
                kid_explicit = h.key_id_explicit,
                timestamp = %h.timestamp,
                error = %err,
                "Webhook signature rejected"
            ),
            None => tracing::warn!(
                kind = %err.kind(),
                error = %err,
                "Webhook signature rejected"
            ),
        }
        err
    }
}

/// One-shot verification with default settings and the given window
pub fn verify_signature(
    header: &str,
    raw_body: &[u8],
    resolver: &dyn SecretResolver,
    tolerance_ms: u64,
) -> VerificationResult<VerifiedSignature> {
    SignatureVerifier::with_tolerance_ms(tolerance_ms).verify(header, raw_body, resolver)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::error::{FailureKind, ResolverError};
    use crate::webhook::secret::{resolver_fn, KeyRing};
    use crate::webhook::signer::generate_signature;

    const NOW: i64 = 1_705_420_800_000;
    const BODY: &[u8] = br#"{"id":"evt_123","type":"payment.succeeded","data":{"amount":100}}"#;

    fn ring() -> KeyRing {
        KeyRing::new().with_secret("v1", "whsec_test_secret_123")
    }

    fn sign(ts: i64, body: &[u8]) -> String {
        generate_signature(&"whsec_test_secret_123".into(), ts, body, "v1").unwrap()
    }

    struct FailingResolver;

    impl SecretResolver for FailingResolver {
        fn resolve(&self, _key_id: &str) -> std::result::Result<Option<WebhookSecret>, ResolverError> {
            Err(ResolverError::new("secret store unreachable"))
        }
    }

    #[test]
    fn test_verify_valid_signature() {
        let verifier = SignatureVerifier::default();
        let header = sign(NOW, BODY);

        let verified = verifier.verify_at(NOW, &header, BODY, &ring()).unwrap();
        assert_eq!(verified.key_id, "v1");
        assert_eq!(verified.timestamp_ms, NOW);
        assert_eq!(verified.age_ms, 0);
    }

    #[test]
    fn test_known_vector() {
        let header = format!(
            "t={NOW},v1=d681965525898913e20933d3e81061207dfc6430e2e8aa3f6772ac88850a302e,kid=v1"
        );
        assert_eq!(sign(NOW, BODY), header);
        assert!(SignatureVerifier::default()
            .verify_at(NOW, &header, BODY, &ring())
            .is_ok());
    }

    #[test]
    fn test_wrong_secret_is_mismatch() {
        let header = sign(NOW, BODY);
        let wrong = KeyRing::new().with_secret("v1", "wrong_secret");

        let err = SignatureVerifier::default()
            .verify_at(NOW, &header, BODY, &wrong)
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::SignatureMismatch);
    }

    #[test]
    fn test_invalid_format_is_malformed() {
        let err = SignatureVerifier::default()
            .verify_at(NOW, "invalid_format", BODY, &ring())
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::MalformedHeader);
    }

    #[test]
    fn test_non_numeric_timestamp() {
        let header = sign(NOW, BODY).replacen(&NOW.to_string(), "17054x0800000", 1);
        let err = SignatureVerifier::default()
            .verify_at(NOW, &header, BODY, &ring())
            .unwrap_err();
        assert!(matches!(err, VerificationError::InvalidTimestamp));
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let verifier = SignatureVerifier::default();
        let past = NOW - DEFAULT_TOLERANCE_MS as i64;
        let future = NOW + DEFAULT_TOLERANCE_MS as i64;

        assert!(verifier.verify_at(NOW, &sign(past, BODY), BODY, &ring()).is_ok());
        assert!(verifier.verify_at(NOW, &sign(future, BODY), BODY, &ring()).is_ok());

        let err = verifier
            .verify_at(NOW, &sign(past - 1, BODY), BODY, &ring())
            .unwrap_err();
        assert!(matches!(
            err,
            VerificationError::TimestampOutOfTolerance {
                age_ms: 300_001,
                tolerance_ms: 300_000
            }
        ));

        let err = verifier
            .verify_at(NOW, &sign(future + 1, BODY), BODY, &ring())
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::TimestampOutOfTolerance);
    }

    #[test]
    fn test_freshness_checked_before_resolver() {
        // A stale header must not trigger a secret lookup
        let resolver = resolver_fn(|_| panic!("resolver must not be called"));
        let header = sign(NOW - 600_000, BODY);

        let err = SignatureVerifier::default()
            .verify_at(NOW, &header, BODY, &resolver)
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::TimestampOutOfTolerance);
    }

    #[test]
    fn test_unknown_kid() {
        let header = generate_signature(&"whsec_x".into(), NOW, BODY, "v9").unwrap();
        let err = SignatureVerifier::default()
            .verify_at(NOW, &header, BODY, &ring())
            .unwrap_err();
        assert!(matches!(err, VerificationError::UnknownKeyId(ref kid) if kid == "v9"));
    }

    #[test]
    fn test_resolver_failure_is_distinct() {
        let err = SignatureVerifier::default()
            .verify_at(NOW, &sign(NOW, BODY), BODY, &FailingResolver)
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::ResolverError);
    }

    #[test]
    fn test_require_kid() {
        let verifier = SignatureVerifier::new(VerifierConfig {
            require_kid: true,
            ..VerifierConfig::default()
        });
        let header = sign(NOW, BODY).replace(",kid=v1", "");

        let err = verifier.verify_at(NOW, &header, BODY, &ring()).unwrap_err();
        assert_eq!(err.kind(), FailureKind::MalformedHeader);

        // Lenient default still accepts it against the v1 secret
        assert!(SignatureVerifier::default()
            .verify_at(NOW, &header, BODY, &ring())
            .is_ok());
    }

    #[test]
    fn test_uppercase_digest_rejected() {
        let header = sign(NOW, BODY);
        let (prefix, rest) = header.split_once("v1=").unwrap();
        let (digest, suffix) = rest.split_once(',').unwrap();
        let upper = format!("{prefix}v1={},{suffix}", digest.to_ascii_uppercase());

        let err = SignatureVerifier::default()
            .verify_at(NOW, &upper, BODY, &ring())
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::SignatureMismatch);
    }

    #[test]
    fn test_construct_event() {
        let header = sign(now_ms(), BODY);
        let event = SignatureVerifier::default()
            .construct_event(&header, BODY, &ring())
            .unwrap();
        assert_eq!(event.id, "evt_123");
        assert_eq!(event.event_type, "payment.succeeded");
    }

    #[test]
    fn test_construct_event_rejects_non_json() {
        let body = b"not json";
        let header = sign(now_ms(), body);
        let err = SignatureVerifier::default()
            .construct_event(&header, body, &ring())
            .unwrap_err();
        assert!(matches!(err, crate::Error::Dispatch(_)));
    }

    #[tokio::test]
    async fn test_verify_async() {
        let header = sign(NOW, BODY);
        let verified = SignatureVerifier::default()
            .verify_async_at(NOW, &header, BODY, &ring())
            .await
            .unwrap();
        assert_eq!(verified.key_id, "v1");
    }
}
