//! Property-based testing for webhook signatures.
//!
//! Uses proptest to generate arbitrary secrets, timestamps, bodies and
//! header strings and checks the protocol invariants: signed payloads
//! verify, any single-byte tamper is caught, and the parser never panics.

use molam_webhooks::idempotency::{make_key, IdempotencyKeyError, MAX_KEY_LENGTH};
use molam_webhooks::webhook::{
    generate_signature, FailureKind, KeyRing, SignatureHeader, SignatureVerifier,
    VerificationError,
};
use proptest::prelude::*;

// ============================================================================
// STRATEGIES
// ============================================================================

/// Strategy for webhook secrets
pub fn arb_secret() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("whsec_test_secret_123".to_string()),
        "whsec_[a-zA-Z0-9]{8,48}",
        "[ -~]{1,64}",
    ]
}

/// Strategy for key ids
pub fn arb_key_id() -> impl Strategy<Value = String> {
    prop_oneof![Just("v1".to_string()), "v[0-9]{1,3}", "[a-z0-9-]{1,16}"]
}

/// Strategy for raw bodies, JSON or not
pub fn arb_body() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..2048),
        "[a-z0-9_]{1,16}".prop_map(|id| {
            format!(r#"{{"id":"evt_{id}","type":"payment.succeeded","data":{{"amount":100}}}}"#)
                .into_bytes()
        }),
    ]
}

/// Strategy for timestamps around 2024-2030
pub fn arb_timestamp() -> impl Strategy<Value = i64> {
    1_700_000_000_000i64..1_900_000_000_000i64
}

// ============================================================================
// SIGNATURE PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn signed_payload_always_verifies(
        secret in arb_secret(),
        kid in arb_key_id(),
        ts in arb_timestamp(),
        body in arb_body(),
    ) {
        let header = generate_signature(&secret.as_str().into(), ts, &body, &kid).unwrap();
        let secrets = KeyRing::new().with_secret(kid.clone(), secret.as_str());

        let verified = SignatureVerifier::default()
            .verify_at(ts, &header, &body, &secrets)
            .unwrap();
        prop_assert_eq!(verified.key_id, kid);
        prop_assert_eq!(verified.timestamp_ms, ts);
        prop_assert_eq!(verified.age_ms, 0);
    }

    #[test]
    fn single_byte_tamper_is_mismatch(
        secret in arb_secret(),
        ts in arb_timestamp(),
        body in prop::collection::vec(any::<u8>(), 1..1024),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let header = generate_signature(&secret.as_str().into(), ts, &body, "v1").unwrap();
        let secrets = KeyRing::new().with_secret("v1", secret.as_str());

        let mut tampered = body.clone();
        let i = index.index(tampered.len());
        tampered[i] ^= flip;

        let err = SignatureVerifier::default()
            .verify_at(ts, &header, &tampered, &secrets)
            .unwrap_err();
        prop_assert!(matches!(err, VerificationError::SignatureMismatch));
    }

    #[test]
    fn outside_window_always_rejected(
        ts in arb_timestamp(),
        skew in 300_001i64..86_400_000,
        future in any::<bool>(),
    ) {
        let body = b"{}";
        let header = generate_signature(&"whsec".into(), ts, body, "v1").unwrap();
        let secrets = KeyRing::new().with_secret("v1", "whsec");
        let now = if future { ts - skew } else { ts + skew };

        let err = SignatureVerifier::default()
            .verify_at(now, &header, body, &secrets)
            .unwrap_err();
        prop_assert_eq!(err.kind(), FailureKind::TimestampOutOfTolerance);
    }

    #[test]
    fn parser_never_panics(header in "\\PC{0,256}") {
        let _ = SignatureHeader::parse(&header);
    }

    #[test]
    fn verifier_never_panics_on_garbage(header in "[tvkid0-9a-f=,. ]{0,128}") {
        let secrets = KeyRing::new().with_secret("v1", "whsec");
        let result = SignatureVerifier::default().verify(&header, b"{}", &secrets);
        if let Err(e) = result {
            prop_assert_eq!(e.status_code(), 401);
        }
    }
}

// ============================================================================
// IDEMPOTENCY KEY PROPERTIES
// ============================================================================

proptest! {
    #[test]
    fn provided_key_passes_through(key in "[!-~]{1,128}") {
        let made = make_key(Some(&key)).unwrap();
        prop_assert_eq!(made.as_str(), key.as_str());
    }

    #[test]
    fn overlong_key_rejected(len in (MAX_KEY_LENGTH + 1)..512usize) {
        let key = "k".repeat(len);
        prop_assert_eq!(
            make_key(Some(&key)),
            Err(IdempotencyKeyError::KeyTooLong { len, max: MAX_KEY_LENGTH })
        );
    }
}
