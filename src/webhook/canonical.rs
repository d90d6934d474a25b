//! Signed payload construction
//!
//! Format: `{timestamp}.{raw_body}`, built on bytes. The body is never
//! decoded or re-serialized, so signer and verifier agree byte-for-byte
//! regardless of JSON whitespace, key order or non-UTF-8 content.

/// Build the byte string that is HMACed.
///
/// `timestamp` must be the `t` value exactly as it appeared in the header.
pub fn canonicalize(timestamp: &str, raw_body: &[u8]) -> Vec<u8> {
    let mut signed = Vec::with_capacity(timestamp.len() + 1 + raw_body.len());
    signed.extend_from_slice(timestamp.as_bytes());
    signed.push(b'.');
    signed.extend_from_slice(raw_body);
    signed
}
