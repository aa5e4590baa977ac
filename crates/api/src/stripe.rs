//! Stripe webhook signatures.
//!
//! The `Stripe-Signature` header looks like `t=1700000000,v1=<hex>[,v1=...]`.
//! Each `v1` is an HMAC-SHA256 of `"{t}.{raw body}"` under the endpoint
//! secret; any one of them matching is enough.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Maximum clock distance between the signed timestamp and now.
pub const TOLERANCE_SECS: u64 = 300;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header has no timestamp")]
    MissingTimestamp,

    #[error("signature header has no v1 signature")]
    MissingSignature,

    #[error("signature timestamp outside the tolerance window")]
    Stale,

    #[error("no signature matches the payload")]
    Mismatch,

    #[error("webhook secret rejected by hmac")]
    InvalidSecret,
}

/// Checks `header` against `payload` at unix time `now`.
pub fn verify_signature(payload: &[u8], header: &str, secret: &str, now: i64) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }
    if now.abs_diff(timestamp) > TOLERANCE_SECS {
        return Err(SignatureError::Stale);
    }

    for candidate in signatures {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        // verify_slice compares in constant time
        if signed_mac(payload, secret, timestamp)?.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }
    Err(SignatureError::Mismatch)
}

/// Header value Stripe would send for `payload` at `timestamp`.
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, SignatureError> {
    let digest = signed_mac(payload, secret, timestamp)?.finalize().into_bytes();
    Ok(format!("t={timestamp},v1={}", hex::encode(digest)))
}

fn signed_mac(payload: &[u8], secret: &str, timestamp: i64) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"type":"customer.subscription.updated"}"#;

    #[test]
    fn accepts_a_fresh_valid_signature() {
        let header = signature_header(BODY, SECRET, 1_700_000_000).unwrap();
        assert_eq!(verify_signature(BODY, &header, SECRET, 1_700_000_100), Ok(()));
    }

    #[test]
    fn any_v1_may_match() {
        let valid = signature_header(BODY, SECRET, 1_700_000_000).unwrap();
        let v1 = valid.split_once("v1=").map(|(_, s)| s).unwrap();
        let header = format!("t=1700000000,v1=deadbeef,v1={v1}");
        assert_eq!(verify_signature(BODY, &header, SECRET, 1_700_000_000), Ok(()));
    }

    #[test]
    fn rejects_tampering_and_replays() {
        let header = signature_header(BODY, SECRET, 1_700_000_000).unwrap();
        assert_eq!(
            verify_signature(b"{}", &header, SECRET, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_signature(BODY, &header, "whsec_other", 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_signature(BODY, &header, SECRET, 1_700_000_301),
            Err(SignatureError::Stale)
        );
    }

    #[test]
    fn extreme_timestamps_are_stale() {
        for t in [i64::MIN, i64::MAX] {
            let header = format!("t={t},v1=00");
            assert_eq!(
                verify_signature(BODY, &header, SECRET, 1_700_000_000),
                Err(SignatureError::Stale)
            );
        }
    }

    #[test]
    fn rejects_malformed_headers() {
        assert_eq!(
            verify_signature(BODY, "v1=abc", SECRET, 0),
            Err(SignatureError::MissingTimestamp)
        );
        assert_eq!(
            verify_signature(BODY, "t=0", SECRET, 0),
            Err(SignatureError::MissingSignature)
        );
    }
}
