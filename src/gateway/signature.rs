//! Verification of the `Stripe-Signature` header:
//! `t=<unix seconds>,v1=<hex hmac-sha256 of "{t}.{body}">`, possibly with
//! several `v1` entries during secret rotation.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is malformed")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("no signature matched")]
    Mismatch,
    #[error("webhook secret is not configured")]
    NoSecret,
}

struct ParsedHeader<'a> {
    timestamp: i64,
    raw_timestamp: &'a str,
    signatures: Vec<&'a str>,
}

fn parse_header(header: &str) -> Result<ParsedHeader<'_>, SignatureError> {
    let mut raw_timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => raw_timestamp = Some(value),
            Some(("v1", value)) if !value.is_empty() => signatures.push(value),
            _ => {}
        }
    }

    let raw_timestamp = raw_timestamp.ok_or(SignatureError::Malformed)?;
    let timestamp = raw_timestamp
        .parse::<i64>()
        .map_err(|_| SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }

    Ok(ParsedHeader {
        timestamp,
        raw_timestamp,
        signatures,
    })
}

fn mac_for(secret: &str, timestamp: &str, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::NoSecret)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Checks `header` against `payload` at time `now` (unix seconds).
pub fn verify_at(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::NoSecret);
    }

    let parsed = parse_header(header)?;
    if now.abs_diff(parsed.timestamp) > tolerance_secs {
        return Err(SignatureError::Expired);
    }

    for candidate in parsed.signatures {
        let Ok(bytes) = hex::decode(candidate) else {
            continue;
        };
        // verify_slice compares in constant time
        if mac_for(secret, parsed.raw_timestamp, payload)?
            .verify_slice(&bytes)
            .is_ok()
        {
            return Ok(());
        }
    }

    Err(SignatureError::Mismatch)
}

pub fn verify(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: u64,
) -> Result<(), SignatureError> {
    verify_at(
        payload,
        header,
        secret,
        tolerance_secs,
        chrono::Utc::now().timestamp(),
    )
}

/// Builds a header value the way the gateway does. Used by tests and local tooling.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, SignatureError> {
    let raw = timestamp.to_string();
    let digest = mac_for(secret, &raw, payload)?.finalize().into_bytes();
    Ok(format!("t={},v1={}", raw, hex::encode(digest)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    const SECRET: &str = "whsec_test_secret";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;
    const NOW: i64 = 1_700_000_000;

    #[test]
    fn accepts_own_signature() {
        let header = sign(BODY, SECRET, NOW).unwrap();
        assert_eq!(verify_at(BODY, &header, SECRET, 300, NOW + 10), Ok(()));
    }

    #[test]
    fn accepts_when_any_v1_matches() {
        let good = sign(BODY, SECRET, NOW).unwrap();
        let v1 = good.split_once("v1=").unwrap().1;
        let header = format!("t={},v1={},v1={}", NOW, "00".repeat(32), v1);
        assert_eq!(verify_at(BODY, &header, SECRET, 300, NOW), Ok(()));
    }

    #[rstest]
    #[case::no_timestamp("v1=abcd", SignatureError::Malformed)]
    #[case::no_signature("t=1700000000", SignatureError::Malformed)]
    #[case::bad_timestamp("t=soon,v1=abcd", SignatureError::Malformed)]
    #[case::not_hex("t=1700000000,v1=zzzz", SignatureError::Mismatch)]
    #[case::wrong_digest("t=1700000000,v1=deadbeef", SignatureError::Mismatch)]
    #[case::stale("t=1699990000,v1=deadbeef", SignatureError::Expired)]
    #[case::min_timestamp("t=-9223372036854775808,v1=aa", SignatureError::Expired)]
    #[case::max_timestamp("t=9223372036854775807,v1=aa", SignatureError::Expired)]
    fn rejects_bad_headers(#[case] header: &str, #[case] expected: SignatureError) {
        assert_eq!(verify_at(BODY, header, SECRET, 300, NOW), Err(expected));
    }

    #[test]
    fn rejects_tampered_body() {
        let header = sign(BODY, SECRET, NOW).unwrap();
        let tampered = br#"{"id":"evt_1","type":"checkout.session.expired"}"#;
        assert_eq!(
            verify_at(tampered, &header, SECRET, 300, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_without_secret() {
        let header = sign(BODY, SECRET, NOW).unwrap();
        assert_eq!(
            verify_at(BODY, &header, "", 300, NOW),
            Err(SignatureError::NoSecret)
        );
    }

    proptest! {
        #[test]
        fn other_secrets_never_verify(other in "[a-z0-9]{8,32}") {
            prop_assume!(other != SECRET);
            let header = sign(BODY, &other, NOW).unwrap();
            prop_assert_eq!(
                verify_at(BODY, &header, SECRET, 300, NOW),
                Err(SignatureError::Mismatch)
            );
        }
    }
}
