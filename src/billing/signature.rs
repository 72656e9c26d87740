use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("endpoint secret is not configured")]
    MissingSecret,
    #[error("missing signature header")]
    MissingHeader,
    #[error("signature header has no timestamp")]
    MissingTimestamp,
    #[error("signature header has no v1 signature")]
    MissingSignature,
    #[error("timestamp {timestamp} is outside the {tolerance}s tolerance")]
    StaleTimestamp { timestamp: i64, tolerance: i64 },
    #[error("no signature matches the payload")]
    Mismatch,
}

/// key: billing-signature -> `t=<unix>,v1=<hex>` header verification
///
/// Every `v1` entry is tried so secrets can be rolled without dropping deliveries.
/// Only timestamps older than `now - tolerance_secs` are stale; future ones still have to
/// carry a matching signature.
pub fn verify_signature(
    payload: &[u8],
    header: Option<&str>,
    secret: Option<&str>,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let secret = secret.ok_or(SignatureError::MissingSecret)?;
    let header = header
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(SignatureError::MissingHeader)?;

    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            match key {
                "t" => timestamp = value.parse::<i64>().ok(),
                "v1" => candidates.push(value),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if candidates.is_empty() {
        return Err(SignatureError::MissingSignature);
    }
    if tolerance_secs > 0 && timestamp < now.saturating_sub(tolerance_secs) {
        return Err(SignatureError::StaleTimestamp {
            timestamp,
            tolerance: tolerance_secs,
        });
    }

    let matched = candidates.into_iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    });

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Builds a header the way the provider does. Used by local tooling and tests.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can use any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}
