//! Request signatures.
//!
//! A signed request carries `X-Gastown-Timestamp` (unix seconds) and
//! `X-Gastown-Signature`, the hex HMAC-SHA256 of `"<timestamp>.<body>"` keyed
//! with the instance token.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

pub const SIGNATURE_HEADER: &str = "x-gastown-signature";
pub const TIMESTAMP_HEADER: &str = "x-gastown-timestamp";

type HmacSha256 = Hmac<Sha256>;

fn keyed(token: &str, timestamp: &str, body: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(token.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    Some(mac)
}

/// Hex signature for `body` sent at `timestamp`.
pub fn sign(token: &str, timestamp: &str, body: &str) -> String {
    keyed(token, timestamp, body)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

/// Check freshness against `now` (unix seconds) and the signature in
/// constant time.
pub fn verify(
    token: &str,
    body: &str,
    signature: &str,
    timestamp: &str,
    now: i64,
    freshness_secs: u64,
) -> bool {
    let Ok(ts) = timestamp.trim().parse::<i64>() else {
        warn!(timestamp = %timestamp, "Invalid signature timestamp");
        return false;
    };
    if now.abs_diff(ts) > freshness_secs {
        warn!(timestamp = ts, now, "Signature timestamp outside freshness window");
        return false;
    }

    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    keyed(token, timestamp, body).is_some_and(|mac| mac.verify_slice(&expected).is_ok())
}
