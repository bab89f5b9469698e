//! Callback signatures.
//!
//! Every remote callback carries three headers:
//!
//! | Header              | Value                                              |
//! |---------------------|----------------------------------------------------|
//! | `x-joust-agent-id`  | id of the agent being called                       |
//! | `x-joust-timestamp` | milliseconds since the Unix epoch                  |
//! | `x-joust-signature` | `sha256=` + hex HMAC-SHA256(secret, "<ts>.<body>") |
//!
//! Agents verify by recomputing the HMAC over the raw body they received.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::CallbackError;

type HmacSha256 = Hmac<Sha256>;

pub const AGENT_ID_HEADER: &str = "x-joust-agent-id";
pub const TIMESTAMP_HEADER: &str = "x-joust-timestamp";
pub const SIGNATURE_HEADER: &str = "x-joust-signature";

const SIGNATURE_PREFIX: &str = "sha256=";

fn mac(secret: &str, timestamp_ms: i64, body: &str) -> Result<HmacSha256, CallbackError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CallbackError::Signing(e.to_string()))?;
    mac.update(timestamp_ms.to_string().as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    Ok(mac)
}

/// Signature header value for a body sent at `timestamp_ms`.
pub fn sign(secret: &str, timestamp_ms: i64, body: &str) -> Result<String, CallbackError> {
    let digest = mac(secret, timestamp_ms, body)?.finalize().into_bytes();
    Ok(format!("{}{}", SIGNATURE_PREFIX, hex::encode(digest)))
}

/// Constant-time check of a received signature header.
pub fn verify(secret: &str, timestamp_ms: i64, body: &str, signature: &str) -> bool {
    let Some(hex_digest) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    match mac(secret, timestamp_ms, body) {
        Ok(mac) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}
