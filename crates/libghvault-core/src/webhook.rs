//! Webhook signature verification
//!
//! GitHub signs webhook deliveries with HMAC-SHA256 over the raw body,
//! sent as `X-Hub-Signature-256: sha256=<hex>`. The wrapper hands us
//! body, signature and secret; we only verify. Malformed input is a
//! verification failure, never a panic.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify a `sha256=<hex>` webhook signature against the body and secret.
///
/// Comparison is constant-time via the MAC's own verifier.
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    if secret.is_empty() || signature.is_empty() {
        return false;
    }
    let hex_digest = match signature.strip_prefix("sha256=") {
        Some(h) => h,
        None => return false,
    };
    let expected = match hex::decode(hex_digest) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
