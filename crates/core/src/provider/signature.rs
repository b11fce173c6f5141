//! HMAC-SHA256 webhook signatures.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex signature (optionally prefixed with `sha256=`) in constant time.
///
/// Missing secret or missing signature is treated as unverifiable.
pub fn verify_signature(secret: Option<&str>, payload: &[u8], signature: Option<&str>) -> bool {
    let (Some(secret), Some(signature)) = (secret, signature) else {
        return false;
    };
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}
