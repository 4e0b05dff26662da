//! HMAC-SHA256 payload signing.
//!
//! The signature covers the exact bytes sent as the request body. Receivers
//! recompute it over the raw body with their copy of the secret and compare
//! in constant time, which is what [`verify`] does.

use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use sha2::Sha256;

use crate::error::{CourierError, CourierResult, ErrorCode};
use crate::types::Endpoint;

type HmacSha256 = Hmac<Sha256>;

/// Default header carrying the hex signature.
pub const SIGNATURE_HEADER: &str = "X-Courier-Signature";
/// Header carrying the event type.
pub const EVENT_HEADER: &str = "X-Courier-Event";
/// Header carrying the delivery job id.
pub const DELIVERY_HEADER: &str = "X-Courier-Delivery";

/// Compute the hex-encoded HMAC-SHA256 of `payload` keyed by `secret`.
///
/// An empty secret is a configuration error: an unsigned delivery would be
/// rejected by every receiver, so there is nothing to retry.
pub fn sign(secret: &str, payload: &[u8]) -> CourierResult<String> {
    if secret.trim().is_empty() {
        return Err(CourierError::configuration(
            ErrorCode::CfgMissingSecret,
            "signing secret is empty",
        ));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CourierError::internal(format!("HMAC key rejected: {}", e)))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Sign `payload` with an endpoint's secret.
pub fn sign_for(endpoint: &Endpoint, payload: &[u8]) -> CourierResult<String> {
    if !endpoint.has_secret() {
        return Err(CourierError::missing_secret(endpoint.id));
    }
    sign(endpoint.secret.expose_secret(), payload)
}

/// Verify a hex signature against `payload` in constant time.
///
/// Malformed hex, an empty secret or a mismatch all return `false`.
pub fn verify(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    if secret.trim().is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}
