//! HMAC-SHA256 delivery signatures (`X-Hub-Signature-256`)

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::ConsoleError;

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

/// Signature header value for `body`, e.g. `sha256=3f1a...`
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, ConsoleError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| ConsoleError::Internal(format!("invalid webhook key: {}", e)))?;
    mac.update(body);
    Ok(format!("{}{}", PREFIX, hex::encode(mac.finalize().into_bytes())))
}

/// Check a delivery signature against the exact raw body
pub fn verify_signature(
    secret: &[u8],
    body: &[u8],
    header: Option<&str>,
) -> Result<(), ConsoleError> {
    let Some(header) = header else {
        return Err(ConsoleError::AuthError(
            "missing webhook signature".to_string(),
        ));
    };
    if !header.starts_with(PREFIX) {
        return Err(ConsoleError::AuthError(
            "unsupported webhook signature format".to_string(),
        ));
    }

    if sign(secret, body)? != header {
        return Err(ConsoleError::AuthError(
            "webhook signature mismatch".to_string(),
        ));
    }
    Ok(())
}
