// WhatsApp Cloud API — Webhook signature
// Meta signs every delivery with HMAC-SHA256 over the raw body, keyed by the
// app secret, and sends it as `X-Hub-Signature-256: sha256=<hex>`.

use crate::atoms::error::{EngineError, EngineResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Lowercase hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(body: &[u8], secret: &str) -> EngineResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| EngineError::Auth(format!("invalid app secret: {}", e)))?;
    mac.update(body);
    Ok(mac
        .finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

/// Check the `X-Hub-Signature-256` header against the body.
pub fn verify_signature(body: &[u8], header: Option<&str>, secret: &str) -> EngineResult<()> {
    let header = header.ok_or_else(|| EngineError::Auth("missing X-Hub-Signature-256".into()))?;
    let provided = header
        .trim()
        .strip_prefix("sha256=")
        .ok_or_else(|| EngineError::Auth("signature is not sha256".into()))?;
    let expected = sign(body, secret)?;
    if bool::from(expected.as_bytes().ct_eq(provided.to_ascii_lowercase().as_bytes())) {
        Ok(())
    } else {
        Err(EngineError::Auth("signature mismatch".into()))
    }
}
