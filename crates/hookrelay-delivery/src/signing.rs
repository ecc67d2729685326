//! HMAC-SHA256 payload signing and verification.
//!
//! Every outbound request carries `X-Webhook-Signature: sha256=<hex>`
//! computed over the exact body bytes sent. Receivers recompute the HMAC
//! with their copy of the subscription secret; `verify_signature` is the
//! reference implementation of that check.

use hmac::{Hmac, Mac};
use rand::{distr::Alphanumeric, Rng};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Prefix of the signature header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Length of generated signing secrets.
pub const SECRET_LENGTH: usize = 40;

/// Signature generation and verification errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// Header value is not `sha256=<hex>`.
    #[error("invalid signature format: {0}")]
    InvalidFormat(String),
    /// Signature does not match the body.
    #[error("signature verification failed")]
    VerificationFailed,
    /// Secret cannot be used as an HMAC key.
    #[error("invalid secret key")]
    InvalidSecret,
}

/// Generates a random alphanumeric signing secret.
pub fn generate_secret() -> String {
    rand::rng().sample_iter(&Alphanumeric).take(SECRET_LENGTH).map(char::from).collect()
}

/// Computes the lowercase hex HMAC-SHA256 of `body` keyed by `secret`.
///
/// # Errors
///
/// Returns `SignatureError::InvalidSecret` if the HMAC cannot be keyed.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Builds the `X-Webhook-Signature` header value for `body`.
///
/// # Example
///
/// ```
/// use hookrelay_delivery::signing::{signature_header, verify_signature};
///
/// let body = br#"{"id":"1","event":"test"}"#;
/// let header = signature_header("secret", body).unwrap();
/// assert!(header.starts_with("sha256="));
/// assert!(verify_signature("secret", body, &header).is_ok());
/// ```
///
/// # Errors
///
/// Returns `SignatureError::InvalidSecret` if the HMAC cannot be keyed.
pub fn signature_header(secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    Ok(format!("{SIGNATURE_PREFIX}{}", sign_payload(secret, body)?))
}

/// Verifies a `sha256=<hex>` header against `body` in constant time.
///
/// # Errors
///
/// Returns `InvalidFormat` for a malformed header and
/// `VerificationFailed` when the HMAC does not match.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> Result<(), SignatureError> {
    let hex_signature = header
        .trim()
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or_else(|| SignatureError::InvalidFormat(format!("missing {SIGNATURE_PREFIX} prefix")))?;

    let expected = hex::decode(hex_signature)
        .map_err(|e| SignatureError::InvalidFormat(format!("signature is not hex: {e}")))?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| SignatureError::VerificationFailed)
}
