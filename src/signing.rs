use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Algorithm tag carried in front of the hex digest in the signature header.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Default header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

fn keyed_mac(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length")
}

/// Compute the hex-encoded HMAC-SHA256 of `payload` keyed by `secret`.
pub fn sign(payload: &[u8], secret: &str) -> String {
    let mut mac = keyed_mac(secret);
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Value placed in the signature header for a given hex digest.
pub fn signature_header_value(signature_hex: &str) -> String {
    format!("{}{}", SIGNATURE_PREFIX, signature_hex)
}

/// Check a presented signature against the payload in constant time.
///
/// The presented value may carry the `sha256=` prefix or be the bare hex
/// digest. An empty secret or signature never verifies.
pub fn verify(payload: &[u8], secret: &str, presented: &str) -> bool {
    if secret.is_empty() || presented.is_empty() {
        return false;
    }

    let hex_part = presented.strip_prefix(SIGNATURE_PREFIX).unwrap_or(presented);
    let Ok(signature) = hex::decode(hex_part) else {
        return false;
    };

    let mut mac = keyed_mac(secret);
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

/// Find the signature header in a list of headers, ignoring name case.
pub fn signature_from_headers<'a, I>(headers: I, signature_header: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(signature_header))
        .map(|(_, value)| value)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    MissingSignature,
    InvalidSignature,
}

/// Verify an incoming webhook request in one call.
pub fn verify_webhook_request<'a, I>(
    headers: I,
    payload: &[u8],
    secret: &str,
    signature_header: &str,
) -> Result<(), VerificationError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let presented = signature_from_headers(headers, signature_header)
        .ok_or(VerificationError::MissingSignature)?;

    if verify(payload, secret, presented) {
        Ok(())
    } else {
        Err(VerificationError::InvalidSignature)
    }
}
