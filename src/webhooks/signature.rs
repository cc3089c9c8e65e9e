//! Webhook signature verification.
//!
//! GitHub signs each delivery with HMAC-SHA256 over the raw body, keyed by the
//! webhook secret, and sends it in `X-Hub-Signature-256` as `sha256=<hex>`.
//! Verification happens before the body is parsed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header prefix naming the digest algorithm.
const SHA256_PREFIX: &str = "sha256=";

/// Why a delivery's signature was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing X-Hub-Signature-256 header")]
    Missing,

    /// Not `sha256=` followed by an even number of hex digits.
    #[error("malformed signature header")]
    Malformed,

    #[error("signature does not match payload")]
    Mismatch,
}

/// Decodes a `sha256=<hex>` header into the raw digest.
///
/// # Examples
///
/// ```
/// use kubeapply::webhooks::parse_signature_header;
///
/// assert_eq!(parse_signature_header("sha256=abcd"), Some(vec![0xab, 0xcd]));
/// assert!(parse_signature_header("sha1=abcd").is_none());
/// assert!(parse_signature_header("sha256=xyz").is_none());
/// ```
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    hex::decode(header.strip_prefix(SHA256_PREFIX)?).ok()
}

/// Computes the header value GitHub would send for `payload`.
pub fn sign_payload(payload: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    format!("{}{}", SHA256_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

/// Checks the signature header of a delivery against its body.
///
/// The digest comparison is constant-time.
///
/// # Examples
///
/// ```
/// use kubeapply::webhooks::{sign_payload, verify_signature, SignatureError};
///
/// let header = sign_payload(b"{}", b"secret");
/// assert_eq!(verify_signature(Some(&header), b"{}", b"secret"), Ok(()));
/// assert_eq!(
///     verify_signature(Some(&header), b"{}", b"other"),
///     Err(SignatureError::Mismatch)
/// );
/// assert_eq!(verify_signature(None, b"{}", b"secret"), Err(SignatureError::Missing));
/// ```
pub fn verify_signature(
    header: Option<&str>,
    payload: &[u8],
    secret: &[u8],
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    let expected = parse_signature_header(header).ok_or(SignatureError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::Mismatch)?;
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}
