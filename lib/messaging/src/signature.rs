//! Webhook signatures: `X-Hub-Signature: sha256=<hex HMAC-SHA256 of body>`.

use crate::error::SignatureError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

const PREFIX: &str = "sha256=";

fn mac(secret: &[u8], body: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(body);
    Ok(mac)
}

/// Computes the header value for `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, SignatureError> {
    let digest = mac(secret, body)?.finalize().into_bytes();
    Ok(format!("{PREFIX}{}", hex::encode(digest)))
}

/// Checks `header` against the raw request body in constant time.
pub fn verify_signature(
    secret: &[u8],
    body: &[u8],
    header: Option<&str>,
) -> Result<(), SignatureError> {
    let header = header.map(str::trim).filter(|h| !h.is_empty());
    let header = header.ok_or(SignatureError::Missing)?;

    let (algorithm, encoded) = header.split_at_checked(PREFIX.len()).ok_or(SignatureError::BadFormat)?;
    if !algorithm.eq_ignore_ascii_case(PREFIX) {
        return Err(SignatureError::BadFormat);
    }
    let expected = hex::decode(encoded).map_err(|_| SignatureError::BadFormat)?;

    mac(secret, body)?
        .verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"webhook-secret";
    const BODY: &[u8] = br#"{"results":[]}"#;

    #[test]
    fn signed_body_verifies() {
        let header = sign(SECRET, BODY).expect("sign");
        assert!(header.starts_with("sha256="));
        assert_eq!(verify_signature(SECRET, BODY, Some(&header)), Ok(()));
    }

    #[test]
    fn uppercase_hex_is_accepted() {
        let header = sign(SECRET, BODY).expect("sign");
        let upper = format!("sha256={}", header["sha256=".len()..].to_uppercase());
        assert_eq!(verify_signature(SECRET, BODY, Some(&upper)), Ok(()));
    }

    #[test]
    fn missing_header_is_rejected() {
        assert_eq!(
            verify_signature(SECRET, BODY, None),
            Err(SignatureError::Missing)
        );
        assert_eq!(
            verify_signature(SECRET, BODY, Some("  ")),
            Err(SignatureError::Missing)
        );
    }

    #[test]
    fn tampered_body_is_rejected() {
        let header = sign(SECRET, BODY).expect("sign");
        assert_eq!(
            verify_signature(SECRET, br#"{"results":[{}]}"#, Some(&header)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let header = sign(b"other", BODY).expect("sign");
        assert_eq!(
            verify_signature(SECRET, BODY, Some(&header)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn malformed_headers_are_rejected() {
        for header in ["md5=abcd", "sha256=not-hex", "sha256", "deadbeef"] {
            assert_eq!(
                verify_signature(SECRET, BODY, Some(header)),
                Err(SignatureError::BadFormat),
                "{header}"
            );
        }
    }
}
