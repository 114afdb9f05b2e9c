//! Webhook payload signing and bearer-token verification
//!
//! Callback bodies are signed with HMAC-SHA256 using the per-job webhook
//! secret; the HTTP surface authenticates callers with a constant-time
//! comparison of the full `Authorization` header.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Sign `body` with HMAC-SHA256 under `secret`, returning lowercase hex.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("{:x}", mac.finalize().into_bytes())
}

/// Verify a bearer `Authorization` header against the expected token.
///
/// The full header string is compared in constant time against
/// `"Bearer " + expected_token`; a missing header or a mismatch both fail
/// with [`Error::Unauthorized`].
pub fn verify_bearer(header: Option<&str>, expected_token: &str) -> Result<()> {
    let header = header
        .ok_or_else(|| Error::Unauthorized("Missing authorization header".to_string()))?;

    let expected = format!("Bearer {expected_token}");
    if bool::from(header.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(Error::Unauthorized("Invalid bearer token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_body_matches_known_vector() {
        // RFC 4231-style check: HMAC-SHA256("key", "The quick brown fox...")
        let signature = sign_body("key", b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            signature,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn sign_body_is_lowercase_hex() {
        let signature = sign_body("0123456789abcdef", b"{}");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn verify_bearer_accepts_exact_token() {
        assert!(verify_bearer(Some("Bearer secret-token"), "secret-token").is_ok());
    }

    #[test]
    fn verify_bearer_rejects_suffix_mutation() {
        assert!(verify_bearer(Some("Bearer secret-tokenx"), "secret-token").is_err());
    }

    #[test]
    fn verify_bearer_rejects_missing_header() {
        assert!(verify_bearer(None, "secret-token").is_err());
    }

    #[test]
    fn verify_bearer_rejects_wrong_scheme() {
        assert!(verify_bearer(Some("Basic secret-token"), "secret-token").is_err());
    }
}
