//! HMAC-SHA256 payload signatures
//!
//! Header format: `X-Webhook-Signature: sha256=<lowercase hex>`

use ring::hmac;

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Lowercase hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    hex::encode(hmac::sign(&key, body).as_ref())
}

/// Check a `sha256=<hex>` header value. Comparison is constant-time.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(digest) = header.trim().strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(digest) else {
        return false;
    };
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    hmac::verify(&key, body, &expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        assert_eq!(
            sign("Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify() {
        let sig = format!("sha256={}", sign("s3cret", b"{}"));
        assert!(verify_signature("s3cret", b"{}", &sig));
        assert!(!verify_signature("other", b"{}", &sig));
        assert!(!verify_signature("s3cret", b"{ }", &sig));
        assert!(!verify_signature("s3cret", b"{}", "md5=abc"));
        assert!(!verify_signature("s3cret", b"{}", "sha256=zz"));
        assert!(!verify_signature("s3cret", b"{}", "sha256=abc"));
        assert!(verify_signature("s3cret", b"{}", &sig.to_uppercase().replace("SHA256=", "sha256=")));
    }
}
