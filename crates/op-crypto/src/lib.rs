//! HMAC-SHA256 signing and constant-time verification for signed channel
//! payloads. This is the trust primitive every channel adapter and the
//! guardian share — see `op-payload` for the message shape it signs.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Sign `message` with `secret`, returning a lowercase hex digest.
///
/// Panics only if `secret` cannot be used as an HMAC key, which never
/// happens for `Hmac<Sha256>` (it accepts any key length).
pub fn sign(secret: &str, message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify that `provided` (a lowercase hex digest) matches the HMAC of
/// `message` under `secret`.
///
/// Never short-circuits on content: the comparison runs in constant time
/// once both sides are decoded to equal-length byte buffers. An empty
/// `secret` always fails without touching HMAC state, since an
/// unconfigured channel must never validate.
pub fn verify(secret: &str, message: &[u8], provided: &str) -> bool {
    if secret.is_empty() || provided.is_empty() {
        return false;
    }

    let computed = sign(secret, message);

    // Decode both sides to bytes first so the comparison itself never
    // depends on the hex alphabet; differing lengths fail before any
    // byte comparison runs (length is not secret-derived, only an
    // encoding property of the caller's input).
    let computed_bytes = match hex::decode(&computed) {
        Ok(b) => b,
        Err(_) => return false,
    };
    let provided_bytes = match hex::decode(provided) {
        Ok(b) => b,
        Err(_) => return false,
    };

    if computed_bytes.len() != provided_bytes.len() {
        return false;
    }

    computed_bytes.ct_eq(&provided_bytes).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_deterministic_lowercase_hex() {
        let sig = sign("secret", b"message");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn verify_round_trip() {
        let sig = sign("secret", b"hello world");
        assert!(verify("secret", b"hello world", &sig));
    }

    #[test]
    fn verify_rejects_flipped_message_bit() {
        let sig = sign("secret", b"hello world");
        assert!(!verify("secret", b"hello worle", &sig));
    }

    #[test]
    fn verify_rejects_flipped_signature_bit() {
        let mut sig = sign("secret", b"hello world");
        // Flip the last hex nibble.
        let last = sig.pop().unwrap();
        let flipped = if last == '0' { '1' } else { '0' };
        sig.push(flipped);
        assert!(!verify("secret", b"hello world", &sig));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let sig = sign("secret-a", b"hello world");
        assert!(!verify("secret-b", b"hello world", &sig));
    }

    #[test]
    fn verify_rejects_different_length_signature() {
        let sig = sign("secret", b"hello world");
        assert!(!verify("secret", b"hello world", &sig[..10]));
    }

    #[test]
    fn verify_rejects_empty_secret() {
        let sig = sign("x", b"hello world");
        assert!(!verify("", b"hello world", &sig));
    }

    #[test]
    fn verify_rejects_empty_signature() {
        assert!(!verify("secret", b"hello world", ""));
    }

    #[test]
    fn verify_rejects_non_hex_signature() {
        assert!(!verify("secret", b"hello world", "not-hex-at-all!!"));
    }
}
