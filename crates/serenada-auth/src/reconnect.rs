//! Reconnect tokens
//!
//! A reconnect token proves the holder owned a CID in a room earlier:
//! `hex(HMAC-SHA256(secret, cid ∥ "|" ∥ rid))`. It is bound to the
//! (cid, rid) pair, never to the transport session, which is what lets a
//! client reclaim its CID across connection churn.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::ct::ct_eq;
use crate::{AuthError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Derive the reconnect token for a (cid, rid) pair.
///
/// An empty secret yields an empty token; the server then runs in the
/// legacy mode where reconnection is unauthenticated.
pub fn token(secret: &str, cid: &str, rid: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    // HMAC accepts any key length; an error here is unreachable.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(cid.as_bytes());
    mac.update(b"|");
    mac.update(rid.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a presented token against (cid, rid) in constant time.
///
/// With no secret configured, only an absent/empty token is accepted
/// (legacy clients predate the token exchange).
pub fn verify(secret: &str, cid: &str, rid: &str, presented: &str) -> Result<()> {
    if secret.is_empty() {
        return if presented.is_empty() {
            Ok(())
        } else {
            Err(AuthError::InvalidReconnectToken)
        };
    }

    let expected = token(secret, cid, rid);
    if ct_eq(presented.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(AuthError::InvalidReconnectToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "deadbeef";

    #[test]
    fn test_token_deterministic() {
        let a = token(SECRET, "C-0011223344556677", "room");
        let b = token(SECRET, "C-0011223344556677", "room");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64); // hex of 32 bytes
    }

    #[test]
    fn test_token_binds_cid_and_rid() {
        let t = token(SECRET, "C-aa", "r1");
        assert_ne!(t, token(SECRET, "C-ab", "r1"));
        assert_ne!(t, token(SECRET, "C-aa", "r2"));
    }

    #[test]
    fn test_verify_roundtrip() {
        let t = token(SECRET, "C-aa", "r1");
        assert_eq!(verify(SECRET, "C-aa", "r1", &t), Ok(()));
    }

    #[test]
    fn test_verify_rejects_tampered() {
        let t = token(SECRET, "C-aa", "r1");
        let mut tampered = t.into_bytes();
        tampered[0] ^= 0x01;
        let tampered = String::from_utf8(tampered).unwrap();
        assert_eq!(
            verify(SECRET, "C-aa", "r1", &tampered),
            Err(AuthError::InvalidReconnectToken)
        );
    }

    #[test]
    fn test_legacy_no_secret() {
        assert_eq!(token("", "C-aa", "r1"), "");
        assert_eq!(verify("", "C-aa", "r1", ""), Ok(()));
        assert_eq!(
            verify("", "C-aa", "r1", "anything"),
            Err(AuthError::InvalidReconnectToken)
        );
    }
}
