//! TURN REST credential derivation
//!
//! Follows the TURN REST API convention consumed by coturn and friends:
//! `username = "<unix-expiry>:<sanitized-ip>"` and
//! `password = base64(HMAC-SHA1(secret, username))`. The TURN relay
//! recomputes the password from the same shared secret, so nothing is
//! stored on either side.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use std::net::IpAddr;
use std::time::Duration;

type HmacSha1 = Hmac<Sha1>;

/// A derived TURN username/password pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestCredentials {
    /// `<unix-expiry>:<sanitized-ip>`
    pub username: String,
    /// `base64(HMAC-SHA1(secret, username))`
    pub password: String,
    /// Absolute expiry, unix seconds
    pub expires_at: u64,
}

/// Derive REST credentials for a client IP, valid for `ttl` from
/// `now_unix` (unix seconds).
pub fn rest_credentials(
    secret: &str,
    ip: IpAddr,
    ttl: Duration,
    now_unix: u64,
) -> Option<RestCredentials> {
    if secret.is_empty() {
        return None;
    }
    let expires_at = now_unix.saturating_add(ttl.as_secs());
    let username = format!("{}:{}", expires_at, sanitize_ip(ip));

    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(username.as_bytes());
    let password = STANDARD.encode(mac.finalize().into_bytes());

    Some(RestCredentials {
        username,
        password,
        expires_at,
    })
}

/// Mint an opaque TURN access token: `hex(16 random bytes)`.
pub fn new_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Replace `:` and `%` so IPv6 literals and scope IDs survive inside the
/// colon-delimited TURN username.
fn sanitize_ip(ip: IpAddr) -> String {
    ip.to_string().replace([':', '%'], "-")
}
