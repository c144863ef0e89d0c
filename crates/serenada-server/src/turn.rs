//! In-memory TURN access-token stores
//!
//! Two stores share one implementation: the call store (tokens issued in
//! `joined` replies and on `turn-refresh`, 30-minute TTL, reusable) and
//! the diagnostic store (one-shot tokens bound to the issuing IP, used
//! by connectivity checks). Expired entries are swept opportunistically
//! on every issue and validate; there is no background task.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use crate::clock::unix_secs;
use crate::config::{TURN_CALL_TTL, TURN_DIAGNOSTIC_TTL};

/// A token handed to a client, with its absolute expiry.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    /// Unix seconds
    pub expires_at: u64,
    pub ttl_ms: u64,
}

#[derive(Debug)]
struct TokenEntry {
    ip: IpAddr,
    expires_at: u64,
}

/// One token store; see module docs for the two configurations.
pub struct TurnTokenStore {
    ttl: Duration,
    bind_ip: bool,
    one_shot: bool,
    tokens: Mutex<HashMap<String, TokenEntry>>,
}

impl TurnTokenStore {
    /// Store for in-call tokens: long TTL, validate does not consume.
    pub fn call_store() -> Self {
        Self::new(TURN_CALL_TTL, false, false)
    }

    /// Store for diagnostic tokens: short TTL, IP-bound, single use.
    pub fn diagnostic_store() -> Self {
        Self::new(TURN_DIAGNOSTIC_TTL, true, true)
    }

    pub fn new(ttl: Duration, bind_ip: bool, one_shot: bool) -> Self {
        Self {
            ttl,
            bind_ip,
            one_shot,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Mint and register a fresh token for `ip`.
    pub fn issue(&self, ip: IpAddr) -> IssuedToken {
        let now = unix_secs();
        let token = serenada_auth::turn::new_token();
        let expires_at = now + self.ttl.as_secs();

        let mut tokens = self.tokens.lock().expect("turn token store lock poisoned");
        sweep(&mut tokens, now);
        tokens.insert(token.clone(), TokenEntry { ip, expires_at });

        IssuedToken {
            token,
            expires_at,
            ttl_ms: self.ttl.as_millis() as u64,
        }
    }

    /// Check a presented token for `ip`. One-shot stores consume the
    /// entry on success.
    pub fn validate(&self, token: &str, ip: IpAddr) -> bool {
        let now = unix_secs();
        let mut tokens = self.tokens.lock().expect("turn token store lock poisoned");
        sweep(&mut tokens, now);

        let Some(entry) = tokens.get(token) else {
            return false;
        };
        if entry.expires_at <= now {
            tokens.remove(token);
            return false;
        }
        if self.bind_ip && entry.ip != ip {
            return false;
        }
        if self.one_shot {
            tokens.remove(token);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().expect("turn token store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sweep(tokens: &mut HashMap<String, TokenEntry>, now: u64) {
    tokens.retain(|_, entry| entry.expires_at > now);
}
