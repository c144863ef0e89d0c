//! Server configuration
//!
//! All knobs come from the environment; there is no config file. Secrets
//! are wrapped in `Zeroizing` so they are wiped from memory on drop.

use std::env;
use std::time::Duration;

use zeroize::Zeroizing;

/// Outbound queue capacity per session, frames
pub const OUT_QUEUE_CAPACITY: usize = 256;
/// Server ping / SSE keep-alive interval
pub const PING_INTERVAL: Duration = Duration::from_secs(12);
/// Missed-ping budget before a WS session is force-closed
pub const PONG_TIMEOUT_INTERVALS: u32 = 2;
/// Per-frame WebSocket write deadline
pub const WS_WRITE_DEADLINE: Duration = Duration::from_secs(5);
/// Grace window for SSE GET reconnection with the same sid
pub const SSE_GRACE: Duration = Duration::from_secs(5);
/// Stale-session reaper period
pub const REAPER_PERIOD: Duration = Duration::from_secs(15);
/// Idle limit for SSE sessions not in a room
pub const SSE_IDLE_LIMIT: Duration = Duration::from_secs(60);
/// Idle limit for SSE sessions in a room
pub const SSE_IDLE_LIMIT_IN_ROOM: Duration = Duration::from_secs(300);
/// Lifetime of call-store TURN tokens
pub const TURN_CALL_TTL: Duration = Duration::from_secs(30 * 60);
/// Lifetime of diagnostic TURN tokens
pub const TURN_DIAGNOSTIC_TTL: Duration = Duration::from_secs(60);
/// Credential lifetime returned for a consumed diagnostic token
pub const TURN_DIAGNOSTIC_CRED_TTL: Duration = Duration::from_secs(5);

/// Environment-derived configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HMAC key for room-ID tags (`ROOM_ID_SECRET`)
    pub room_id_secret: Zeroizing<String>,
    /// Environment folded into the room-ID tag (`ROOM_ID_ENV`, default `dev`)
    pub room_id_env: String,
    /// HMAC key for reconnect tokens (`RECONNECT_SECRET`; empty = legacy,
    /// unauthenticated reconnection)
    pub reconnect_secret: Zeroizing<String>,
    /// Shared secret for TURN REST credentials (`TURN_SECRET`)
    pub turn_secret: Zeroizing<String>,
    /// Secret for the opaque access tokens (`TURN_TOKEN_SECRET`, falls
    /// back to `TURN_SECRET`)
    pub turn_token_secret: Zeroizing<String>,
    /// STUN host advertised in credential replies (`STUN_HOST`)
    pub stun_host: String,
    /// TURN host advertised in credential replies (`TURN_HOST`)
    pub turn_host: String,
    /// Allowed origins for WS upgrade and CORS (`ALLOWED_ORIGINS`,
    /// comma list; empty = allow any)
    pub allowed_origins: Vec<String>,
    /// Honor X-Forwarded-For / X-Real-IP (`TRUST_PROXY=1`)
    pub trust_proxy: bool,
    /// Rate-limit bypass spec (`RATE_LIMIT_BYPASS_IPS`: IPs, CIDRs, `*`)
    pub rate_limit_bypass_ips: String,
    /// Token-bucket burst capacity (`RATE_LIMIT_BURST`, default 10)
    pub rate_limit_burst: f64,
    /// Token-bucket refill rate per second (`RATE_LIMIT_PER_SEC`, default 1)
    pub rate_limit_per_sec: f64,
    /// Expose `/api/internal/stats` (`ENABLE_INTERNAL_STATS=1`)
    pub enable_internal_stats: bool,
    /// Token guarding the stats endpoint (`INTERNAL_STATS_TOKEN`)
    pub internal_stats_token: Zeroizing<String>,
}

impl ServerConfig {
    /// Build from process environment.
    pub fn from_env() -> Self {
        let turn_secret = var("TURN_SECRET");
        let turn_token_secret = {
            let v = var("TURN_TOKEN_SECRET");
            if v.is_empty() { turn_secret.clone() } else { v }
        };

        Self {
            room_id_secret: Zeroizing::new(var("ROOM_ID_SECRET")),
            room_id_env: var_or("ROOM_ID_ENV", "dev"),
            reconnect_secret: Zeroizing::new(var("RECONNECT_SECRET")),
            turn_secret: Zeroizing::new(turn_secret),
            turn_token_secret: Zeroizing::new(turn_token_secret),
            stun_host: var("STUN_HOST"),
            turn_host: var("TURN_HOST"),
            allowed_origins: split_list(&var("ALLOWED_ORIGINS")),
            trust_proxy: var("TRUST_PROXY") == "1",
            rate_limit_bypass_ips: var("RATE_LIMIT_BYPASS_IPS"),
            rate_limit_burst: parse_or("RATE_LIMIT_BURST", 10.0),
            rate_limit_per_sec: parse_or("RATE_LIMIT_PER_SEC", 1.0),
            enable_internal_stats: var("ENABLE_INTERNAL_STATS") == "1",
            internal_stats_token: Zeroizing::new(var("INTERNAL_STATS_TOKEN")),
        }
    }

    /// Whether the given Origin header value may connect.
    ///
    /// Absent origins are allowed (native mobile clients send none).
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        match origin {
            None => true,
            Some(o) => self.allowed_origins.iter().any(|a| a == o),
        }
    }
}

fn var(name: &str) -> String {
    env::var(name).unwrap_or_default()
}

fn var_or(name: &str, default: &str) -> String {
    let v = var(name);
    if v.is_empty() { default.to_string() } else { v }
}

fn parse_or(name: &str, default: f64) -> f64 {
    var(name).parse().unwrap_or(default)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
