//! Per-IP rate limiting
//!
//! Token buckets keyed by client IP: refill proportional to elapsed
//! wall-clock, capped at the burst capacity, one token per request. A
//! bypass list (IPs, CIDRs, or `*`) parsed at startup short-circuits the
//! check for trusted callers such as load balancers and the load driver.

use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Instant;

use dashmap::DashMap;
use ipnet::IpNet;
use tracing::warn;

/// Bucket-map size above which a lookup also sweeps idle buckets
const SWEEP_THRESHOLD: usize = 10_000;
/// Buckets idle longer than this are dropped by the sweep (seconds)
const SWEEP_IDLE_SECS: u64 = 600;

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn allow(&mut self, capacity: f64, refill_per_sec: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed.as_secs_f64() * refill_per_sec).min(capacity);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Startup-parsed bypass specification.
#[derive(Debug, Default)]
pub struct BypassList {
    any: bool,
    nets: Vec<IpNet>,
    addrs: Vec<IpAddr>,
}

impl BypassList {
    /// Parse a comma list of IPs, CIDRs, and `*`. Unparseable entries are
    /// logged and skipped.
    pub fn parse(spec: &str) -> Self {
        let mut list = Self::default();
        for entry in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if entry == "*" {
                list.any = true;
            } else if let Ok(net) = entry.parse::<IpNet>() {
                list.nets.push(net);
            } else if let Ok(addr) = entry.parse::<IpAddr>() {
                list.addrs.push(addr);
            } else {
                warn!(entry, "ignoring unparseable rate-limit bypass entry");
            }
        }
        list
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.any || self.addrs.contains(&ip) || self.nets.iter().any(|n| n.contains(&ip))
    }
}

/// Per-IP token-bucket limiter.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: DashMap<IpAddr, Mutex<TokenBucket>>,
    bypass: BypassList,
}

impl RateLimiter {
    pub fn new(capacity: f64, refill_per_sec: f64, bypass_spec: &str) -> Self {
        Self {
            capacity: capacity.max(1.0),
            refill_per_sec: refill_per_sec.max(0.0),
            buckets: DashMap::new(),
            bypass: BypassList::parse(bypass_spec),
        }
    }

    /// Check and consume one token for `ip`.
    pub fn allow(&self, ip: IpAddr) -> bool {
        if self.bypass.contains(ip) {
            return true;
        }
        self.maybe_sweep();
        let bucket = self
            .buckets
            .entry(ip)
            .or_insert_with(|| Mutex::new(TokenBucket::new(self.capacity)));
        let mut bucket = bucket.lock().expect("rate-limit bucket lock poisoned");
        bucket.allow(self.capacity, self.refill_per_sec)
    }

    /// Drop buckets idle past [`SWEEP_IDLE_SECS`] once the map grows past
    /// [`SWEEP_THRESHOLD`]. Keeps memory bounded without a dedicated task.
    fn maybe_sweep(&self) {
        if self.buckets.len() <= SWEEP_THRESHOLD {
            return;
        }
        self.buckets.retain(|_, bucket| {
            bucket
                .lock()
                .map(|b| b.last_refill.elapsed().as_secs() < SWEEP_IDLE_SECS)
                .unwrap_or(false)
        });
    }
}
