//! Process clocks
//!
//! Liveness bookkeeping uses a monotonic millisecond counter anchored at
//! process start so it is immune to wall-clock steps; wire-visible
//! timestamps (join times, token expiries) use unix time.

use std::sync::LazyLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static START: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Milliseconds since process start, monotonic.
pub fn mono_ms() -> u64 {
    START.elapsed().as_millis() as u64
}

/// Unix seconds.
pub fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Unix milliseconds.
pub fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
