//! Lock-free server metrics
//!
//! Counters and gauges are plain atomics; by-type maps live in a
//! `DashMap` so a snapshot never has to take the hub lock. All counters
//! are monotonic; gauges move both ways.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::session::Transport;

/// Join-latency histogram bucket upper bounds, milliseconds.
pub const JOIN_LATENCY_BOUNDS_MS: [u64; 11] =
    [5, 10, 25, 50, 100, 200, 500, 1000, 2000, 5000, 10000];

/// Why a session was torn down; becomes a labeled counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Transport closed or errored
    TransportClose,
    /// Two ping intervals passed with no inbound frame
    PongTimeout,
    /// Stale reaper evicted an idle SSE session
    Stale,
    /// SSE grace window expired without a same-sid reconnect
    GraceExpired,
    /// Superseded by a same-sid reconnect
    Replaced,
    /// Evicted as a ghost during an authenticated rejoin
    GhostEvicted,
}

impl DisconnectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransportClose => "transport_close",
            Self::PongTimeout => "pong_timeout",
            Self::Stale => "stale",
            Self::GraceExpired => "sse_grace_expired",
            Self::Replaced => "replaced",
            Self::GhostEvicted => "ghost_evicted",
        }
    }
}

#[derive(Default)]
struct TransportCounters {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

/// The metrics registry. One per process, shared by `Arc`.
pub struct Metrics {
    started: Instant,

    ws_clients: AtomicI64,
    sse_clients: AtomicI64,
    active_rooms: AtomicI64,
    watcher_subscriptions: AtomicI64,

    ws_conns: TransportCounters,
    sse_conns: TransportCounters,

    send_queue_drop_total: AtomicU64,

    rx_by_type: DashMap<String, AtomicU64>,
    tx_by_type: DashMap<String, AtomicU64>,
    disconnect_reasons: DashMap<&'static str, AtomicU64>,

    join_buckets: [AtomicU64; JOIN_LATENCY_BOUNDS_MS.len() + 1],
    join_count: AtomicU64,
    join_sum_ms: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            ws_clients: AtomicI64::new(0),
            sse_clients: AtomicI64::new(0),
            active_rooms: AtomicI64::new(0),
            watcher_subscriptions: AtomicI64::new(0),
            ws_conns: TransportCounters::default(),
            sse_conns: TransportCounters::default(),
            send_queue_drop_total: AtomicU64::new(0),
            rx_by_type: DashMap::new(),
            tx_by_type: DashMap::new(),
            disconnect_reasons: DashMap::new(),
            join_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            join_count: AtomicU64::new(0),
            join_sum_ms: AtomicU64::new(0),
        }
    }

    fn gauge(&self, transport: Transport) -> &AtomicI64 {
        match transport {
            Transport::Ws => &self.ws_clients,
            Transport::Sse => &self.sse_clients,
        }
    }

    fn conns(&self, transport: Transport) -> &TransportCounters {
        match transport {
            Transport::Ws => &self.ws_conns,
            Transport::Sse => &self.sse_conns,
        }
    }

    pub fn client_connected(&self, transport: Transport) {
        self.gauge(transport).fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self, transport: Transport) {
        self.gauge(transport).fetch_sub(1, Ordering::Relaxed);
    }

    pub fn conn_attempt(&self, transport: Transport) {
        self.conns(transport).attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn conn_success(&self, transport: Transport) {
        self.conns(transport).successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn conn_failure(&self, transport: Transport) {
        self.conns(transport).failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn room_created(&self) {
        self.active_rooms.fetch_add(1, Ordering::Relaxed);
    }

    pub fn room_deleted(&self) {
        self.active_rooms.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn watchers_added(&self, n: usize) {
        self.watcher_subscriptions.fetch_add(n as i64, Ordering::Relaxed);
    }

    pub fn watchers_removed(&self, n: usize) {
        self.watcher_subscriptions.fetch_sub(n as i64, Ordering::Relaxed);
    }

    pub fn send_queue_drop(&self) {
        self.send_queue_drop_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rx(&self, ty: &str) {
        bump(&self.rx_by_type, ty);
    }

    pub fn inc_tx(&self, ty: &str) {
        bump(&self.tx_by_type, ty);
    }

    pub fn disconnect(&self, reason: DisconnectReason) {
        self.disconnect_reasons
            .entry(reason.as_str())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_join_latency(&self, elapsed: Duration) {
        let ms = elapsed.as_millis() as u64;
        let idx = JOIN_LATENCY_BOUNDS_MS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(JOIN_LATENCY_BOUNDS_MS.len());
        self.join_buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.join_count.fetch_add(1, Ordering::Relaxed);
        self.join_sum_ms.fetch_add(ms, Ordering::Relaxed);
    }

    /// Point-in-time snapshot for the internal stats endpoint.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            gauges: Gauges {
                ws_clients: self.ws_clients.load(Ordering::Relaxed),
                sse_clients: self.sse_clients.load(Ordering::Relaxed),
                active_rooms: self.active_rooms.load(Ordering::Relaxed),
                watcher_subscriptions: self.watcher_subscriptions.load(Ordering::Relaxed),
            },
            counters: Counters {
                ws_conn_attempts: self.ws_conns.attempts.load(Ordering::Relaxed),
                ws_conn_successes: self.ws_conns.successes.load(Ordering::Relaxed),
                ws_conn_failures: self.ws_conns.failures.load(Ordering::Relaxed),
                sse_conn_attempts: self.sse_conns.attempts.load(Ordering::Relaxed),
                sse_conn_successes: self.sse_conns.successes.load(Ordering::Relaxed),
                sse_conn_failures: self.sse_conns.failures.load(Ordering::Relaxed),
                send_queue_drop_total: self.send_queue_drop_total.load(Ordering::Relaxed),
            },
            messages: Messages {
                rx: collect(&self.rx_by_type),
                tx: collect(&self.tx_by_type),
            },
            disconnect_reasons: self
                .disconnect_reasons
                .iter()
                .map(|e| (e.key().to_string(), e.value().load(Ordering::Relaxed)))
                .collect(),
            join_latency_ms: JoinLatency {
                bounds: JOIN_LATENCY_BOUNDS_MS.to_vec(),
                buckets: self
                    .join_buckets
                    .iter()
                    .map(|b| b.load(Ordering::Relaxed))
                    .collect(),
                count: self.join_count.load(Ordering::Relaxed),
                sum_ms: self.join_sum_ms.load(Ordering::Relaxed),
            },
            runtime: Runtime {
                uptime_secs: self.started.elapsed().as_secs(),
            },
        }
    }
}

fn bump(map: &DashMap<String, AtomicU64>, key: &str) {
    if let Some(counter) = map.get(key) {
        counter.fetch_add(1, Ordering::Relaxed);
        return;
    }
    map.entry(key.to_string())
        .or_default()
        .fetch_add(1, Ordering::Relaxed);
}

fn collect(map: &DashMap<String, AtomicU64>) -> BTreeMap<String, u64> {
    map.iter()
        .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
        .collect()
}

#[derive(Debug, Serialize)]
pub struct Gauges {
    pub ws_clients: i64,
    pub sse_clients: i64,
    pub active_rooms: i64,
    pub watcher_subscriptions: i64,
}

#[derive(Debug, Serialize)]
pub struct Counters {
    pub ws_conn_attempts: u64,
    pub ws_conn_successes: u64,
    pub ws_conn_failures: u64,
    pub sse_conn_attempts: u64,
    pub sse_conn_successes: u64,
    pub sse_conn_failures: u64,
    pub send_queue_drop_total: u64,
}

#[derive(Debug, Serialize)]
pub struct Messages {
    pub rx: BTreeMap<String, u64>,
    pub tx: BTreeMap<String, u64>,
}

#[derive(Debug, Serialize)]
pub struct JoinLatency {
    pub bounds: Vec<u64>,
    pub buckets: Vec<u64>,
    pub count: u64,
    pub sum_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct Runtime {
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub gauges: Gauges,
    pub counters: Counters,
    pub messages: Messages,
    pub disconnect_reasons: BTreeMap<String, u64>,
    pub join_latency_ms: JoinLatency,
    pub runtime: Runtime,
}
