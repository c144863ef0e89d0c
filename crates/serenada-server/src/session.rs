//! Client sessions
//!
//! One [`ClientSession`] per live connection, regardless of transport.
//! The outbound side is a bounded frame queue drained by the transport's
//! writer task; a full queue drops the newest frame rather than blocking
//! the hub (signaling is resilient to drops — clients recover via
//! `turn-refresh`, `ping`, and ICE restarts).

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rand::RngCore;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use serenada_protocol::Envelope;

use crate::clock::mono_ms;
use crate::config::OUT_QUEUE_CAPACITY;
use crate::metrics::Metrics;

/// Session identifier, unique per connection
pub type Sid = String;

/// Which transport carries this session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Ws,
    Sse,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ws => "ws",
            Self::Sse => "sse",
        }
    }
}

#[derive(Debug, Default, Clone)]
struct SessionIds {
    cid: String,
    rid: String,
}

/// One live client connection.
pub struct ClientSession {
    /// Server-assigned session id; reused only across SSE GET reconnects
    pub sid: Sid,
    /// Routing / rate-limit key
    pub ip: IpAddr,
    pub transport: Transport,
    out: mpsc::Sender<String>,
    last_seen_ms: AtomicU64,
    ids: Mutex<SessionIds>,
    replaced: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
    metrics: Arc<Metrics>,
}

impl ClientSession {
    /// Create a session plus the receiver end of its outbound queue
    /// (owned by the transport writer).
    pub fn new(
        sid: Sid,
        ip: IpAddr,
        transport: Transport,
        metrics: Arc<Metrics>,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (out, rx) = mpsc::channel(OUT_QUEUE_CAPACITY);
        let session = Arc::new(Self {
            sid,
            ip,
            transport,
            out,
            last_seen_ms: AtomicU64::new(mono_ms()),
            ids: Mutex::new(SessionIds::default()),
            replaced: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            metrics,
        });
        (session, rx)
    }

    /// Enqueue one outbound envelope. Never blocks: a full queue drops
    /// the frame and bumps `send_queue_drop_total`.
    pub fn enqueue(&self, env: &Envelope) {
        let Ok(line) = env.encode() else {
            return;
        };
        match self.out.try_send(line) {
            Ok(()) => self.metrics.inc_tx(&env.ty),
            Err(TrySendError::Full(_)) => self.metrics.send_queue_drop(),
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Stamp liveness; called on every inbound frame and heartbeat.
    pub fn touch(&self) {
        self.last_seen_ms.store(mono_ms(), Ordering::Relaxed);
    }

    /// Milliseconds since the last inbound activity.
    pub fn idle_ms(&self) -> u64 {
        mono_ms().saturating_sub(self.last_seen_ms.load(Ordering::Relaxed))
    }

    pub fn cid(&self) -> String {
        self.ids.lock().expect("session ids lock poisoned").cid.clone()
    }

    pub fn rid(&self) -> String {
        self.ids.lock().expect("session ids lock poisoned").rid.clone()
    }

    pub fn set_room(&self, cid: &str, rid: &str) {
        let mut ids = self.ids.lock().expect("session ids lock poisoned");
        ids.cid = cid.to_string();
        ids.rid = rid.to_string();
    }

    /// Forget room membership, keeping the transport open.
    pub fn clear_room(&self) {
        let mut ids = self.ids.lock().expect("session ids lock poisoned");
        ids.cid.clear();
        ids.rid.clear();
    }

    /// Mark superseded by a same-identity reconnect; disconnect will then
    /// skip room and watcher cleanup.
    pub fn mark_replaced(&self) {
        self.replaced.store(true, Ordering::Release);
    }

    pub fn is_replaced(&self) -> bool {
        self.replaced.load(Ordering::Acquire)
    }

    /// First close wins; returns whether this call performed the close.
    pub fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Cancellation token observed by the transport tasks.
    pub fn cancelled(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the transport tasks.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("sid", &self.sid)
            .field("transport", &self.transport)
            .field("ip", &self.ip)
            .finish_non_exhaustive()
    }
}

/// Mint a fresh opaque session id.
pub fn new_sid() -> Sid {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serenada_protocol::msg;

    fn test_session() -> (Arc<ClientSession>, mpsc::Receiver<String>) {
        ClientSession::new(
            new_sid(),
            "127.0.0.1".parse().unwrap(),
            Transport::Ws,
            Arc::new(Metrics::new()),
        )
    }

    #[tokio::test]
    async fn test_enqueue_delivers_in_order() {
        let (session, mut rx) = test_session();
        session.enqueue(&Envelope::event(msg::PING));
        session.enqueue(&Envelope::event(msg::PONG));
        assert!(rx.recv().await.unwrap().contains("ping"));
        assert!(rx.recv().await.unwrap().contains("pong"));
    }

    #[tokio::test]
    async fn test_enqueue_drops_newest_when_full() {
        let (session, mut rx) = test_session();
        for _ in 0..OUT_QUEUE_CAPACITY {
            session.enqueue(&Envelope::event(msg::PING));
        }
        session.enqueue(&Envelope::event(msg::PONG));

        let mut drained = 0;
        while let Ok(line) = rx.try_recv() {
            assert!(line.contains("ping"), "overflow frame must be the one dropped");
            drained += 1;
        }
        assert_eq!(drained, OUT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_room_ids_roundtrip() {
        let (session, _rx) = test_session();
        assert_eq!(session.cid(), "");
        session.set_room("C-aa", "room");
        assert_eq!(session.cid(), "C-aa");
        assert_eq!(session.rid(), "room");
        session.clear_room();
        assert_eq!(session.rid(), "");
    }

    #[test]
    fn test_begin_close_idempotent() {
        let (session, _rx) = test_session();
        assert!(session.begin_close());
        assert!(!session.begin_close());
    }

    #[test]
    fn test_new_sid_shape() {
        let sid = new_sid();
        assert_eq!(sid.len(), 32);
        assert_ne!(sid, new_sid());
    }
}
