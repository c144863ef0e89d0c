//! The hub — central registry of clients, rooms, and watchers
//!
//! Locking is two-tier: a registry `RwLock` over the client, room, and
//! watcher maps, plus one mutex per room. The registry lock is always
//! taken before a room lock, never after, and neither is held while
//! enqueueing to session queues — broadcast targets are collected under
//! the lock, then enqueued after release, so one slow consumer can never
//! stall a state transition.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use rand::RngCore;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use serenada_protocol::payload::{
    error_envelope, parse_payload, JoinPayload, JoinedPayload, RoomEndedPayload,
    RoomStatePayload, RoomStatusUpdatePayload, TurnRefreshedPayload, WatchRoomsPayload,
};
use serenada_protocol::{msg, Envelope, ErrorCode, PROTOCOL_VERSION};

use crate::clock::unix_ms;
use crate::config::{ServerConfig, REAPER_PERIOD, SSE_IDLE_LIMIT, SSE_IDLE_LIMIT_IN_ROOM};
use crate::metrics::{DisconnectReason, Metrics};
use crate::room::{Participant, Room, ROOM_CAPACITY};
use crate::session::{ClientSession, Sid, Transport};
use crate::turn::TurnTokenStore;

struct HubInner {
    clients: HashMap<Sid, Arc<ClientSession>>,
    rooms: HashMap<String, Arc<Room>>,
    watchers: HashMap<String, HashSet<Sid>>,
}

/// The central registry. One per process, shared by `Arc`.
pub struct Hub {
    cfg: Arc<ServerConfig>,
    metrics: Arc<Metrics>,
    turn_calls: Arc<TurnTokenStore>,
    inner: RwLock<HubInner>,
}

impl Hub {
    pub fn new(
        cfg: Arc<ServerConfig>,
        metrics: Arc<Metrics>,
        turn_calls: Arc<TurnTokenStore>,
    ) -> Self {
        Self {
            cfg,
            metrics,
            turn_calls,
            inner: RwLock::new(HubInner {
                clients: HashMap::new(),
                rooms: HashMap::new(),
                watchers: HashMap::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HubInner> {
        self.inner.read().expect("hub lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, HubInner> {
        self.inner.write().expect("hub lock poisoned")
    }

    /// Register a freshly accepted session.
    pub fn register(&self, session: &Arc<ClientSession>) {
        self.write()
            .clients
            .insert(session.sid.clone(), Arc::clone(session));
        self.metrics.client_connected(session.transport);
    }

    /// Register a session that may reuse an existing sid (SSE GET
    /// reconnect). The displaced session keeps nothing: identity and room
    /// membership move to the new one, watcher entries stay valid because
    /// they are keyed by sid.
    pub fn register_replacing(&self, session: &Arc<ClientSession>) {
        let old = self
            .write()
            .clients
            .insert(session.sid.clone(), Arc::clone(session));
        self.metrics.client_connected(session.transport);

        let Some(old) = old else { return };
        let (cid, rid) = (old.cid(), old.rid());
        if !rid.is_empty() {
            session.set_room(&cid, &rid);
            if let Some(room) = self.room(&rid) {
                room.lock()
                    .replace_session(&session.sid, Arc::clone(session));
            }
        }
        old.mark_replaced();
        debug!(sid = %session.sid, "session replaced by same-sid reconnect");
        self.disconnect(&old, DisconnectReason::Replaced);
    }

    /// Look up a session by sid.
    pub fn session(&self, sid: &str) -> Option<Arc<ClientSession>> {
        self.read().clients.get(sid).cloned()
    }

    /// Look up a room by rid.
    pub fn room(&self, rid: &str) -> Option<Arc<Room>> {
        self.read().rooms.get(rid).cloned()
    }

    /// Current participant count for a room (0 when absent).
    pub fn participant_count(&self, rid: &str) -> usize {
        self.room(rid).map(|r| r.lock().len()).unwrap_or(0)
    }

    /// Route one inbound envelope.
    pub fn dispatch(&self, session: &Arc<ClientSession>, env: Envelope) {
        self.metrics.inc_rx(&env.ty);
        if env.v != PROTOCOL_VERSION {
            session.enqueue(&error_envelope(
                ErrorCode::UnsupportedVersion,
                env.rid.as_deref(),
            ));
            return;
        }
        match env.ty.as_str() {
            msg::JOIN => self.handle_join(session, &env),
            msg::LEAVE => self.leave_room(session),
            msg::END_ROOM => self.handle_end_room(session),
            msg::TURN_REFRESH => self.handle_turn_refresh(session),
            msg::WATCH_ROOMS => self.handle_watch_rooms(session, &env),
            msg::PING => session.enqueue(&Envelope::event(msg::PONG)),
            msg::OFFER | msg::ANSWER | msg::ICE => self.handle_relay(session, &env),
            other => debug!(ty = other, sid = %session.sid, "ignoring unknown message type"),
        }
    }

    // --- join -----------------------------------------------------------

    fn handle_join(&self, session: &Arc<ClientSession>, env: &Envelope) {
        let started = Instant::now();

        let Some(rid) = env.rid.clone().filter(|r| !r.is_empty()) else {
            session.enqueue(&error_envelope(ErrorCode::BadRequest, None));
            return;
        };
        match serenada_auth::room_id::validate(&self.cfg.room_id_secret, &self.cfg.room_id_env, &rid)
        {
            Ok(()) => {}
            Err(serenada_auth::AuthError::NotConfigured) => {
                session.enqueue(&error_envelope(ErrorCode::ServerNotConfigured, Some(&rid)));
                return;
            }
            Err(_) => {
                session.enqueue(&error_envelope(ErrorCode::InvalidRoomId, Some(&rid)));
                return;
            }
        }
        let Some(join) = parse_payload::<JoinPayload>(env) else {
            session.enqueue(&error_envelope(ErrorCode::BadRequest, Some(&rid)));
            return;
        };

        // A session lives in at most one room; vacate the previous one
        // (this broadcasts room_state there).
        if !session.rid().is_empty() {
            self.leave_room(session);
        }

        let reconnect_cid = join.reconnect_cid.clone().unwrap_or_default();
        let mut ghost: Option<Participant> = None;
        let assigned_cid;
        let snapshot;
        let room = loop {
            let room = self.get_or_create_room(&rid);
            let mut st = room.lock();
            // A concurrent leave may have unregistered the room after our
            // lookup; start over with a fresh instance.
            if st.is_deleted() {
                continue;
            }

            if !reconnect_cid.is_empty() {
                let presented = join.reconnect_token.clone().unwrap_or_default();
                if serenada_auth::reconnect::verify(
                    &self.cfg.reconnect_secret,
                    &reconnect_cid,
                    &rid,
                    &presented,
                )
                .is_err()
                {
                    drop(st);
                    warn!(rid = %rid, sid = %session.sid, "reconnect token mismatch");
                    session.enqueue(&error_envelope(
                        ErrorCode::InvalidReconnectToken,
                        Some(&rid),
                    ));
                    self.drop_room_if_empty(&rid);
                    return;
                }
                // Evict the ghost owning this CID; the host seat is left
                // untouched so the reconnecting owner keeps it.
                ghost = st.remove_by_cid(&reconnect_cid);
            }

            if st.len() >= ROOM_CAPACITY {
                drop(st);
                session.enqueue(&error_envelope(ErrorCode::RoomFull, Some(&rid)));
                return;
            }

            assigned_cid = match &ghost {
                Some(g) => g.cid.clone(),
                None => new_cid(),
            };
            let inserted = st.insert(Participant {
                cid: assigned_cid.clone(),
                joined_at_ms: unix_ms(),
                session: Arc::clone(session),
            });
            debug_assert!(inserted.is_ok(), "capacity checked above");
            session.set_room(&assigned_cid, &rid);
            snapshot = st.snapshot();
            drop(st);
            break room;
        };

        // Hub-level ghost cleanup happens outside the room lock to keep
        // the registry-then-room lock order.
        let reconnected = ghost.is_some();
        if let Some(ghost) = ghost {
            if !Arc::ptr_eq(&ghost.session, session) {
                ghost.session.clear_room();
                self.disconnect(&ghost.session, DisconnectReason::GhostEvicted);
            }
        }

        let issued = self.turn_calls.issue(session.ip);
        let reconnect_token = serenada_auth::reconnect::token(
            &self.cfg.reconnect_secret,
            &assigned_cid,
            &rid,
        );
        let joined = JoinedPayload {
            host_cid: snapshot.host_cid.clone(),
            participants: snapshot.participants.clone(),
            turn_token: issued.token,
            turn_token_expires_at: issued.expires_at,
            turn_token_ttl_ms: issued.ttl_ms,
            reconnect_token,
        };
        let mut joined_env = Envelope::event(msg::JOINED)
            .with_rid(rid.clone())
            .with_payload(to_payload(&joined));
        joined_env.cid = Some(assigned_cid.clone());

        // `joined` must be the first event the joiner sees for this join;
        // only then does room_state fan out.
        session.enqueue(&joined_env);
        self.metrics.observe_join_latency(started.elapsed());

        let targets = room.lock().sessions();
        let state_env = room_state_envelope(&rid, &snapshot);
        for target in targets {
            target.enqueue(&state_env);
        }
        self.notify_watchers(&rid);

        info!(
            rid = %rid,
            cid = %assigned_cid,
            sid = %session.sid,
            transport = session.transport.as_str(),
            device = join.device.as_deref().unwrap_or(""),
            reconnect = reconnected,
            "joined room"
        );
    }

    // --- leave ----------------------------------------------------------

    /// Remove the session from its room, if any. The transport stays
    /// open; the client may join again.
    pub fn leave_room(&self, session: &Arc<ClientSession>) {
        let rid = session.rid();
        if rid.is_empty() {
            return;
        }
        session.clear_room();

        let Some(room) = self.room(&rid) else { return };
        let (removed, now_empty, snapshot, remaining) = {
            let mut st = room.lock();
            let removed = st.remove_by_sid(&session.sid).is_some();
            (removed, st.is_empty(), st.snapshot(), st.sessions())
        };
        if !removed {
            return;
        }

        if now_empty {
            self.drop_room_if_empty(&rid);
        } else {
            let env = room_state_envelope(&rid, &snapshot);
            for peer in remaining {
                peer.enqueue(&env);
            }
        }
        self.notify_watchers(&rid);
        debug!(rid = %rid, sid = %session.sid, "left room");
    }

    // --- end_room -------------------------------------------------------

    fn handle_end_room(&self, session: &Arc<ClientSession>) {
        let rid = session.rid();
        if rid.is_empty() {
            session.enqueue(&error_envelope(ErrorCode::NotInRoom, None));
            return;
        }
        let Some(room) = self.room(&rid) else {
            session.enqueue(&error_envelope(ErrorCode::NotInRoom, Some(&rid)));
            return;
        };

        let by = session.cid();
        let drained = {
            let mut st = room.lock();
            if st.host_cid() != by {
                drop(st);
                session.enqueue(&error_envelope(ErrorCode::NotHost, Some(&rid)));
                return;
            }
            st.drain()
        };

        {
            let mut inner = self.write();
            // Remove only this instance; a racing join may already have
            // installed a successor room under the same rid.
            let same = inner
                .rooms
                .get(&rid)
                .map(|r| Arc::ptr_eq(r, &room))
                .unwrap_or(false);
            if same {
                inner.rooms.remove(&rid);
                self.metrics.room_deleted();
            }
        }

        let env = Envelope::event(msg::ROOM_ENDED)
            .with_rid(rid.clone())
            .with_payload(to_payload(&RoomEndedPayload {
                by: by.clone(),
                reason: "host_ended".to_string(),
            }));
        // Sessions stay alive and may join again.
        for participant in drained {
            participant.session.clear_room();
            participant.session.enqueue(&env);
        }
        self.notify_watchers(&rid);
        info!(rid = %rid, by = %by, "room ended by host");
    }

    // --- relay ----------------------------------------------------------

    fn handle_relay(&self, session: &Arc<ClientSession>, env: &Envelope) {
        let rid = session.rid();
        if rid.is_empty() {
            session.enqueue(&error_envelope(ErrorCode::NotInRoom, env.rid.as_deref()));
            return;
        }
        let Some(object) = env.payload_object() else {
            session.enqueue(&error_envelope(ErrorCode::BadRequest, Some(&rid)));
            return;
        };
        let Some(room) = self.room(&rid) else {
            session.enqueue(&error_envelope(ErrorCode::NotInRoom, Some(&rid)));
            return;
        };

        let mut payload = object.clone();
        payload.insert("from".to_string(), Value::String(session.cid()));

        let targets = {
            let st = room.lock();
            match env.to.as_deref().filter(|t| !t.is_empty()) {
                // Directed delivery; a target outside this room is a
                // client bug, not a routing request.
                Some(to) => match st.session_by_cid(to) {
                    Some(target) => vec![target],
                    None => {
                        drop(st);
                        session.enqueue(&error_envelope(ErrorCode::BadRequest, Some(&rid)));
                        return;
                    }
                },
                None => st.peer_sessions(&session.sid),
            }
        };

        let mut relayed = Envelope::event(&env.ty).with_rid(rid);
        relayed.payload = Some(Value::Object(payload));
        for target in targets {
            target.enqueue(&relayed);
        }
    }

    // --- turn-refresh ---------------------------------------------------

    fn handle_turn_refresh(&self, session: &Arc<ClientSession>) {
        let rid = session.rid();
        if rid.is_empty() {
            session.enqueue(&error_envelope(ErrorCode::NotInRoom, None));
            return;
        }
        if self.cfg.turn_secret.is_empty() {
            session.enqueue(&error_envelope(ErrorCode::TurnRefreshFailed, Some(&rid)));
            return;
        }
        // The previous token is not invalidated; its TTL simply runs out.
        let issued = self.turn_calls.issue(session.ip);
        let env = Envelope::event(msg::TURN_REFRESHED)
            .with_rid(rid)
            .with_payload(to_payload(&TurnRefreshedPayload {
                turn_token: issued.token,
                turn_token_expires_at: issued.expires_at,
                turn_token_ttl_ms: issued.ttl_ms,
            }));
        session.enqueue(&env);
    }

    // --- watch_rooms ----------------------------------------------------

    fn handle_watch_rooms(&self, session: &Arc<ClientSession>, env: &Envelope) {
        let Some(watch) = parse_payload::<WatchRoomsPayload>(env) else {
            session.enqueue(&error_envelope(ErrorCode::BadRequest, None));
            return;
        };

        let mut statuses = Map::new();
        let mut added = 0usize;
        {
            let mut inner = self.write();
            for rid in &watch.rids {
                if serenada_auth::room_id::validate(
                    &self.cfg.room_id_secret,
                    &self.cfg.room_id_env,
                    rid,
                )
                .is_err()
                {
                    continue;
                }
                if inner
                    .watchers
                    .entry(rid.clone())
                    .or_default()
                    .insert(session.sid.clone())
                {
                    added += 1;
                }
                let count = inner.rooms.get(rid).map(|r| r.lock().len()).unwrap_or(0);
                statuses.insert(rid.clone(), Value::from(count));
            }
        }
        if added > 0 {
            self.metrics.watchers_added(added);
        }

        let env_out = Envelope::event(msg::ROOM_STATUSES).with_payload(Value::Object(statuses));
        session.enqueue(&env_out);
    }

    // --- disconnect -----------------------------------------------------

    /// Tear down a session. Idempotent; every exit path funnels here.
    /// Replaced sessions only leave the registry — their identity and
    /// room membership were already transferred.
    pub fn disconnect(&self, session: &Arc<ClientSession>, reason: DisconnectReason) {
        if !session.begin_close() {
            return;
        }
        let replaced = session.is_replaced();
        {
            let mut inner = self.write();
            let current = inner
                .clients
                .get(&session.sid)
                .map(|c| Arc::ptr_eq(c, session))
                .unwrap_or(false);
            if current {
                inner.clients.remove(&session.sid);
            }
            if !replaced {
                let mut removed = 0usize;
                inner.watchers.retain(|_, set| {
                    if set.remove(&session.sid) {
                        removed += 1;
                    }
                    !set.is_empty()
                });
                if removed > 0 {
                    self.metrics.watchers_removed(removed);
                }
            }
        }
        self.metrics.client_disconnected(session.transport);
        self.metrics.disconnect(reason);

        if !replaced && !session.rid().is_empty() {
            self.leave_room(session);
        }
        session.cancel();
        debug!(sid = %session.sid, reason = reason.as_str(), "session disconnected");
    }

    /// Called 5 s after an SSE GET stream dropped: if the sid was not
    /// re-claimed in the meantime, perform the full disconnect.
    pub fn sse_grace_expired(&self, session: &Arc<ClientSession>) {
        let still_current = self
            .read()
            .clients
            .get(&session.sid)
            .map(|c| Arc::ptr_eq(c, session))
            .unwrap_or(false);
        if still_current {
            self.disconnect(session, DisconnectReason::GraceExpired);
        }
    }

    // --- liveness -------------------------------------------------------

    /// Periodic sweep evicting SSE sessions that stopped POSTing.
    /// WebSocket liveness is handled by the per-connection ping loop.
    pub async fn run_sse_reaper(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(REAPER_PERIOD);
        loop {
            ticker.tick().await;
            self.reap_stale_sse();
        }
    }

    /// One reaper pass; split out for tests.
    pub fn reap_stale_sse(&self) {
        let stale: Vec<Arc<ClientSession>> = {
            let inner = self.read();
            inner
                .clients
                .values()
                .filter(|s| s.transport == Transport::Sse)
                .filter(|s| {
                    let limit = if s.rid().is_empty() {
                        SSE_IDLE_LIMIT
                    } else {
                        SSE_IDLE_LIMIT_IN_ROOM
                    };
                    s.idle_ms() > limit.as_millis() as u64
                })
                .cloned()
                .collect()
        };
        for session in stale {
            warn!(sid = %session.sid, idle_ms = session.idle_ms(), "reaping stale SSE session");
            self.disconnect(&session, DisconnectReason::Stale);
        }
    }

    // --- internals ------------------------------------------------------

    fn get_or_create_room(&self, rid: &str) -> Arc<Room> {
        let mut inner = self.write();
        if let Some(room) = inner.rooms.get(rid) {
            // A tombstoned instance is mid-teardown; install a fresh one.
            if !room.lock().is_deleted() {
                return Arc::clone(room);
            }
        }
        let room = Arc::new(Room::new(rid.to_string()));
        inner.rooms.insert(rid.to_string(), Arc::clone(&room));
        self.metrics.room_created();
        info!(rid, "room created");
        room
    }

    /// Unregister a room iff it is still empty. Checked under both locks
    /// so a racing join either sees the tombstone or keeps the room.
    fn drop_room_if_empty(&self, rid: &str) {
        let mut inner = self.write();
        let Some(room) = inner.rooms.get(rid).cloned() else {
            return;
        };
        let mut st = room.lock();
        if st.is_empty() {
            st.mark_deleted();
            drop(st);
            inner.rooms.remove(rid);
            self.metrics.room_deleted();
            info!(rid, "room deleted");
        }
    }

    fn notify_watchers(&self, rid: &str) {
        let (count, targets) = {
            let inner = self.read();
            let count = inner.rooms.get(rid).map(|r| r.lock().len()).unwrap_or(0);
            let targets: Vec<Arc<ClientSession>> = inner
                .watchers
                .get(rid)
                .map(|set| {
                    set.iter()
                        .filter_map(|sid| inner.clients.get(sid).cloned())
                        .collect()
                })
                .unwrap_or_default();
            (count, targets)
        };
        if targets.is_empty() {
            return;
        }
        let env = Envelope::event(msg::ROOM_STATUS_UPDATE).with_payload(to_payload(
            &RoomStatusUpdatePayload {
                rid: rid.to_string(),
                count,
            },
        ));
        for target in targets {
            target.enqueue(&env);
        }
    }
}

/// `"C-" ∥ hex(8 random bytes)`
fn new_cid() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("C-{}", hex::encode(bytes))
}

fn room_state_envelope(rid: &str, snapshot: &RoomStatePayload) -> Envelope {
    Envelope::event(msg::ROOM_STATE)
        .with_rid(rid)
        .with_payload(to_payload(snapshot))
}

fn to_payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::new_sid;
    use tokio::sync::mpsc;
    use zeroize::Zeroizing;

    fn test_cfg() -> Arc<ServerConfig> {
        Arc::new(ServerConfig {
            room_id_secret: Zeroizing::new("deadbeef".into()),
            room_id_env: "dev".into(),
            reconnect_secret: Zeroizing::new("reconnect".into()),
            turn_secret: Zeroizing::new("turn".into()),
            turn_token_secret: Zeroizing::new("turn".into()),
            stun_host: String::new(),
            turn_host: String::new(),
            allowed_origins: vec![],
            trust_proxy: false,
            rate_limit_bypass_ips: String::new(),
            rate_limit_burst: 10.0,
            rate_limit_per_sec: 1.0,
            enable_internal_stats: false,
            internal_stats_token: Zeroizing::new(String::new()),
        })
    }

    fn test_hub() -> Arc<Hub> {
        let cfg = test_cfg();
        let metrics = Arc::new(Metrics::new());
        let turn_calls = Arc::new(TurnTokenStore::call_store());
        Arc::new(Hub::new(cfg, metrics, turn_calls))
    }

    fn connect(hub: &Hub, transport: Transport) -> (Arc<ClientSession>, mpsc::Receiver<String>) {
        let (session, rx) = ClientSession::new(
            new_sid(),
            "127.0.0.1".parse().unwrap(),
            transport,
            Arc::new(Metrics::new()),
        );
        hub.register(&session);
        (session, rx)
    }

    fn mint_rid(hub: &Hub) -> String {
        serenada_auth::room_id::mint(&hub.cfg.room_id_secret, &hub.cfg.room_id_env).unwrap()
    }

    fn join(hub: &Hub, session: &Arc<ClientSession>, rid: &str) {
        hub.dispatch(
            session,
            Envelope::event(msg::JOIN)
                .with_rid(rid)
                .with_payload(serde_json::json!({})),
        );
    }

    async fn next(rx: &mut mpsc::Receiver<String>) -> Envelope {
        let line = rx.recv().await.expect("expected an event");
        Envelope::decode(&line).expect("server emitted invalid envelope")
    }

    #[tokio::test]
    async fn test_join_replies_joined_first() {
        let hub = test_hub();
        let rid = mint_rid(&hub);
        let (a, mut rx) = connect(&hub, Transport::Ws);

        join(&hub, &a, &rid);

        let joined = next(&mut rx).await;
        assert_eq!(joined.ty, msg::JOINED);
        let cid = joined.cid.clone().unwrap();
        assert!(cid.starts_with("C-"));
        let payload = joined.payload.unwrap();
        assert_eq!(payload["hostCid"], cid);
        assert_eq!(payload["turnTokenTTLMs"], 1_800_000);
        assert!(!payload["reconnectToken"].as_str().unwrap().is_empty());

        let state = next(&mut rx).await;
        assert_eq!(state.ty, msg::ROOM_STATE);
    }

    #[tokio::test]
    async fn test_invalid_room_id_rejected() {
        let hub = test_hub();
        let (a, mut rx) = connect(&hub, Transport::Ws);

        join(&hub, &a, "AAAAAAAAAAAAAAAAAAAAAAAAAAA");

        let err = next(&mut rx).await;
        assert_eq!(err.ty, msg::ERROR);
        assert_eq!(err.payload.unwrap()["code"], "INVALID_ROOM_ID");
        assert_eq!(a.rid(), "");
    }

    #[tokio::test]
    async fn test_third_join_gets_room_full() {
        let hub = test_hub();
        let rid = mint_rid(&hub);
        let (a, _rx_a) = connect(&hub, Transport::Ws);
        let (b, _rx_b) = connect(&hub, Transport::Ws);
        let (c, mut rx_c) = connect(&hub, Transport::Ws);
        join(&hub, &a, &rid);
        join(&hub, &b, &rid);

        join(&hub, &c, &rid);

        let err = next(&mut rx_c).await;
        assert_eq!(err.ty, msg::ERROR);
        assert_eq!(err.payload.unwrap()["code"], "ROOM_FULL");
        assert_eq!(hub.participant_count(&rid), 2);
        assert_eq!(c.rid(), "");
    }

    #[tokio::test]
    async fn test_unsupported_version_rejected() {
        let hub = test_hub();
        let (a, mut rx) = connect(&hub, Transport::Ws);

        let mut env = Envelope::event(msg::PING);
        env.v = 2;
        hub.dispatch(&a, env);

        let err = next(&mut rx).await;
        assert_eq!(err.payload.unwrap()["code"], "UNSUPPORTED_VERSION");
    }

    #[tokio::test]
    async fn test_unknown_type_ignored() {
        let hub = test_hub();
        let (a, mut rx) = connect(&hub, Transport::Ws);

        hub.dispatch(&a, Envelope::event("future_thing"));
        hub.dispatch(&a, Envelope::event(msg::PING));

        // Only the pong arrives; the unknown type produced nothing.
        let pong = next(&mut rx).await;
        assert_eq!(pong.ty, msg::PONG);
    }

    #[tokio::test]
    async fn test_leave_deletes_empty_room() {
        let hub = test_hub();
        let rid = mint_rid(&hub);
        let (a, _rx) = connect(&hub, Transport::Ws);
        join(&hub, &a, &rid);
        assert_eq!(hub.participant_count(&rid), 1);

        hub.dispatch(&a, Envelope::event(msg::LEAVE));

        assert!(hub.room(&rid).is_none());
        assert_eq!(a.rid(), "");
        // The transport stays registered
        assert!(hub.session(&a.sid).is_some());
    }

    #[tokio::test]
    async fn test_end_room_requires_host() {
        let hub = test_hub();
        let rid = mint_rid(&hub);
        let (a, _rx_a) = connect(&hub, Transport::Ws);
        let (b, mut rx_b) = connect(&hub, Transport::Ws);
        join(&hub, &a, &rid);
        join(&hub, &b, &rid);
        // drain b's queue: joined + room_state
        let _ = next(&mut rx_b).await;
        let _ = next(&mut rx_b).await;

        hub.dispatch(&b, Envelope::event(msg::END_ROOM));

        let err = next(&mut rx_b).await;
        assert_eq!(err.payload.unwrap()["code"], "NOT_HOST");
        assert_eq!(hub.participant_count(&rid), 2);
    }

    #[tokio::test]
    async fn test_relay_requires_room() {
        let hub = test_hub();
        let (a, mut rx) = connect(&hub, Transport::Ws);

        hub.dispatch(
            &a,
            Envelope::event(msg::OFFER).with_payload(serde_json::json!({"sdp": "v=0"})),
        );

        let err = next(&mut rx).await;
        assert_eq!(err.payload.unwrap()["code"], "NOT_IN_ROOM");
    }

    #[tokio::test]
    async fn test_relay_to_unknown_cid_is_bad_request() {
        let hub = test_hub();
        let rid = mint_rid(&hub);
        let (a, mut rx_a) = connect(&hub, Transport::Ws);
        let (b, _rx_b) = connect(&hub, Transport::Ws);
        join(&hub, &a, &rid);
        join(&hub, &b, &rid);
        let _ = next(&mut rx_a).await; // joined
        let _ = next(&mut rx_a).await; // room_state (a joining)
        let _ = next(&mut rx_a).await; // room_state (b joining)

        let mut env = Envelope::event(msg::ICE)
            .with_rid(&rid)
            .with_payload(serde_json::json!({"candidate": "c"}));
        env.to = Some("C-0000000000000000".to_string());
        hub.dispatch(&a, env);

        let err = next(&mut rx_a).await;
        assert_eq!(err.payload.unwrap()["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_watch_rooms_counts_and_updates() {
        let hub = test_hub();
        let rid = mint_rid(&hub);
        let (a, _rx_a) = connect(&hub, Transport::Ws);
        let (w, mut rx_w) = connect(&hub, Transport::Ws);
        join(&hub, &a, &rid);

        hub.dispatch(
            &w,
            Envelope::event(msg::WATCH_ROOMS)
                .with_payload(serde_json::json!({"rids": [rid, "bogus"]})),
        );

        let statuses = next(&mut rx_w).await;
        assert_eq!(statuses.ty, msg::ROOM_STATUSES);
        let payload = statuses.payload.unwrap();
        assert_eq!(payload[&rid], 1);
        // Invalid rid skipped silently
        assert!(payload.get("bogus").is_none());

        hub.dispatch(&a, Envelope::event(msg::LEAVE));
        let update = next(&mut rx_w).await;
        assert_eq!(update.ty, msg::ROOM_STATUS_UPDATE);
        let payload = update.payload.unwrap();
        assert_eq!(payload["rid"], rid);
        assert_eq!(payload["count"], 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_leaves_room() {
        let hub = test_hub();
        let rid = mint_rid(&hub);
        let (a, _rx_a) = connect(&hub, Transport::Ws);
        let (b, mut rx_b) = connect(&hub, Transport::Ws);
        join(&hub, &a, &rid);
        join(&hub, &b, &rid);
        let _ = next(&mut rx_b).await;
        let _ = next(&mut rx_b).await;

        hub.disconnect(&a, DisconnectReason::TransportClose);
        hub.disconnect(&a, DisconnectReason::TransportClose);

        assert!(hub.session(&a.sid).is_none());
        assert_eq!(hub.participant_count(&rid), 1);
        let state = next(&mut rx_b).await;
        assert_eq!(state.ty, msg::ROOM_STATE);
        let payload = state.payload.unwrap();
        assert_eq!(payload["participants"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_sse_session_reaped() {
        let hub = test_hub();
        let (a, _rx) = connect(&hub, Transport::Sse);
        // Fresh session survives a pass
        hub.reap_stale_sse();
        assert!(hub.session(&a.sid).is_some());
    }
}
