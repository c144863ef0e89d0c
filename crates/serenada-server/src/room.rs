//! Per-room state
//!
//! A room holds at most two participants and exactly one host while
//! non-empty. All mutation happens under the room's own mutex; the hub
//! acquires it only after releasing its registry lock.

use std::sync::{Arc, Mutex, MutexGuard};

use serenada_protocol::payload::{ParticipantInfo, RoomStatePayload};

use crate::session::ClientSession;

/// Hard participant cap for 1:1 calls
pub const ROOM_CAPACITY: usize = 2;

/// Errors from room mutation
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// Room already has two participants
    #[error("room is full")]
    Full,
}

/// One participant slot.
pub struct Participant {
    pub cid: String,
    pub joined_at_ms: u64,
    pub session: Arc<ClientSession>,
}

/// Mutable room state, guarded by [`Room::lock`].
#[derive(Default)]
pub struct RoomState {
    participants: Vec<Participant>,
    host_cid: String,
    deleted: bool,
}

impl RoomState {
    /// Whether this room instance was unregistered from the hub. A join
    /// that observes the tombstone must retry against a fresh instance.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Tombstone the instance; set only while it is being removed from
    /// the hub registry.
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    /// Insert a participant, electing it host if the seat is empty.
    pub fn insert(&mut self, participant: Participant) -> Result<(), RoomError> {
        if self.participants.len() >= ROOM_CAPACITY {
            return Err(RoomError::Full);
        }
        if self.host_cid.is_empty() {
            self.host_cid = participant.cid.clone();
        }
        self.participants.push(participant);
        Ok(())
    }

    /// Remove the participant owned by `sid`, reelecting the host if the
    /// host left. Returns the removed slot.
    pub fn remove_by_sid(&mut self, sid: &str) -> Option<Participant> {
        let idx = self.participants.iter().position(|p| p.session.sid == sid)?;
        let removed = self.participants.remove(idx);
        if removed.cid == self.host_cid {
            self.host_cid = self
                .participants
                .first()
                .map(|p| p.cid.clone())
                .unwrap_or_default();
        }
        Some(removed)
    }

    /// Remove the participant owning `cid` without touching the host
    /// seat. This is the ghost-eviction path: the evicted CID is about to
    /// be re-inserted by its reconnecting owner.
    pub fn remove_by_cid(&mut self, cid: &str) -> Option<Participant> {
        let idx = self.participants.iter().position(|p| p.cid == cid)?;
        Some(self.participants.remove(idx))
    }

    /// Drain every participant and tombstone the instance (room
    /// teardown); the caller unregisters it from the hub next.
    pub fn drain(&mut self) -> Vec<Participant> {
        self.host_cid.clear();
        self.deleted = true;
        std::mem::take(&mut self.participants)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn host_cid(&self) -> &str {
        &self.host_cid
    }

    pub fn contains_cid(&self, cid: &str) -> bool {
        self.participants.iter().any(|p| p.cid == cid)
    }

    /// Session of the participant owning `cid`.
    pub fn session_by_cid(&self, cid: &str) -> Option<Arc<ClientSession>> {
        self.participants
            .iter()
            .find(|p| p.cid == cid)
            .map(|p| Arc::clone(&p.session))
    }

    /// All participant sessions, join order.
    pub fn sessions(&self) -> Vec<Arc<ClientSession>> {
        self.participants
            .iter()
            .map(|p| Arc::clone(&p.session))
            .collect()
    }

    /// Sessions of everyone except `sid`.
    pub fn peer_sessions(&self, sid: &str) -> Vec<Arc<ClientSession>> {
        self.participants
            .iter()
            .filter(|p| p.session.sid != sid)
            .map(|p| Arc::clone(&p.session))
            .collect()
    }

    /// Swap the session backing an existing participant (same-sid SSE
    /// reconnect); membership and CID are untouched.
    pub fn replace_session(&mut self, sid: &str, session: Arc<ClientSession>) {
        if let Some(p) = self.participants.iter_mut().find(|p| p.session.sid == sid) {
            p.session = session;
        }
    }

    /// Wire-shaped view for `joined` and `room_state`.
    pub fn snapshot(&self) -> RoomStatePayload {
        RoomStatePayload {
            host_cid: self.host_cid.clone(),
            participants: self
                .participants
                .iter()
                .map(|p| ParticipantInfo {
                    cid: p.cid.clone(),
                    joined_at: p.joined_at_ms,
                })
                .collect(),
        }
    }
}

/// A room registered in the hub.
pub struct Room {
    pub rid: String,
    state: Mutex<RoomState>,
}

impl Room {
    pub fn new(rid: String) -> Self {
        Self {
            rid,
            state: Mutex::new(RoomState::default()),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().expect("room lock poisoned")
    }
}
