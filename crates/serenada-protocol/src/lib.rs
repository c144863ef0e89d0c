//! Serenada signaling wire protocol
//!
//! Defines the JSON envelope shared by both transports (WebSocket text
//! frames and SSE `data:` lines / POST bodies), the request and event
//! type names, typed payloads, and the protocol error taxonomy.

#![forbid(unsafe_code)]

pub mod envelope;
mod error;
pub mod payload;

pub use envelope::{Envelope, MAX_FRAME_BYTES, PROTOCOL_VERSION};
pub use error::{ErrorCode, ProtocolError};

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Message type names, exactly as they appear on the wire.
pub mod msg {
    // Requests accepted from clients
    pub const JOIN: &str = "join";
    pub const LEAVE: &str = "leave";
    pub const END_ROOM: &str = "end_room";
    pub const TURN_REFRESH: &str = "turn-refresh";
    pub const WATCH_ROOMS: &str = "watch_rooms";
    pub const PING: &str = "ping";
    pub const OFFER: &str = "offer";
    pub const ANSWER: &str = "answer";
    pub const ICE: &str = "ice";

    // Events emitted by the server
    pub const JOINED: &str = "joined";
    pub const PONG: &str = "pong";
    pub const ROOM_STATE: &str = "room_state";
    pub const ROOM_ENDED: &str = "room_ended";
    pub const TURN_REFRESHED: &str = "turn-refreshed";
    pub const ROOM_STATUSES: &str = "room_statuses";
    pub const ROOM_STATUS_UPDATE: &str = "room_status_update";
    pub const ERROR: &str = "error";
}
