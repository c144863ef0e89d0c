//! Typed payloads for the structured messages
//!
//! Field names are part of the wire contract and are camelCase exactly as
//! clients send them; relay payloads (`offer`/`answer`/`ice`) stay opaque
//! JSON and are not modeled here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Envelope, ErrorCode};

/// Client capabilities advertised at join
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Whether the client supports trickle ICE
    #[serde(default, rename = "trickleIce")]
    pub trickle_ice: bool,
}

/// `join` request payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinPayload {
    /// Free-form device string, logged only
    #[serde(default)]
    pub device: Option<String>,
    /// Client capabilities
    #[serde(default)]
    pub capabilities: Option<Capabilities>,
    /// CID the client wants to reclaim
    #[serde(default, rename = "reconnectCid")]
    pub reconnect_cid: Option<String>,
    /// Token proving prior ownership of `reconnectCid` in this room
    #[serde(default, rename = "reconnectToken")]
    pub reconnect_token: Option<String>,
    /// Opaque push endpoint, stored nowhere by the core
    #[serde(default, rename = "pushEndpoint")]
    pub push_endpoint: Option<String>,
    /// Opaque snapshot correlation id
    #[serde(default, rename = "snapshotId")]
    pub snapshot_id: Option<String>,
}

/// One participant entry in `joined` / `room_state`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantInfo {
    /// Client ID
    pub cid: String,
    /// Join time, unix milliseconds
    #[serde(rename = "joinedAt")]
    pub joined_at: u64,
}

/// `joined` event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinedPayload {
    /// Current host CID
    #[serde(rename = "hostCid")]
    pub host_cid: String,
    /// All current participants, join order
    pub participants: Vec<ParticipantInfo>,
    /// Fresh TURN access token
    #[serde(rename = "turnToken")]
    pub turn_token: String,
    /// Absolute token expiry, unix seconds
    #[serde(rename = "turnTokenExpiresAt")]
    pub turn_token_expires_at: u64,
    /// Token lifetime in milliseconds
    #[serde(rename = "turnTokenTTLMs")]
    pub turn_token_ttl_ms: u64,
    /// Token for authenticated reconnection
    #[serde(rename = "reconnectToken")]
    pub reconnect_token: String,
}

/// `room_state` broadcast payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomStatePayload {
    /// Current host CID
    #[serde(rename = "hostCid")]
    pub host_cid: String,
    /// All current participants, join order
    pub participants: Vec<ParticipantInfo>,
}

/// `room_ended` event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomEndedPayload {
    /// CID that ended the room
    pub by: String,
    /// Always `host_ended` today
    pub reason: String,
}

/// `turn-refreshed` event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRefreshedPayload {
    #[serde(rename = "turnToken")]
    pub turn_token: String,
    #[serde(rename = "turnTokenExpiresAt")]
    pub turn_token_expires_at: u64,
    #[serde(rename = "turnTokenTTLMs")]
    pub turn_token_ttl_ms: u64,
}

/// `watch_rooms` request payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchRoomsPayload {
    /// Rooms to watch; invalid IDs are skipped silently
    #[serde(default)]
    pub rids: Vec<String>,
}

/// `room_status_update` event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomStatusUpdatePayload {
    /// Room the update concerns
    pub rid: String,
    /// Current participant count
    pub count: usize,
}

/// Build an `error` event envelope.
pub fn error_envelope(code: ErrorCode, rid: Option<&str>) -> Envelope {
    let mut env = Envelope::event(crate::msg::ERROR).with_payload(serde_json::json!({
        "code": code.as_str(),
        "message": code.message(),
    }));
    if let Some(rid) = rid {
        env.rid = Some(rid.to_string());
    }
    env
}

/// Extract a typed payload from an envelope, tolerating an absent payload
/// by falling back to `Default`.
pub fn parse_payload<T>(env: &Envelope) -> Option<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match &env.payload {
        None => Some(T::default()),
        Some(value @ Value::Object(_)) => serde_json::from_value(value.clone()).ok(),
        Some(_) => None,
    }
}
