//! The JSON envelope carried by every frame
//!
//! ```json
//! { "v": 1, "type": "offer", "rid": "...", "to": "...", "payload": {} }
//! ```
//!
//! `v` must equal [`PROTOCOL_VERSION`]. `type` stays a free string so the
//! server can log-and-ignore unknown types instead of failing the frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ProtocolError, Result};

/// Current (and only) protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum inbound frame size on either transport (64 KiB)
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// One signaling frame, either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version; must be 1
    pub v: u32,
    /// Message type name (see [`crate::msg`])
    #[serde(rename = "type")]
    pub ty: String,
    /// Room ID, when the message concerns a room
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    /// Session ID (server-assigned, echoed on some events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Client ID (server-assigned on join)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    /// Target CID for directed relay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Free-form payload object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    /// Build an event envelope with the current version.
    pub fn event(ty: &str) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            ty: ty.to_string(),
            rid: None,
            sid: None,
            cid: None,
            to: None,
            payload: None,
        }
    }

    /// Attach a room ID.
    pub fn with_rid(mut self, rid: impl Into<String>) -> Self {
        self.rid = Some(rid.into());
        self
    }

    /// Attach a client ID.
    pub fn with_cid(mut self, cid: impl Into<String>) -> Self {
        self.cid = Some(cid.into());
        self
    }

    /// Attach a payload; serialization failures are a programming error
    /// on the sending side, so this takes an already-built `Value`.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Parse one inbound frame, enforcing the size cap before touching
    /// the JSON parser.
    pub fn decode(frame: &str) -> Result<Self> {
        if frame.len() > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge(frame.len()));
        }
        if frame.trim().is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }
        serde_json::from_str(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Serialize for the outbound queue. The envelope is plain data; the
    /// only failure mode is a non-serializable payload, which cannot be
    /// constructed through this crate's API.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Payload as an object reference, if present and actually an object.
    pub fn payload_object(&self) -> Option<&serde_json::Map<String, Value>> {
        self.payload.as_ref().and_then(Value::as_object)
    }
}
