//! Protocol error taxonomy
//!
//! [`ErrorCode`] is the wire-visible code set carried in `error` events;
//! [`ProtocolError`] covers local decode failures that never reach the
//! peer as structured errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Frame-level decode errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeded [`crate::MAX_FRAME_BYTES`]
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
    /// Frame body was empty or whitespace
    #[error("empty frame")]
    EmptyFrame,
    /// JSON did not match the envelope schema
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Error codes emitted to clients in `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    UnsupportedVersion,
    InvalidRoomId,
    ServerNotConfigured,
    RoomFull,
    InvalidReconnectToken,
    NotInRoom,
    NotHost,
    TurnRefreshFailed,
}

impl ErrorCode {
    /// Wire representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::UnsupportedVersion => "UNSUPPORTED_VERSION",
            Self::InvalidRoomId => "INVALID_ROOM_ID",
            Self::ServerNotConfigured => "SERVER_NOT_CONFIGURED",
            Self::RoomFull => "ROOM_FULL",
            Self::InvalidReconnectToken => "INVALID_RECONNECT_TOKEN",
            Self::NotInRoom => "NOT_IN_ROOM",
            Self::NotHost => "NOT_HOST",
            Self::TurnRefreshFailed => "TURN_REFRESH_FAILED",
        }
    }

    /// Default human-readable message for the code
    pub fn message(self) -> &'static str {
        match self {
            Self::BadRequest => "malformed request",
            Self::UnsupportedVersion => "unsupported protocol version",
            Self::InvalidRoomId => "room id failed validation",
            Self::ServerNotConfigured => "server secret not configured",
            Self::RoomFull => "room already has two participants",
            Self::InvalidReconnectToken => "reconnect token does not match",
            Self::NotInRoom => "session is not in a room",
            Self::NotHost => "only the host may do that",
            Self::TurnRefreshFailed => "could not issue TURN credentials",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::InvalidReconnectToken).unwrap();
        assert_eq!(json, r#""INVALID_RECONNECT_TOKEN""#);
    }

    #[test]
    fn test_as_str_matches_serde() {
        for code in [
            ErrorCode::BadRequest,
            ErrorCode::UnsupportedVersion,
            ErrorCode::InvalidRoomId,
            ErrorCode::ServerNotConfigured,
            ErrorCode::RoomFull,
            ErrorCode::InvalidReconnectToken,
            ErrorCode::NotInRoom,
            ErrorCode::NotHost,
            ErrorCode::TurnRefreshFailed,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }
}
