//! Token error types

use thiserror::Error;

/// Errors from minting or validating identifiers and tokens
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The required secret is empty or missing
    #[error("secret is not configured")]
    NotConfigured,
    /// Room ID failed structural or tag validation
    #[error("invalid room id")]
    InvalidRoomId,
    /// Reconnect token did not verify against (cid, rid)
    #[error("invalid reconnect token")]
    InvalidReconnectToken,
}
