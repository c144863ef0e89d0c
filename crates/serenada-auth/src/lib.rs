//! Token and identifier primitives for the Serenada signaling core
//!
//! Everything here is stateless: room IDs carry their own HMAC tag,
//! reconnect tokens are recomputable from `(cid, rid)`, and TURN REST
//! credentials are derived on demand from the shared TURN secret. The
//! server keeps no identifier database.

#![forbid(unsafe_code)]

pub mod ct;
mod error;
pub mod reconnect;
pub mod room_id;
pub mod turn;

pub use ct::ct_eq;
pub use error::AuthError;

/// Result type for token operations
pub type Result<T> = std::result::Result<T, AuthError>;
