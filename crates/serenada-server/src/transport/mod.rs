//! Client transports
//!
//! Two transports, one session contract: WebSocket carries frames both
//! ways on a single connection; SSE pairs a GET event-stream downlink
//! with `POST /sse?sid=` uplinks correlated by session id. Clients
//! prefer WebSocket and fall back to SSE on repeated failures.

pub mod sse;
pub mod ws;
