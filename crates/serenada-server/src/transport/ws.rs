//! WebSocket transport
//!
//! One text frame per envelope, 64 KiB cap. Each connection runs a
//! reader and a writer concurrently; the writer also owns liveness —
//! it emits a protocol-level `ping` every 12 s (control-frame pings are
//! invisible to browser clients) and force-closes after two silent
//! intervals.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use serenada_protocol::payload::error_envelope;
use serenada_protocol::{msg, Envelope, ErrorCode, MAX_FRAME_BYTES};

use crate::config::{PING_INTERVAL, PONG_TIMEOUT_INTERVALS, WS_WRITE_DEADLINE};
use crate::http::{client_ip, AppState};
use crate::metrics::DisconnectReason;
use crate::session::{new_sid, ClientSession, Transport};

/// `GET /ws` — upgrade after rate-limit and origin checks.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    state.metrics.conn_attempt(Transport::Ws);

    let ip = client_ip(&headers, addr, state.cfg.trust_proxy);
    if !state.limiter.allow(ip) {
        state.metrics.conn_failure(Transport::Ws);
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !state.cfg.origin_allowed(origin) {
        state.metrics.conn_failure(Transport::Ws);
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_ws_client(socket, state, ip))
        .into_response()
}

async fn handle_ws_client(socket: WebSocket, state: AppState, ip: IpAddr) {
    let (session, rx) = ClientSession::new(new_sid(), ip, Transport::Ws, Arc::clone(&state.metrics));
    state.hub.register(&session);
    state.metrics.conn_success(Transport::Ws);
    debug!(sid = %session.sid, %ip, "websocket client connected");

    let (sink, stream) = socket.split();
    let reason = tokio::select! {
        r = read_loop(stream, &state, &session) => r,
        r = write_loop(sink, rx, &session) => r,
    };
    state.hub.disconnect(&session, reason);
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    session: &Arc<ClientSession>,
) -> DisconnectReason {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                session.touch();
                match Envelope::decode(text.as_str()) {
                    Ok(env) => state.hub.dispatch(session, env),
                    Err(err) => {
                        debug!(sid = %session.sid, %err, "malformed frame");
                        session.enqueue(&error_envelope(ErrorCode::BadRequest, None));
                    }
                }
            }
            // Control frames still prove liveness
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => session.touch(),
            Ok(Message::Binary(_)) => {
                debug!(sid = %session.sid, "ignoring binary frame");
            }
            Ok(Message::Close(_)) | Err(_) => break,
        }
    }
    DisconnectReason::TransportClose
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
    session: &Arc<ClientSession>,
) -> DisconnectReason {
    let pong_budget_ms = PING_INTERVAL.as_millis() as u64 * PONG_TIMEOUT_INTERVALS as u64;
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let cancelled = session.cancelled();

    loop {
        tokio::select! {
            _ = cancelled.cancelled() => return DisconnectReason::TransportClose,
            maybe = rx.recv() => {
                let Some(line) = maybe else {
                    return DisconnectReason::TransportClose;
                };
                let send = sink.send(Message::Text(line.into()));
                match tokio::time::timeout(WS_WRITE_DEADLINE, send).await {
                    Ok(Ok(())) => {}
                    _ => return DisconnectReason::TransportClose,
                }
            }
            _ = ping.tick() => {
                if session.idle_ms() > pong_budget_ms {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::POLICY,
                            reason: "pong_timeout".into(),
                        })))
                        .await;
                    return DisconnectReason::PongTimeout;
                }
                session.enqueue(&Envelope::event(msg::PING));
            }
        }
    }
}
