//! SSE transport
//!
//! `GET /sse?sid=` opens the event-stream downlink; `POST /sse?sid=`
//! delivers one envelope uplink. SSE has no reliable close opcode, so a
//! dropped GET starts a 5-second grace window during which a reconnect
//! with the same sid silently replaces the session; only after the
//! window does the hub perform the full disconnect.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::debug;

use serenada_protocol::Envelope;

use crate::config::{PING_INTERVAL, SSE_GRACE};
use crate::http::{client_ip, AppState};
use crate::hub::Hub;
use crate::session::{new_sid, ClientSession, Transport};

#[derive(Debug, Deserialize)]
pub struct SseParams {
    #[serde(default)]
    pub sid: Option<String>,
}

/// `GET /sse?sid=<optional>` — open (or re-open) the event stream.
pub async fn sse_get(
    State(state): State<AppState>,
    Query(params): Query<SseParams>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    state.metrics.conn_attempt(Transport::Sse);

    let ip = client_ip(&headers, addr, state.cfg.trust_proxy);
    if !state.limiter.allow(ip) {
        state.metrics.conn_failure(Transport::Sse);
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    // Reuse the requested sid unless a WebSocket session owns it.
    let sid = match params.sid.filter(|s| !s.is_empty()) {
        Some(requested) => match state.hub.session(&requested) {
            Some(existing) if existing.transport == Transport::Ws => new_sid(),
            _ => requested,
        },
        None => new_sid(),
    };

    let (session, rx) = ClientSession::new(sid, ip, Transport::Sse, Arc::clone(&state.metrics));
    state.hub.register_replacing(&session);
    state.metrics.conn_success(Transport::Sse);
    debug!(sid = %session.sid, %ip, "sse client connected");

    let stream = event_stream(Arc::clone(&state.hub), session, rx);
    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(PING_INTERVAL).text("ping"))
        .into_response();

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

/// `POST /sse?sid=<required>` — one envelope uplink.
pub async fn sse_post(
    State(state): State<AppState>,
    Query(params): Query<SseParams>,
    body: String,
) -> Response {
    let Some(sid) = params.sid.filter(|s| !s.is_empty()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Some(session) = state.hub.session(&sid) else {
        return StatusCode::GONE.into_response();
    };
    if session.transport != Transport::Sse {
        return StatusCode::GONE.into_response();
    }

    match Envelope::decode(&body) {
        Ok(env) => {
            session.touch();
            state.hub.dispatch(&session, env);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            debug!(sid = %session.sid, %err, "rejecting sse uplink body");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}

/// Schedules the grace-window disconnect when the GET stream drops.
struct GraceGuard {
    hub: Arc<Hub>,
    session: Arc<ClientSession>,
}

impl Drop for GraceGuard {
    fn drop(&mut self) {
        let hub = Arc::clone(&self.hub);
        let session = Arc::clone(&self.session);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                tokio::time::sleep(SSE_GRACE).await;
                hub.sse_grace_expired(&session);
            });
        }
    }
}

/// `: ready`, then one `data:` event per outbound frame. Ends when the
/// session is cancelled; dropping the stream (client gone) arms the
/// grace guard.
fn event_stream(
    hub: Arc<Hub>,
    session: Arc<ClientSession>,
    rx: mpsc::Receiver<String>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let token = session.cancelled();
    let guard = GraceGuard { hub, session };

    let ready = futures::stream::once(async { Ok(Event::default().comment("ready")) });
    let frames = futures::stream::unfold(
        (rx, token, guard),
        |(mut rx, token, guard)| async move {
            tokio::select! {
                _ = token.cancelled() => None,
                maybe = rx.recv() => maybe.map(|line| {
                    (Ok(Event::default().data(line)), (rx, token, guard))
                }),
            }
        },
    );
    ready.chain(frames)
}
