//! HTTP surface and router assembly
//!
//! Routes:
//! - `GET /ws` — WebSocket upgrade
//! - `GET|POST /sse` — event-stream downlink / envelope uplink
//! - `GET|POST /api/room-id` — mint a room ID (GET doubles as liveness)
//! - `GET /api/turn-credentials` — derive TURN REST credentials
//! - `POST /api/diagnostic-token` — one-shot TURN token for diagnostics
//! - `GET /api/internal/stats` — token-gated metrics snapshot
//! - `GET /health` — load-balancer probe

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use serenada_auth::{ct_eq, room_id};
use serenada_protocol::MAX_FRAME_BYTES;

use crate::clock::unix_secs;
use crate::config::{ServerConfig, TURN_CALL_TTL, TURN_DIAGNOSTIC_CRED_TTL};
use crate::hub::Hub;
use crate::metrics::Metrics;
use crate::rate_limit::RateLimiter;
use crate::transport::{sse, ws};
use crate::turn::TurnTokenStore;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<ServerConfig>,
    pub hub: Arc<Hub>,
    pub metrics: Arc<Metrics>,
    pub limiter: Arc<RateLimiter>,
    pub turn_calls: Arc<TurnTokenStore>,
    pub turn_diagnostics: Arc<TurnTokenStore>,
}

impl AppState {
    pub fn new(cfg: ServerConfig) -> Self {
        let cfg = Arc::new(cfg);
        let metrics = Arc::new(Metrics::new());
        let turn_calls = Arc::new(TurnTokenStore::call_store());
        let turn_diagnostics = Arc::new(TurnTokenStore::diagnostic_store());
        let limiter = Arc::new(RateLimiter::new(
            cfg.rate_limit_burst,
            cfg.rate_limit_per_sec,
            &cfg.rate_limit_bypass_ips,
        ));
        let hub = Arc::new(Hub::new(
            Arc::clone(&cfg),
            Arc::clone(&metrics),
            Arc::clone(&turn_calls),
        ));
        Self {
            cfg,
            hub,
            metrics,
            limiter,
            turn_calls,
            turn_diagnostics,
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.cfg);
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/sse", get(sse::sse_get).post(sse::sse_post))
        .route("/api/room-id", get(mint_room_id).post(mint_room_id))
        .route("/api/turn-credentials", get(turn_credentials))
        .route("/api/diagnostic-token", post(diagnostic_token))
        .route("/api/internal/stats", get(internal_stats))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_FRAME_BYTES))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(cfg: &ServerConfig) -> CorsLayer {
    if cfg.allowed_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = cfg
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring unparseable allowed origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Resolve the client IP, honoring proxy headers only when configured.
pub fn client_ip(headers: &HeaderMap, addr: SocketAddr, trust_proxy: bool) -> IpAddr {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok());
        if let Some(ip) = forwarded {
            return ip;
        }
        let real = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        if let Some(ip) = real {
            return ip;
        }
    }
    addr.ip()
}

async fn health() -> &'static str {
    "ok"
}

/// `GET|POST /api/room-id`
async fn mint_room_id(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let ip = client_ip(&headers, addr, state.cfg.trust_proxy);
    if !state.limiter.allow(ip) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    match room_id::mint(&state.cfg.room_id_secret, &state.cfg.room_id_env) {
        Ok(id) => Json(json!({ "roomId": id })).into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "SERVER_NOT_CONFIGURED" })),
        )
            .into_response(),
    }
}

/// `GET /api/turn-credentials`
async fn turn_credentials(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let ip = client_ip(&headers, addr, state.cfg.trust_proxy);
    if !state.limiter.allow(ip) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    let token = headers
        .get("x-turn-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if token.is_empty() {
        return StatusCode::FORBIDDEN.into_response();
    }

    // Call tokens get the full TURN TTL; a diagnostic token is consumed
    // and only buys a 5-second credential.
    let ttl = if state.turn_calls.validate(token, ip) {
        TURN_CALL_TTL
    } else if state.turn_diagnostics.validate(token, ip) {
        TURN_DIAGNOSTIC_CRED_TTL
    } else {
        return StatusCode::FORBIDDEN.into_response();
    };

    let Some(creds) =
        serenada_auth::turn::rest_credentials(&state.cfg.turn_secret, ip, ttl, unix_secs())
    else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "SERVER_NOT_CONFIGURED" })),
        )
            .into_response();
    };

    Json(json!({
        "username": creds.username,
        "password": creds.password,
        "uris": turn_uris(&state.cfg),
        "ttl": ttl.as_secs(),
    }))
    .into_response()
}

fn turn_uris(cfg: &ServerConfig) -> Vec<String> {
    let mut uris = Vec::new();
    if !cfg.stun_host.is_empty() {
        uris.push(format!("stun:{}", cfg.stun_host));
    }
    if !cfg.turn_host.is_empty() {
        uris.push(format!("turn:{}", cfg.turn_host));
        uris.push(format!("turns:{}:443?transport=tcp", cfg.turn_host));
    }
    uris
}

/// `POST /api/diagnostic-token`
async fn diagnostic_token(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let ip = client_ip(&headers, addr, state.cfg.trust_proxy);
    if !state.limiter.allow(ip) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    let issued = state.turn_diagnostics.issue(ip);
    Json(json!({ "token": issued.token, "expires": issued.expires_at })).into_response()
}

/// `GET /api/internal/stats`
async fn internal_stats(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !state.cfg.enable_internal_stats {
        return StatusCode::NOT_FOUND.into_response();
    }
    let presented = headers
        .get("x-internal-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if state.cfg.internal_stats_token.is_empty()
        || !ct_eq(
            presented.as_bytes(),
            state.cfg.internal_stats_token.as_bytes(),
        )
    {
        return StatusCode::FORBIDDEN.into_response();
    }
    Json(state.metrics.snapshot()).into_response()
}
