//! HTTP surface tests via `tower::ServiceExt::oneshot`

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;
use zeroize::Zeroizing;

use serenada_server::config::ServerConfig;
use serenada_server::http::{router, AppState};
use serenada_server::session::{new_sid, ClientSession, Transport};

fn test_config() -> ServerConfig {
    ServerConfig {
        room_id_secret: Zeroizing::new("deadbeef".into()),
        room_id_env: "dev".into(),
        reconnect_secret: Zeroizing::new("reconnect".into()),
        turn_secret: Zeroizing::new("turn-secret".into()),
        turn_token_secret: Zeroizing::new("turn-secret".into()),
        stun_host: "stun.serenada.app".into(),
        turn_host: "turn.serenada.app".into(),
        allowed_origins: vec![],
        trust_proxy: false,
        rate_limit_bypass_ips: String::new(),
        rate_limit_burst: 100.0,
        rate_limit_per_sec: 100.0,
        enable_internal_stats: false,
        internal_stats_token: Zeroizing::new(String::new()),
    }
}

fn request(method: &str, uri: &str) -> Request<Body> {
    let addr: SocketAddr = "192.0.2.10:40000".parse().unwrap();
    Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(addr))
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let app = router(AppState::new(test_config()));
    let response = app.oneshot(request("GET", "/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn room_id_mint_roundtrips() {
    let app = router(AppState::new(test_config()));
    let response = app.oneshot(request("POST", "/api/room-id")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let room_id = body["roomId"].as_str().unwrap();
    assert_eq!(room_id.len(), 27);
    assert!(serenada_auth::room_id::validate("deadbeef", "dev", room_id).is_ok());
}

#[tokio::test]
async fn room_id_without_secret_is_server_error() {
    let mut cfg = test_config();
    cfg.room_id_secret = Zeroizing::new(String::new());
    let app = router(AppState::new(cfg));

    let response = app.oneshot(request("POST", "/api/room-id")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "SERVER_NOT_CONFIGURED");
}

#[tokio::test]
async fn room_id_rate_limited() {
    let mut cfg = test_config();
    cfg.rate_limit_burst = 2.0;
    cfg.rate_limit_per_sec = 0.0;
    let app = router(AppState::new(cfg));

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(request("POST", "/api/room-id"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app.oneshot(request("POST", "/api/room-id")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn sse_post_unknown_sid_is_gone() {
    let app = router(AppState::new(test_config()));
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sse?sid=00000000000000000000000000000000")
                .extension(ConnectInfo("192.0.2.10:40000".parse::<SocketAddr>().unwrap()))
                .body(Body::from(r#"{"v":1,"type":"ping"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn sse_post_delivers_to_registered_session() {
    let state = AppState::new(test_config());
    let (session, mut rx) = ClientSession::new(
        new_sid(),
        "192.0.2.10".parse().unwrap(),
        Transport::Sse,
        Arc::clone(&state.metrics),
    );
    state.hub.register(&session);
    let app = router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/sse?sid={}", session.sid))
                .extension(ConnectInfo("192.0.2.10:40000".parse::<SocketAddr>().unwrap()))
                .body(Body::from(r#"{"v":1,"type":"ping"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let line = rx.recv().await.unwrap();
    assert!(line.contains("pong"));
}

#[tokio::test]
async fn sse_post_rejects_bad_body() {
    let state = AppState::new(test_config());
    let (session, _rx) = ClientSession::new(
        new_sid(),
        "192.0.2.10".parse().unwrap(),
        Transport::Sse,
        Arc::clone(&state.metrics),
    );
    state.hub.register(&session);
    let app = router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/sse?sid={}", session.sid))
                .extension(ConnectInfo("192.0.2.10:40000".parse::<SocketAddr>().unwrap()))
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn internal_stats_hidden_when_disabled() {
    let app = router(AppState::new(test_config()));
    let response = app
        .oneshot(request("GET", "/api/internal/stats"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn internal_stats_gated_by_token() {
    let mut cfg = test_config();
    cfg.enable_internal_stats = true;
    cfg.internal_stats_token = Zeroizing::new("stats-token".into());
    let app = router(AppState::new(cfg));

    let response = app
        .clone()
        .oneshot(request("GET", "/api/internal/stats"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let mut req = request("GET", "/api/internal/stats");
    req.headers_mut()
        .insert("x-internal-token", "stats-token".parse().unwrap());
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert!(body["gauges"]["ws_clients"].is_i64());
    assert!(body["join_latency_ms"]["bounds"].is_array());
    assert!(body["runtime"]["uptime_secs"].is_u64());
}

#[tokio::test]
async fn diagnostic_token_buys_one_short_credential() {
    let app = router(AppState::new(test_config()));

    let response = app
        .clone()
        .oneshot(request("POST", "/api/diagnostic-token"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let token = body["token"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 32);

    let mut req = request("GET", "/api/turn-credentials");
    req.headers_mut()
        .insert("x-turn-token", token.parse().unwrap());
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["ttl"], 5);
    let username = body["username"].as_str().unwrap();
    assert!(username.ends_with(":192.0.2.10"));
    let uris: Vec<&str> = body["uris"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u.as_str().unwrap())
        .collect();
    assert!(uris.contains(&"stun:stun.serenada.app"));
    assert!(uris.contains(&"turn:turn.serenada.app"));
    assert!(uris.contains(&"turns:turn.serenada.app:443?transport=tcp"));

    // One-shot: the second fetch is refused
    let mut req = request("GET", "/api/turn-credentials");
    req.headers_mut()
        .insert("x-turn-token", token.parse().unwrap());
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn turn_credentials_without_token_refused() {
    let app = router(AppState::new(test_config()));
    let response = app
        .oneshot(request("GET", "/api/turn-credentials"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
