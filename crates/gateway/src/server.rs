//! Router assembly, background tasks and graceful shutdown. Grounded on the
//! teacher's `server.rs`: a CORS-wrapped, trace-layered `axum::serve` over a
//! `TcpListener`, a ctrl_c-driven shutdown spawn, and a handful of
//! always-running background loops — trimmed to the middleware tower-http
//! features this workspace actually pulls in (cors, trace,
//! sensitive-headers) rather than the teacher's full stack (compression,
//! panic-catching, request-id propagation) which nothing here needs yet.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::push_routes;
use crate::state::GatewayState;
use crate::ws;

/// How long the inactivity sweep waits between passes. Independent of the
/// ping interval — sockets can be active without pinging (e.g. steady
/// `client:message` traffic).
const INACTIVITY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Minutes of silence before a socket is force-disconnected.
const INACTIVITY_TIMEOUT_MINUTES: u64 = 5;

pub async fn run(state: Arc<GatewayState>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.server.bind_address, state.config.server.port).parse()?;

    let app = build_router(Arc::clone(&state));

    spawn_background_tasks(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gateway listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&state)))
        .await?;

    Ok(())
}

fn build_router(state: Arc<GatewayState>) -> Router {
    let cors = build_cors_layer(&state.config.server.cors_allow_origins);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .merge(push_routes::router(Arc::clone(&state)))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetSensitiveHeadersLayer::new([
            axum::http::header::AUTHORIZATION,
            axum::http::header::COOKIE,
        ]))
        .with_state(state)
}

fn build_cors_layer(allowed: &[String]) -> CorsLayer {
    if allowed.iter().any(|o| o == "*") {
        return CorsLayer::new().allow_origin(AllowOrigin::any()).allow_methods(tower_http::cors::Any);
    }
    let origins: Vec<_> = allowed.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new().allow_origin(origins).allow_methods(tower_http::cors::Any)
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "instanceId": state.instance.id(),
        "connections": state.socket_count().await,
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    // CSWSH protection: browsers always send Origin on a cross-origin
    // upgrade; non-browser clients typically omit it and are let through.
    if let Some(origin) = headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok()) {
        let host = headers.get(axum::http::header::HOST).and_then(|v| v.to_str().ok()).unwrap_or("");
        if !is_same_origin(origin, host) {
            warn!(origin, host, remote = %addr, "rejected cross-origin WebSocket upgrade");
            return (StatusCode::FORBIDDEN, "cross-origin WebSocket connections are not allowed").into_response();
        }
    }

    if !state.instance.can_accept_connections()
        || (state.load.is_connection_throttling() && state.socket_count().await >= state.load.max_connections_under_load())
    {
        warn!(remote = %addr, "rejecting connection: admission denied under load");
        return (StatusCode::SERVICE_UNAVAILABLE, "gateway at capacity").into_response();
    }

    ws.on_upgrade(move |socket| ws::handle_connection(socket, state, addr)).into_response()
}

fn is_same_origin(origin: &str, host: &str) -> bool {
    let origin_host = origin.split("://").nth(1).unwrap_or(origin).split('/').next().unwrap_or("");

    fn strip_port(h: &str) -> &str {
        if h.starts_with('[') {
            h.rsplit_once("]:").map_or(h, |(addr, _)| addr).trim_start_matches('[').trim_end_matches(']')
        } else {
            h.rsplit_once(':').map_or(h, |(addr, _)| addr)
        }
    }
    fn get_port(h: &str) -> Option<&str> {
        if h.starts_with('[') {
            h.rsplit_once("]:").map(|(_, p)| p)
        } else {
            h.rsplit_once(':').map(|(_, p)| p)
        }
    }

    let origin_port = get_port(origin_host);
    let host_port = get_port(host);
    let oh = strip_port(origin_host);
    let hh = strip_port(host);
    let is_loopback = |h: &str| matches!(h, "localhost" | "127.0.0.1" | "::1") || h.ends_with(".localhost");

    (oh == hh || (is_loopback(oh) && is_loopback(hh))) && origin_port == host_port
}

/// Background loops that run for the lifetime of the process: load
/// sampling, instance heartbeat, inactivity sweep, and the shared-state
/// subscriber that replays remote envelopes onto local sockets.
fn spawn_background_tasks(state: Arc<GatewayState>) {
    Arc::clone(&state.load).start();
    Arc::clone(&state.instance).start_heartbeat();

    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(INACTIVITY_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let removed = state.registry.disconnect_inactive(INACTIVITY_TIMEOUT_MINUTES).await;
                if !removed.is_empty() {
                    info!(count = removed.len(), "swept inactive connections");
                    for socket_id in &removed {
                        state.rooms.leave_all_rooms(socket_id).await;
                        state.remove_socket(socket_id).await;
                        state.request_close(socket_id).await;
                    }
                }
            }
        });
    }

    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            subscribe_loop(state).await;
        });
    }
}

/// Replay remote envelopes from the shared broadcast/direct channels onto
/// this instance's local sockets (spec §4.E).
async fn subscribe_loop(state: Arc<GatewayState>) {
    let own_id = state.instance.id().to_string();
    let mut rx = state.shared_state.subscribe(&own_id);
    while let Some(envelope) = rx.recv().await {
        apply_remote_envelope(&state, &own_id, envelope).await;
    }
}

async fn apply_remote_envelope(state: &Arc<GatewayState>, own_id: &str, envelope: gateway_shared_state::Envelope) {
    use gateway_shared_state::Envelope;

    match envelope {
        Envelope::Broadcast { room, payload, origin } => {
            if origin == own_id {
                return;
            }
            let (event, inner) = unwrap_event_payload(payload);
            let members = state.rooms.broadcast_to_room(&room).await;
            crate::broadcast::deliver_to_sockets(state, &members, &event, inner).await;
        },
        Envelope::CrossInstance { event, payload, origin } => {
            if origin == own_id {
                return;
            }
            if event == crate::push::CROSS_INSTANCE_PUSH_USER {
                let Some(obj) = payload.as_object() else { return };
                let user_id = obj.get("userId").and_then(|v| v.as_str()).unwrap_or_default();
                let inner_event = obj.get("event").and_then(|v| v.as_str()).unwrap_or("message");
                let inner_payload = obj.get("payload").cloned().unwrap_or(serde_json::Value::Null);
                let sockets = state.registry.get_sockets_for_user(user_id).await;
                crate::broadcast::deliver_to_sockets(state, &sockets, inner_event, inner_payload).await;
            } else {
                let sockets = state.all_socket_ids().await;
                crate::broadcast::deliver_to_sockets(state, &sockets, &event, payload).await;
            }
        },
        Envelope::Direct { socket_id, payload } => {
            let (event, inner) = unwrap_event_payload(payload);
            crate::broadcast::deliver_to_sockets(state, &[socket_id], &event, inner).await;
        },
        Envelope::Disconnect { socket_id, reason } => {
            if state.registry.contains(&socket_id).await {
                info!(socket_id, reason, "force-closing socket on remote request");
                state.request_close(&socket_id).await;
            }
        },
        Envelope::Join { socket_id, room } => {
            let members = state.rooms.broadcast_to_room(&room).await;
            crate::broadcast::deliver_to_sockets(state, &members, "user_joined", serde_json::json!({ "socketId": socket_id, "room": room })).await;
        },
        Envelope::Leave { socket_id, room } => {
            let members = state.rooms.broadcast_to_room(&room).await;
            crate::broadcast::deliver_to_sockets(state, &members, "user_left", serde_json::json!({ "socketId": socket_id, "room": room })).await;
        },
    }
}

fn unwrap_event_payload(payload: serde_json::Value) -> (String, serde_json::Value) {
    match payload.as_object() {
        Some(obj) if obj.contains_key("event") => (
            obj.get("event").and_then(|v| v.as_str()).unwrap_or("message").to_string(),
            obj.get("payload").cloned().unwrap_or(serde_json::Value::Null),
        ),
        _ => ("message".to_string(), payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_origin_matches_host_and_port() {
        assert!(is_same_origin("https://gateway.example.com:8443", "gateway.example.com:8443"));
    }

    #[test]
    fn different_port_is_cross_origin() {
        assert!(!is_same_origin("https://gateway.example.com:8443", "gateway.example.com:9000"));
    }

    #[test]
    fn different_host_is_cross_origin() {
        assert!(!is_same_origin("https://evil.example.com", "gateway.example.com"));
    }

    #[test]
    fn loopback_variants_are_treated_as_same_origin() {
        assert!(is_same_origin("http://localhost:3000", "127.0.0.1:3000"));
    }

    #[test]
    fn ipv6_host_port_is_parsed() {
        assert!(is_same_origin("http://[::1]:8080", "[::1]:8080"));
    }

    #[test]
    fn unwrap_event_payload_splits_envelope_shape() {
        let (event, inner) = unwrap_event_payload(serde_json::json!({ "event": "chat:message", "payload": { "text": "hi" } }));
        assert_eq!(event, "chat:message");
        assert_eq!(inner, serde_json::json!({ "text": "hi" }));
    }

    #[test]
    fn unwrap_event_payload_falls_back_to_message_for_bare_values() {
        let (event, inner) = unwrap_event_payload(serde_json::json!({ "text": "hi" }));
        assert_eq!(event, "message");
        assert_eq!(inner, serde_json::json!({ "text": "hi" }));
    }
}

/// Wait for SIGINT/SIGTERM, then deregister the instance from shared state
/// and flush any pending batched sends before the listener stops accepting.
async fn shutdown_signal(state: Arc<GatewayState>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            std::future::pending::<()>().await;
            return;
        };
        sig.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, draining");
    state.instance.set_accepting_connections(false);
    state.batcher.flush_all().await;
    state.instance.cleanup().await;
}
