//! Event dispatcher (spec §4.J): routes a decoded inbound socket event to
//! the registry, room manager, backend client and batcher, returning the
//! outbound frame(s) for the originating socket. Side effects addressed to
//! *other* sockets (room presence broadcasts) are performed here directly
//! rather than returned.
//!
//! Modeled on the teacher's `ws.rs` dispatch step, generalized from its
//! RPC method-registry shape to this protocol's flat named-event surface.

use std::sync::Arc;
use std::time::Duration;

use gateway_auth::AuthError;
use gateway_protocol::{ClientEventKind, ClientEventParams, InboundEvent, OutboundFrame, RegisterParams, RoomParams};
use serde_json::json;
use tracing::{debug, warn};

use crate::broadcast;
use crate::state::GatewayState;

/// The grace period a socket is kept open after a failed `register`, so the
/// client can observe the failure ack before the connection drops.
const REGISTER_FAILURE_GRACE: Duration = Duration::from_millis(500);

pub async fn dispatch(state: &Arc<GatewayState>, socket_id: &str, event: InboundEvent) -> Vec<OutboundFrame> {
    match event {
        InboundEvent::Register(params) => vec![handle_register(state, socket_id, params).await],
        InboundEvent::Authenticate(params) => vec![handle_authenticate(state, socket_id, params.token).await],
        InboundEvent::VerifyToken(params) => vec![handle_verify_token(state, params.token)],
        InboundEvent::Ping(echo) => vec![handle_ping(state, socket_id, echo).await],
        InboundEvent::RoomJoin(params) => handle_room_join(state, socket_id, params).await,
        InboundEvent::RoomLeave(params) => handle_room_leave(state, socket_id, params).await,
        InboundEvent::ClientEvent(kind, params) => handle_client_event(state, socket_id, kind, params).await,
        InboundEvent::Unknown(name, _) => {
            debug!(socket_id, event = %name, "dropping event with no registered handler");
            vec![]
        },
    }
}

async fn require_authenticated(state: &Arc<GatewayState>, socket_id: &str) -> bool {
    state.registry.get(socket_id).await.map(|c| c.authenticated).unwrap_or(false)
}

async fn handle_register(state: &Arc<GatewayState>, socket_id: &str, params: RegisterParams) -> OutboundFrame {
    let already_authenticated = require_authenticated(state, socket_id).await;

    let (authorized, method, bound_token) = match &params.token {
        Some(token) => match &state.auth {
            Some(verifier) => match verifier.verify_matches(token, &params.user_id) {
                Ok(_) => (true, "jwt", Some(token.clone())),
                Err(_) => (false, "jwt", None),
            },
            None => (false, "jwt", None),
        },
        None if already_authenticated => (true, "legacy", None),
        None => (false, "token", None),
    };

    if !authorized {
        warn!(socket_id, user_id = %params.user_id, "register failed");
        let socket_id = socket_id.to_string();
        let state = Arc::clone(state);
        tokio::spawn(async move {
            tokio::time::sleep(REGISTER_FAILURE_GRACE).await;
            state.request_close(&socket_id).await;
        });
        return OutboundFrame::new("register:ack", json!({ "success": false, "error": "registration failed" }));
    }

    if let Err(e) = state.registry.register_user(socket_id, &params.user_id, bound_token).await {
        warn!(socket_id, error = %e, "register_user failed");
        return OutboundFrame::new("register:ack", json!({ "success": false, "error": e.to_string() }));
    }

    let room = gateway_rooms::user_room_name(&params.user_id);
    state.rooms.add_to_room(socket_id, &room).await;
    OutboundFrame::new("register:ack", json!({ "success": true, "method": method }))
}

async fn handle_authenticate(state: &Arc<GatewayState>, socket_id: &str, token: String) -> OutboundFrame {
    let Some(verifier) = &state.auth else {
        return OutboundFrame::new("authenticate:ack", json!({ "success": false, "error": "invalid-token" }));
    };

    let credential = match verifier.verify_explicit(&token) {
        Ok(c) => c,
        Err(e) => {
            let code = auth_error_code(&e);
            return OutboundFrame::new("authenticate:ack", json!({ "success": false, "error": code }));
        },
    };

    if let Err(e) = state
        .registry
        .register_user(socket_id, &credential.user_id, Some(credential.raw_token))
        .await
    {
        warn!(socket_id, error = %e, "authenticate: register_user failed");
        return OutboundFrame::new("authenticate:ack", json!({ "success": false, "error": "internal-error" }));
    }

    let room = gateway_rooms::user_room_name(&credential.user_id);
    state.rooms.add_to_room(socket_id, &room).await;
    OutboundFrame::new("authenticate:ack", json!({ "success": true, "userId": credential.user_id }))
}

fn handle_verify_token(state: &Arc<GatewayState>, token: String) -> OutboundFrame {
    let Some(verifier) = &state.auth else {
        return OutboundFrame::new("verify-token:ack", json!({ "valid": false, "error": "invalid-token" }));
    };
    match verifier.verify_explicit(&token) {
        Ok(credential) => OutboundFrame::new("verify-token:ack", json!({ "valid": true, "userId": credential.user_id })),
        Err(e) => OutboundFrame::new("verify-token:ack", json!({ "valid": false, "error": auth_error_code(&e) })),
    }
}

fn auth_error_code(e: &AuthError) -> &'static str {
    match e {
        AuthError::MissingToken => "missing-token",
        AuthError::InvalidTokenFormat => "invalid-token-format",
        AuthError::InvalidToken => "invalid-token",
    }
}

async fn handle_ping(state: &Arc<GatewayState>, socket_id: &str, echo: serde_json::Value) -> OutboundFrame {
    state.registry.update_activity(socket_id).await;
    let authenticated = require_authenticated(state, socket_id).await;
    OutboundFrame::new("pong", json!({ "timestamp": state.now(), "echo": echo, "authenticated": authenticated }))
}

async fn handle_room_join(state: &Arc<GatewayState>, socket_id: &str, params: RoomParams) -> Vec<OutboundFrame> {
    if !require_authenticated(state, socket_id).await {
        return vec![OutboundFrame::new(
            "room:join:ack",
            json!({ "success": false, "error": "not-authenticated" }),
        )];
    }
    state.rooms.add_to_room(socket_id, &params.room).await;
    broadcast::broadcast_to_room(state, &params.room, "user_joined", json!({ "socketId": socket_id, "room": params.room })).await;
    vec![OutboundFrame::new("room:join:ack", json!({ "success": true, "room": params.room }))]
}

async fn handle_room_leave(state: &Arc<GatewayState>, socket_id: &str, params: RoomParams) -> Vec<OutboundFrame> {
    if !require_authenticated(state, socket_id).await {
        return vec![OutboundFrame::new(
            "room:leave:ack",
            json!({ "success": false, "error": "not-authenticated" }),
        )];
    }
    state.rooms.remove_from_room(socket_id, &params.room).await;
    broadcast::broadcast_to_room(state, &params.room, "user_left", json!({ "socketId": socket_id, "room": params.room })).await;
    vec![OutboundFrame::new("room:leave:ack", json!({ "success": true, "room": params.room }))]
}

async fn handle_client_event(
    state: &Arc<GatewayState>,
    socket_id: &str,
    kind: ClientEventKind,
    params: ClientEventParams,
) -> Vec<OutboundFrame> {
    let ack_event = kind.ack_event_name();
    if !require_authenticated(state, socket_id).await {
        return vec![OutboundFrame::new(ack_event, json!({ "success": false, "error": "not-authenticated" }))];
    }
    state.registry.update_activity(socket_id).await;

    let user_id = state
        .registry
        .get(socket_id)
        .await
        .and_then(|c| c.user_id)
        .unwrap_or_else(|| socket_id.to_string());
    let event_name = kind.socket_event_name();
    let count = state.load.rate_counter.record(&user_id, event_name);
    if state.load.is_message_throttling() {
        let limit = state.load.message_rate_limit(event_name);
        if count > limit {
            debug!(socket_id, event = event_name, "dropping rate-limited event");
            return vec![];
        }
    }

    let request_id = gateway_common::clock::new_id();
    let mut body = serde_json::Map::new();
    body.insert("type".into(), params.r#type.clone().map(serde_json::Value::String).unwrap_or(serde_json::Value::Null));
    body.insert("content".into(), params.content.clone().unwrap_or(serde_json::Value::Null));
    body.insert("action".into(), params.action.clone().unwrap_or(serde_json::Value::Null));
    body.extend(params.rest.clone());
    body.insert("requestId".into(), serde_json::Value::String(request_id.clone()));

    match state.backend.post_json(kind.backend_path(), serde_json::Value::Object(body)).await {
        Ok(result) => vec![OutboundFrame::new(
            ack_event,
            json!({ "success": true, "requestId": request_id, "result": result }),
        )],
        Err(e) => {
            warn!(socket_id, error = %e, "backend call failed for client event");
            vec![OutboundFrame::new(
                ack_event,
                json!({ "success": false, "requestId": request_id, "code": "EVENT_PROCESSING_ERROR" }),
            )]
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_error_codes_are_stable_wire_strings() {
        assert_eq!(auth_error_code(&AuthError::MissingToken), "missing-token");
        assert_eq!(auth_error_code(&AuthError::InvalidTokenFormat), "invalid-token-format");
        assert_eq!(auth_error_code(&AuthError::InvalidToken), "invalid-token");
    }

    async fn test_state() -> Arc<GatewayState> {
        let registry = Arc::new(gateway_registry::ConnectionRegistry::new());
        let rooms = Arc::new(gateway_rooms::RoomManager::new(Arc::clone(&registry)));
        let shared_state = Arc::new(gateway_shared_state::SharedStateClient::connect(&gateway_config::SharedStoreConfig::default()).await);
        let instance = gateway_instance::InstanceManager::new(&gateway_config::InstanceConfig::default(), Arc::clone(&shared_state));
        let load = gateway_load::LoadMonitor::new(gateway_config::LoadConfig::default());
        let backend = Arc::new(
            gateway_backend_client::BackendClient::new(gateway_config::BackendConfig::default(), None).expect("backend client builds"),
        );
        let batcher = gateway_batcher::Batcher::new(gateway_config::BatcherConfig::default(), Arc::new(|_, _| Box::pin(async {})));
        GatewayState::new(registry, rooms, shared_state, instance, load, backend, batcher, gateway_config::GatewayConfig::default())
    }

    #[tokio::test]
    async fn ping_echoes_payload_and_reports_authentication_state() {
        let state = test_state().await;
        let frame = handle_ping(&state, "s1", json!({ "seq": 1 })).await;
        assert_eq!(frame.event, "pong");
        assert_eq!(frame.payload["echo"], json!({ "seq": 1 }));
        assert_eq!(frame.payload["authenticated"], json!(false));
    }

    #[tokio::test]
    async fn room_join_requires_authentication() {
        let state = test_state().await;
        let frames = handle_room_join(&state, "s1", RoomParams { room: "room:lobby".into() }).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload["success"], json!(false));
    }
}
