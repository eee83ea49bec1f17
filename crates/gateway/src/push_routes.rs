//! HTTP push API (spec §4.K): out-of-band delivery to already-connected
//! sockets, for backend services that want to notify a user or room without
//! going through a socket themselves. Grounded on the teacher's
//! `push_routes.rs` request-validation shape (typed body, 400 on missing
//! fields, optional bearer check, envelope response) generalized from its
//! Web Push payload to this protocol's event/payload pair.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::push;
use crate::state::GatewayState;

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/push", post(push_handler))
        .route("/push/users", post(push_users_handler))
        .route("/broadcast", post(broadcast_handler))
        .route("/broadcast/all", post(broadcast_all_handler))
        .route("/notify", post(notify_handler))
        .with_state(state)
}

fn err(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({ "success": false, "code": code, "message": message }))).into_response()
}

/// When an auth verifier is configured, the push API requires a bearer
/// token (any token this gateway would accept from a socket). With no
/// verifier configured, the endpoints are open — matching how `register`
/// degrades to the "legacy" path with no configured secret.
fn check_auth(state: &Arc<GatewayState>, headers: &HeaderMap) -> Result<(), Response> {
    let Some(verifier) = &state.auth else {
        return Ok(());
    };
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match token {
        Some(t) if verifier.verify_explicit(t).is_ok() => Ok(()),
        _ => Err(err(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "missing or invalid bearer token")),
    }
}

#[derive(Debug, Deserialize)]
struct PushRequest {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    event: Option<String>,
    payload: Option<Value>,
    #[serde(default)]
    volatile: bool,
}

async fn push_handler(State(state): State<Arc<GatewayState>>, headers: HeaderMap, Json(body): Json<PushRequest>) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let (Some(user_id), Some(event)) = (body.user_id, body.event) else {
        return err(StatusCode::BAD_REQUEST, "MISSING_REQUIRED_FIELDS", "userId and event are required");
    };
    let request_id = gateway_common::clock::new_id();
    let result = push::push_to_user(&state, &request_id, &user_id, &event, body.payload.unwrap_or(Value::Null), body.volatile).await;
    success(&request_id, result)
}

#[derive(Debug, Deserialize)]
struct PushUsersRequest {
    #[serde(rename = "userIds")]
    user_ids: Option<Vec<String>>,
    event: Option<String>,
    payload: Option<Value>,
    #[serde(default)]
    volatile: bool,
}

async fn push_users_handler(State(state): State<Arc<GatewayState>>, headers: HeaderMap, Json(body): Json<PushUsersRequest>) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let (Some(user_ids), Some(event)) = (body.user_ids, body.event) else {
        return err(StatusCode::BAD_REQUEST, "MISSING_REQUIRED_FIELDS", "userIds and event are required");
    };
    if user_ids.is_empty() {
        return err(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "userIds must not be empty");
    }
    let request_id = gateway_common::clock::new_id();
    let result = push::push_to_users(&state, &request_id, &user_ids, &event, body.payload.unwrap_or(Value::Null), body.volatile).await;
    success(&request_id, result)
}

#[derive(Debug, Deserialize)]
struct BroadcastRequest {
    room: Option<String>,
    event: Option<String>,
    payload: Option<Value>,
}

async fn broadcast_handler(State(state): State<Arc<GatewayState>>, headers: HeaderMap, Json(body): Json<BroadcastRequest>) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let (Some(room), Some(event)) = (body.room, body.event) else {
        return err(StatusCode::BAD_REQUEST, "MISSING_REQUIRED_FIELDS", "room and event are required");
    };
    let request_id = gateway_common::clock::new_id();
    match push::broadcast_to_room(&state, &request_id, &room, &event, body.payload.unwrap_or(Value::Null)).await {
        Some(result) => success(&request_id, result),
        None => err(StatusCode::NOT_FOUND, "NOT_FOUND", "room is not known on this gateway"),
    }
}

#[derive(Debug, Deserialize)]
struct BroadcastAllRequest {
    event: Option<String>,
    payload: Option<Value>,
}

async fn broadcast_all_handler(State(state): State<Arc<GatewayState>>, headers: HeaderMap, Json(body): Json<BroadcastAllRequest>) -> Response {
    if let Err(resp) = check_auth(&state, &headers) {
        return resp;
    }
    let Some(event) = body.event else {
        return err(StatusCode::BAD_REQUEST, "MISSING_REQUIRED_FIELDS", "event is required");
    };
    let request_id = gateway_common::clock::new_id();
    let result = push::broadcast_to_all(&state, &request_id, &event, body.payload.unwrap_or(Value::Null)).await;
    success(&request_id, result)
}

/// Alias for `/push` kept for callers that think in terms of "notify a
/// user" rather than "push an event" — same handler, same validation.
async fn notify_handler(State(state): State<Arc<GatewayState>>, headers: HeaderMap, Json(body): Json<PushRequest>) -> Response {
    push_handler(State(state), headers, Json(body)).await
}

fn success(request_id: &str, result: push::PushResult) -> Response {
    Json(json!({ "success": true, "requestId": request_id, "result": result })).into_response()
}
