//! In-process push API (spec §4.K): entry points the HTTP plumbing in
//! [`crate::push_routes`] calls to deliver an event to sockets that did not
//! originate the request.
//!
//! Unrelated to the teacher's `push.rs` (browser Web Push via VAPID keys to
//! a service worker) despite the shared name — this is a fan-out API over
//! already-connected gateway sockets, not an offline notification channel.

use std::sync::Arc;

use gateway_protocol::{with_push_meta, PushMeta};
use serde::Serialize;
use serde_json::{json, Value};

use crate::broadcast;
use crate::state::GatewayState;

/// `CrossInstance` envelope event name used to mark a cross-instance
/// push-to-user dispatch, so a receiving instance knows to resolve its own
/// local sockets for the carried `userId` rather than treat it as a plain
/// fan-out-to-everyone event.
pub const CROSS_INSTANCE_PUSH_USER: &str = "push:user";

#[derive(Debug, Clone, Serialize)]
pub struct PushResult {
    /// Sockets accepted for delivery. For `push_to_user`/`push_to_users`
    /// this means handed to the batcher, not necessarily flushed yet.
    pub delivered: usize,
    #[serde(rename = "totalLocalSockets")]
    pub total_local_sockets: usize,
    #[serde(rename = "crossInstanceDispatched")]
    pub cross_instance_dispatched: bool,
}

impl PushResult {
    fn merge(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.total_local_sockets += other.total_local_sockets;
        self.cross_instance_dispatched |= other.cross_instance_dispatched;
    }
}

pub async fn push_to_user(
    state: &Arc<GatewayState>,
    request_id: &str,
    user_id: &str,
    event: &str,
    payload: Value,
    volatile: bool,
) -> PushResult {
    let enveloped = with_push_meta(payload, &PushMeta::new(request_id, state.now()));

    let sockets = state.registry.get_sockets_for_user(user_id).await;
    // Push-API deliveries go through the batcher rather than straight to
    // the socket: a single subscriber endpoint (e.g. a dashboard) can be
    // the target of many rapid `push_to_user` calls, and those should
    // coalesce into one frame rather than one write syscall each.
    for socket_id in &sockets {
        state
            .batcher
            .add(socket_id, json!({ "event": event, "payload": enveloped.clone() }))
            .await;
    }
    let delivered = sockets.len();

    let cross_instance_dispatched = if !volatile && state.shared_state.is_connected() {
        state
            .shared_state
            .publish_cross_instance(
                state.instance.id(),
                CROSS_INSTANCE_PUSH_USER,
                json!({ "userId": user_id, "event": event, "payload": enveloped }),
            )
            .await;
        true
    } else {
        false
    };

    PushResult { delivered, total_local_sockets: sockets.len(), cross_instance_dispatched }
}

pub async fn push_to_users(
    state: &Arc<GatewayState>,
    request_id: &str,
    user_ids: &[String],
    event: &str,
    payload: Value,
    volatile: bool,
) -> PushResult {
    let mut total = PushResult { delivered: 0, total_local_sockets: 0, cross_instance_dispatched: false };
    for user_id in user_ids {
        total.merge(push_to_user(state, request_id, user_id, event, payload.clone(), volatile).await);
    }
    total
}

/// Requires the room to exist locally or, when a shared bus is connected,
/// assumes it might exist on a peer instance (room existence is not itself
/// replicated — spec §4.D scopes membership to a single instance).
pub async fn broadcast_to_room(
    state: &Arc<GatewayState>,
    request_id: &str,
    room: &str,
    event: &str,
    payload: Value,
) -> Option<PushResult> {
    let exists_locally = state.rooms.get_room_details(room).await.is_some();
    if !exists_locally && !state.shared_state.is_connected() {
        return None;
    }

    let enveloped = with_push_meta(payload, &PushMeta::new(request_id, state.now()));
    let members = state.rooms.broadcast_to_room(room).await;
    let delivered = broadcast::deliver_to_sockets(state, &members, event, enveloped.clone()).await;
    state
        .shared_state
        .publish_broadcast(state.instance.id(), room, json!({ "event": event, "payload": enveloped }))
        .await;

    Some(PushResult {
        delivered,
        total_local_sockets: members.len(),
        cross_instance_dispatched: state.shared_state.is_connected(),
    })
}

pub async fn broadcast_to_all(state: &Arc<GatewayState>, request_id: &str, event: &str, payload: Value) -> PushResult {
    let enveloped = with_push_meta(payload, &PushMeta::new(request_id, state.now()));
    let sockets = state.all_socket_ids().await;
    let delivered = broadcast::deliver_to_sockets(state, &sockets, event, enveloped.clone()).await;
    state
        .shared_state
        .publish_cross_instance(state.instance.id(), event, enveloped)
        .await;

    PushResult {
        delivered,
        total_local_sockets: sockets.len(),
        cross_instance_dispatched: state.shared_state.is_connected(),
    }
}
