//! Local + cross-instance fan-out (spec §4.D/§4.K), grounded on the
//! teacher's `broadcast.rs` (serialize once, iterate live clients, skip
//! failures) but without its scope-guard model — this protocol has no
//! per-client scopes, only room membership.

use std::sync::Arc;

use gateway_protocol::OutboundFrame;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::state::GatewayState;

/// Deliver `event`/`payload` to every local member of `room`, and publish a
/// cross-instance broadcast envelope so peer instances deliver to their own
/// local members. The publisher's own subscriber loop, which also receives
/// this publish, skips it by `origin` rather than delivering twice.
pub async fn broadcast_to_room(state: &Arc<GatewayState>, room: &str, event: &str, payload: Value) {
    let members = state.rooms.broadcast_to_room(room).await;
    deliver_to_sockets(state, &members, event, payload.clone()).await;
    state
        .shared_state
        .publish_broadcast(state.instance.id(), room, wrap(event, payload))
        .await;
}

/// Local-only + cross-instance broadcast to every connected socket,
/// regardless of room membership (spec §4.K `broadcastToAll`).
pub async fn broadcast_to_all(state: &Arc<GatewayState>, event: &str, payload: Value) {
    let sockets = state.all_socket_ids().await;
    deliver_to_sockets(state, &sockets, event, payload.clone()).await;
    state
        .shared_state
        .publish_cross_instance(state.instance.id(), event, payload)
        .await;
}

/// Deliver only to this instance's local sockets — used both by direct
/// broadcast calls and by the shared-state subscriber replaying a remote
/// envelope. Returns the number of sockets the frame was actually handed
/// to (a closed channel doesn't count).
pub(crate) async fn deliver_to_sockets(state: &Arc<GatewayState>, sockets: &[String], event: &str, payload: Value) -> usize {
    let frame = OutboundFrame::new(event, payload);
    let json = match serde_json::to_string(&frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(event, error = %e, "failed to serialize broadcast frame");
            return 0;
        },
    };
    debug!(event, count = sockets.len(), "delivering to local sockets");
    let mut delivered = 0;
    for socket_id in sockets {
        if state.send_raw(socket_id, json.clone()).await {
            delivered += 1;
        }
    }
    delivered
}

fn wrap(event: &str, payload: Value) -> Value {
    json!({ "event": event, "payload": payload })
}
