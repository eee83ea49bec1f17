//! WebSocket connection lifecycle: admission → welcome → message loop →
//! cleanup. Structurally grounded on the teacher's `ws.rs` (split sink/
//! stream, a dedicated write-loop task draining an `mpsc::unbounded_channel`,
//! payload-size enforcement, frame-parse error replies, per-message activity
//! touch) but simplified from its RPC hello-handshake to this protocol's
//! plain "upgrade then send events" shape — there is no client-sent
//! `connect` frame to wait for.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{stream::StreamExt, SinkExt};
use gateway_protocol::{OutboundFrame, RawInboundFrame, MAX_FRAME_BYTES};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broadcast;
use crate::dispatch;
use crate::state::GatewayState;

pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>, remote_addr: SocketAddr) {
    let socket_id = gateway_common::clock::new_id();
    info!(socket_id = %socket_id, remote = %remote_addr, "ws: new connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();

    let write_socket_id = socket_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = client_rx.recv().await {
            if ws_tx.send(Message::Text(msg.into())).await.is_err() {
                debug!(socket_id = %write_socket_id, "ws: write loop closed");
                break;
            }
        }
    });

    let close = state.register_socket(&socket_id, client_tx.clone()).await;
    state
        .registry
        .connect(socket_id.clone(), None, Some(remote_addr.ip().to_string()))
        .await;

    let welcome = OutboundFrame::new(
        "system:welcome",
        serde_json::json!({ "message": "connected", "socketId": socket_id }),
    );
    let _ = state.send_frame(&socket_id, &welcome).await;

    loop {
        tokio::select! {
            biased;
            _ = close.notified() => {
                debug!(socket_id = %socket_id, "ws: close requested");
                break;
            }
            msg = ws_rx.next() => {
                let Some(msg) = msg else { break };
                let text = match msg {
                    Ok(Message::Text(t)) => t.to_string(),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(socket_id = %socket_id, error = %e, "ws: read error");
                        break;
                    },
                };

                if text.len() > MAX_FRAME_BYTES {
                    warn!(socket_id = %socket_id, size = text.len(), "ws: payload too large");
                    let err = OutboundFrame::new(
                        "error",
                        serde_json::json!({ "event": "frame", "message": "payload too large", "code": "payload-too-large" }),
                    );
                    let _ = state.send_frame(&socket_id, &err).await;
                    continue;
                }

                let raw: RawInboundFrame = match serde_json::from_str(&text) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!(socket_id = %socket_id, error = %e, "ws: invalid frame");
                        let err = OutboundFrame::new(
                            "error",
                            serde_json::json!({ "event": "frame", "message": "invalid frame", "code": "invalid-frame" }),
                        );
                        let _ = state.send_frame(&socket_id, &err).await;
                        continue;
                    },
                };

                state.registry.update_activity(&socket_id).await;

                let event = match raw.decode() {
                    Ok(event) => event,
                    Err(e) => {
                        let err = OutboundFrame::new("error", serde_json::json!({ "event": "decode", "message": e.to_string(), "code": "invalid-payload" }));
                        let _ = state.send_frame(&socket_id, &err).await;
                        continue;
                    },
                };

                for frame in dispatch::dispatch(&state, &socket_id, event).await {
                    let _ = state.send_frame(&socket_id, &frame).await;
                }
            }
        }
    }

    cleanup(&state, &socket_id).await;
    drop(client_tx);
    write_handle.abort();
}

async fn cleanup(state: &Arc<GatewayState>, socket_id: &str) {
    let rooms = state
        .registry
        .get(socket_id)
        .await
        .map(|c| c.rooms.into_iter().collect::<Vec<_>>())
        .unwrap_or_default();

    state.rooms.leave_all_rooms(socket_id).await;
    let removed = state.registry.remove_user(socket_id).await;
    state.remove_socket(socket_id).await;

    for room in rooms {
        broadcast::broadcast_to_room(
            state,
            &room,
            "user_left",
            serde_json::json!({ "socketId": socket_id, "room": room }),
        )
        .await;
    }

    let duration_secs = removed.map(|c| (state.now().saturating_sub(c.connected_at)) / 1000).unwrap_or(0);
    info!(socket_id, duration_secs, "ws: connection closed");
}
