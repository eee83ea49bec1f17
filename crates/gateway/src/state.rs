//! Gateway-wide shared state, grounded on the teacher's `GatewayState`
//! (`crates/gateway/src/state.rs`): one struct composing every subsystem
//! manager, plus the one piece none of the sub-crates own — the live
//! per-socket outbound channel.
//!
//! None of `gateway-registry`/`gateway-rooms`/etc. hold a socket's sender,
//! by design (see DESIGN.md): they track membership and metadata, not
//! transport. This struct is where "membership" and "transport" meet.

use std::collections::HashMap;
use std::sync::Arc;

use gateway_auth::CredentialVerifier;
use gateway_backend_client::BackendClient;
use gateway_batcher::Batcher;
use gateway_common::clock;
use gateway_config::GatewayConfig;
use gateway_instance::InstanceManager;
use gateway_load::LoadMonitor;
use gateway_registry::ConnectionRegistry;
use gateway_rooms::RoomManager;
use gateway_shared_state::SharedStateClient;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::debug;

/// The live half of a connected socket: the write-loop's sender plus a
/// signal the dispatcher can use to force the read loop to exit (used for
/// server-initiated disconnects — failed registration, a remote `Disconnect`
/// envelope, admin kick via the push API).
struct SocketHandle {
    sender: mpsc::UnboundedSender<String>,
    close: Arc<Notify>,
}

pub struct GatewayState {
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomManager>,
    pub shared_state: Arc<SharedStateClient>,
    pub instance: Arc<InstanceManager>,
    pub load: Arc<LoadMonitor>,
    pub backend: Arc<BackendClient>,
    pub batcher: Arc<Batcher>,
    pub auth: Option<Arc<CredentialVerifier>>,
    pub config: GatewayConfig,
    sockets: RwLock<HashMap<String, SocketHandle>>,
}

impl GatewayState {
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomManager>,
        shared_state: Arc<SharedStateClient>,
        instance: Arc<InstanceManager>,
        load: Arc<LoadMonitor>,
        backend: Arc<BackendClient>,
        batcher: Arc<Batcher>,
        config: GatewayConfig,
    ) -> Arc<Self> {
        let auth = config
            .auth
            .jwt_secret
            .clone()
            .map(|secret| Arc::new(CredentialVerifier::new(secret.into_bytes())));
        Arc::new(Self {
            registry,
            rooms,
            shared_state,
            instance,
            load,
            backend,
            batcher,
            auth,
            config,
            sockets: RwLock::new(HashMap::new()),
        })
    }

    /// Register a newly connected socket's write channel. Returns the
    /// close-notify handle the read loop should select on.
    pub async fn register_socket(&self, socket_id: &str, sender: mpsc::UnboundedSender<String>) -> Arc<Notify> {
        let close = Arc::new(Notify::new());
        self.sockets.write().await.insert(
            socket_id.to_string(),
            SocketHandle { sender, close: Arc::clone(&close) },
        );
        self.load.set_connection_count(self.sockets.read().await.len() as u64);
        self.instance.set_connection_count(self.sockets.read().await.len() as u64);
        close
    }

    pub async fn remove_socket(&self, socket_id: &str) {
        self.sockets.write().await.remove(socket_id);
        let count = self.sockets.read().await.len() as u64;
        self.load.set_connection_count(count);
        self.instance.set_connection_count(count);
    }

    #[must_use]
    pub async fn socket_count(&self) -> usize {
        self.sockets.read().await.len()
    }

    #[must_use]
    pub async fn all_socket_ids(&self) -> Vec<String> {
        self.sockets.read().await.keys().cloned().collect()
    }

    /// Send a pre-serialized frame to one socket. Returns `false` if the
    /// socket is unknown or its channel is closed.
    pub async fn send_raw(&self, socket_id: &str, json: String) -> bool {
        let sockets = self.sockets.read().await;
        match sockets.get(socket_id) {
            Some(handle) => handle.sender.send(json).is_ok(),
            None => false,
        }
    }

    /// Send a frame, serializing it first.
    pub async fn send_frame(&self, socket_id: &str, frame: &gateway_protocol::OutboundFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(json) => self.send_raw(socket_id, json).await,
            Err(e) => {
                tracing::warn!(socket_id, error = %e, "failed to serialize outbound frame");
                false
            },
        }
    }

    /// Ask a socket's read loop to exit at its next suspension point.
    pub async fn request_close(&self, socket_id: &str) {
        if let Some(handle) = self.sockets.read().await.get(socket_id) {
            debug!(socket_id, "requesting socket close");
            handle.close.notify_one();
        }
    }

    #[must_use]
    pub fn now(&self) -> u64 {
        clock::now_millis()
    }
}
