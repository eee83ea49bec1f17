//! Gateway entrypoint: load config, build every subsystem manager, assemble
//! `GatewayState`, and run the HTTP/WebSocket server until a shutdown signal.
//! Grounded on the teacher's `main.rs` CLI/config/tracing bootstrap, with
//! clap limited to the flags this gateway actually needs.

mod broadcast;
mod dispatch;
mod push;
mod push_routes;
mod server;
mod state;
mod ws;

use std::sync::Arc;

use clap::Parser;
use gateway_backend_client::BackendClient;
use gateway_batcher::Batcher;
use gateway_config::{apply_env_overrides, discover_and_load, load_config, validate};
use gateway_instance::InstanceManager;
use gateway_load::LoadMonitor;
use gateway_registry::ConnectionRegistry;
use gateway_rooms::RoomManager;
use gateway_shared_state::SharedStateClient;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "gateway", about = "Real-time messaging gateway")]
struct Cli {
    /// Path to gateway.toml. Defaults to the discovery search used by
    /// `discover_and_load` (./gateway.toml, then ~/.config/gateway/gateway.toml).
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => discover_and_load(),
    };
    apply_env_overrides(&mut config);

    let diagnostics = validate(&config);
    for d in &diagnostics.diagnostics {
        match d.severity {
            gateway_config::Severity::Error => error!(field = %d.field, "{}", d.message),
            gateway_config::Severity::Warning => warn!(field = %d.field, "{}", d.message),
        }
    }
    if diagnostics.has_errors() {
        anyhow::bail!("configuration is invalid, refusing to start");
    }

    let registry = Arc::new(ConnectionRegistry::new());
    let rooms = Arc::new(RoomManager::new(Arc::clone(&registry)));
    let shared_state = Arc::new(SharedStateClient::connect(&config.shared_store).await);
    let instance = InstanceManager::new(&config.instance, Arc::clone(&shared_state));
    let load = LoadMonitor::new(config.load.clone());
    let backend = Arc::new(BackendClient::new(config.backend.clone(), Some(Arc::clone(&shared_state)))?);

    // The batcher's flush callback needs to reach `GatewayState` (to deliver
    // locally or, for a socket owned by a peer, publish a direct envelope),
    // but `GatewayState` owns the batcher — so the callback closes over a
    // `Weak` cell that's filled in once construction completes.
    let gateway_state_cell: Arc<tokio::sync::OnceCell<std::sync::Weak<state::GatewayState>>> =
        Arc::new(tokio::sync::OnceCell::new());
    let batcher = {
        let cell = Arc::clone(&gateway_state_cell);
        Batcher::new(
            config.batcher.clone(),
            Arc::new(move |target, items| {
                let cell = Arc::clone(&cell);
                Box::pin(async move { flush_batch(cell, target, items).await })
            }),
        )
    };

    let state = state::GatewayState::new(registry, rooms, shared_state, instance, load, backend, batcher, config);
    let _ = gateway_state_cell.set(Arc::downgrade(&state));

    info!(instance_id = %state.instance.id(), "gateway starting");
    server::run(state).await
}

/// Deliver a batcher flush to `target` (a socket id): locally if the socket
/// is still connected here, otherwise as a direct envelope to whichever
/// instance owns it, if any. Silently drops if the gateway state has
/// already been torn down (shutdown race) or the socket has no known owner.
async fn flush_batch(
    cell: Arc<tokio::sync::OnceCell<std::sync::Weak<state::GatewayState>>>,
    target: String,
    items: Vec<serde_json::Value>,
) {
    let Some(weak) = cell.get() else { return };
    let Some(state) = weak.upgrade() else { return };

    let frame = gateway_protocol::OutboundFrame::new("batch:delivery", serde_json::json!({ "items": items }));
    if state.send_frame(&target, &frame).await {
        return;
    }

    if let Some(owner) = state.shared_state.get_connection_owner(&target).await {
        if owner != state.instance.id() {
            state
                .shared_state
                .publish_direct(&owner, target, serde_json::json!({ "event": "batch:delivery", "payload": { "items": items } }))
                .await;
        }
    }
}
