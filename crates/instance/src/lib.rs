//! Instance lifecycle (spec §4.F): heartbeats this instance's presence into
//! the shared store, tracks admission eligibility, and answers "what other
//! instances exist" for routing decisions.
//!
//! Heartbeat cadence and TTL are tied together: a 15s heartbeat interval
//! against a 45s record TTL (three missed beats) tolerates a couple of
//! slow ticks under load without the group treating a live instance as
//! dead (see DESIGN.md).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gateway_common::clock;
use gateway_config::InstanceConfig;
use gateway_shared_state::{InstanceRecord, SharedStateClient};
use tracing::{debug, info};

const HEARTBEAT_INTERVAL_SECS: u64 = 15;

pub struct InstanceManager {
    instance_id: String,
    group: String,
    max_connections: u64,
    load_balancing_enabled: bool,
    connection_count: AtomicU64,
    accepting: AtomicBool,
    shared_state: Arc<SharedStateClient>,
}

impl InstanceManager {
    #[must_use]
    pub fn new(config: &InstanceConfig, shared_state: Arc<SharedStateClient>) -> Arc<Self> {
        let instance_id = config.id.clone().unwrap_or_else(|| clock::instance_id().to_string());
        Arc::new(Self {
            instance_id,
            group: config.group.clone(),
            max_connections: config.max_connections_per_instance as u64,
            load_balancing_enabled: config.load_balancing_enabled,
            connection_count: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
            shared_state,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.instance_id
    }

    /// Mirror the registry's live connection count, used only for
    /// admission decisions and heartbeat reporting.
    pub fn set_connection_count(&self, count: u64) {
        self.connection_count.store(count, Ordering::Relaxed);
    }

    /// Flipped by the load classifier (spec §4.G) when load crosses the
    /// critical threshold.
    pub fn set_accepting_connections(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::Relaxed);
    }

    #[must_use]
    pub fn can_accept_connections(&self) -> bool {
        if !self.load_balancing_enabled {
            return true;
        }
        self.accepting.load(Ordering::Relaxed)
            && self.connection_count.load(Ordering::Relaxed) < self.max_connections
    }

    fn snapshot(&self) -> InstanceRecord {
        InstanceRecord {
            instance_id: self.instance_id.clone(),
            group: self.group.clone(),
            connection_count: self.connection_count.load(Ordering::Relaxed),
            accepting_connections: self.can_accept_connections(),
            updated_at: clock::now_millis(),
        }
    }

    async fn heartbeat_once(&self) {
        self.shared_state.set_instance_info(&self.snapshot()).await;
    }

    /// Spawn the periodic heartbeat loop. Returns the task handle so the
    /// caller can abort it during shutdown.
    pub fn start_heartbeat(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                self.heartbeat_once().await;
                debug!(instance_id = %self.instance_id, "heartbeat sent");
            }
        })
    }

    #[must_use]
    pub async fn get_all_instances(&self) -> Vec<InstanceRecord> {
        self.shared_state.get_all_instances().await
    }

    /// Instances in the same routing group as this one, excluding itself.
    #[must_use]
    pub async fn peers(&self) -> Vec<InstanceRecord> {
        self.get_all_instances()
            .await
            .into_iter()
            .filter(|r| r.group == self.group && r.instance_id != self.instance_id)
            .collect()
    }

    /// Remove this instance's record from the shared store. Called from
    /// the shutdown handler (SIGTERM/SIGINT) before closing listener
    /// sockets.
    pub async fn cleanup(&self) {
        self.shared_state.remove_instance(&self.instance_id).await;
        info!(instance_id = %self.instance_id, "instance record removed from shared state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_config::SharedStoreConfig;

    async fn degraded_manager(load_balancing_enabled: bool, max: usize) -> Arc<InstanceManager> {
        let shared = Arc::new(SharedStateClient::connect(&SharedStoreConfig::default()).await);
        let config = InstanceConfig {
            id: Some("inst-1".into()),
            group: "default".into(),
            max_connections_per_instance: max,
            load_balancing_enabled,
        };
        InstanceManager::new(&config, shared)
    }

    #[tokio::test]
    async fn accepts_connections_by_default() {
        let mgr = degraded_manager(true, 10).await;
        assert!(mgr.can_accept_connections());
    }

    #[tokio::test]
    async fn rejects_when_over_capacity() {
        let mgr = degraded_manager(true, 10).await;
        mgr.set_connection_count(10);
        assert!(!mgr.can_accept_connections());
    }

    #[tokio::test]
    async fn rejects_when_flagged_not_accepting() {
        let mgr = degraded_manager(true, 10).await;
        mgr.set_accepting_connections(false);
        assert!(!mgr.can_accept_connections());
    }

    #[tokio::test]
    async fn ignores_capacity_when_load_balancing_disabled() {
        let mgr = degraded_manager(false, 1).await;
        mgr.set_connection_count(1000);
        mgr.set_accepting_connections(false);
        assert!(mgr.can_accept_connections());
    }

    #[tokio::test]
    async fn degraded_shared_state_yields_no_peers() {
        let mgr = degraded_manager(true, 10).await;
        assert!(mgr.get_all_instances().await.is_empty());
    }
}
