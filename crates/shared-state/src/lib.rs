//! Shared-state client (spec §4.E): Redis-backed pub/sub for cross-instance
//! fan-out and a small KV store for instance/connection bookkeeping.
//!
//! Grounded on the `redis::AsyncCommands` + connection-manager usage pattern
//! from the pack's Fechatter auth-service reference, since the teacher
//! repo is single-process and has no cross-instance layer of its own.
//!
//! Every public method degrades gracefully when Redis is unreachable: a
//! connection failure at startup leaves the client in "degraded" mode,
//! where publishes are dropped (logged at `warn!`) and reads return empty
//! results, rather than the gateway refusing to start or crashing a
//! connection handler. Cross-instance delivery is a convenience on top of
//! a working single-instance gateway, not a dependency of it.

pub mod envelope;

use std::collections::HashMap;

use futures::StreamExt;
use gateway_config::SharedStoreConfig;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub use envelope::Envelope;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub group: String,
    pub connection_count: u64,
    pub accepting_connections: bool,
    pub updated_at: u64,
}

/// Redis-backed shared state. Construct with [`SharedStateClient::connect`],
/// which never fails — a connection error is logged and the client falls
/// back to degraded mode.
pub struct SharedStateClient {
    manager: Option<ConnectionManager>,
    raw_client: Option<redis::Client>,
    key_prefix: String,
    state_ttl_secs: u64,
}

impl SharedStateClient {
    pub async fn connect(config: &SharedStoreConfig) -> Self {
        let url = config.connection_url();
        match redis::Client::open(url.as_str()) {
            Ok(client) => match ConnectionManager::new(client.clone()).await {
                Ok(manager) => {
                    debug!("connected to shared state store");
                    Self {
                        manager: Some(manager),
                        raw_client: Some(client),
                        key_prefix: config.key_prefix.clone(),
                        state_ttl_secs: config.state_ttl_secs,
                    }
                },
                Err(err) => {
                    warn!(error = %err, "shared state store unreachable, running in degraded mode");
                    Self::degraded(config)
                },
            },
            Err(err) => {
                warn!(error = %err, "invalid shared state store url, running in degraded mode");
                Self::degraded(config)
            },
        }
    }

    fn degraded(config: &SharedStoreConfig) -> Self {
        Self {
            manager: None,
            raw_client: None,
            key_prefix: config.key_prefix.clone(),
            state_ttl_secs: config.state_ttl_secs,
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.manager.is_some()
    }

    fn broadcast_channel(&self) -> String {
        format!("{}:broadcast", self.key_prefix)
    }

    fn direct_channel(&self, instance_id: &str) -> String {
        format!("{}:direct:{instance_id}", self.key_prefix)
    }

    fn instance_key(&self, instance_id: &str) -> String {
        format!("{}:instances:{instance_id}", self.key_prefix)
    }

    fn connection_owner_key(&self, socket_id: &str) -> String {
        format!("{}:connections:{socket_id}", self.key_prefix)
    }

    fn retry_lock_key(&self, key: &str) -> String {
        format!("{}:retry:{key}", self.key_prefix)
    }

    async fn publish_raw(&self, channel: &str, envelope: &Envelope) {
        let Some(manager) = self.manager.clone() else {
            warn!(channel, "shared state degraded, dropping publish");
            return;
        };
        let mut manager = manager;
        if let Err(err) = manager.publish::<_, _, ()>(channel, envelope.to_json()).await {
            warn!(channel, error = %err, "failed to publish to shared state");
        }
    }

    pub async fn publish_broadcast(&self, origin_instance_id: &str, room: impl Into<String>, payload: serde_json::Value) {
        let envelope = Envelope::Broadcast { room: room.into(), payload, origin: origin_instance_id.to_string() };
        self.publish_raw(&self.broadcast_channel(), &envelope).await;
    }

    pub async fn publish_cross_instance(&self, origin_instance_id: &str, event: impl Into<String>, payload: serde_json::Value) {
        let envelope = Envelope::CrossInstance { event: event.into(), payload, origin: origin_instance_id.to_string() };
        self.publish_raw(&self.broadcast_channel(), &envelope).await;
    }

    pub async fn publish_direct(&self, instance_id: &str, socket_id: impl Into<String>, payload: serde_json::Value) {
        let envelope = Envelope::Direct { socket_id: socket_id.into(), payload };
        self.publish_raw(&self.direct_channel(instance_id), &envelope).await;
    }

    pub async fn publish_disconnect(&self, instance_id: &str, socket_id: impl Into<String>, reason: impl Into<String>) {
        let envelope = Envelope::Disconnect { socket_id: socket_id.into(), reason: reason.into() };
        self.publish_raw(&self.direct_channel(instance_id), &envelope).await;
    }

    pub async fn publish_join(&self, instance_id: &str, socket_id: impl Into<String>, room: impl Into<String>) {
        let envelope = Envelope::Join { socket_id: socket_id.into(), room: room.into() };
        self.publish_raw(&self.direct_channel(instance_id), &envelope).await;
    }

    pub async fn publish_leave(&self, instance_id: &str, socket_id: impl Into<String>, room: impl Into<String>) {
        let envelope = Envelope::Leave { socket_id: socket_id.into(), room: room.into() };
        self.publish_raw(&self.direct_channel(instance_id), &envelope).await;
    }

    /// Subscribe to this instance's broadcast + direct channels. Returns a
    /// channel of decoded envelopes; the background task exits quietly if
    /// the store is unreachable or the connection drops.
    pub fn subscribe(&self, own_instance_id: &str) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        let Some(client) = self.raw_client.clone() else {
            warn!("shared state degraded, subscribe is a no-op");
            return rx;
        };
        let broadcast_channel = self.broadcast_channel();
        let direct_channel = self.direct_channel(own_instance_id);

        tokio::spawn(async move {
            let conn = match client.get_async_connection().await {
                Ok(conn) => conn,
                Err(err) => {
                    warn!(error = %err, "failed to open pubsub connection");
                    return;
                },
            };
            let mut pubsub = conn.into_pubsub();
            if let Err(err) = pubsub.subscribe(&[broadcast_channel, direct_channel]).await {
                warn!(error = %err, "failed to subscribe to shared state channels");
                return;
            }
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(err) => {
                        warn!(error = %err, "undecodable pubsub payload");
                        continue;
                    },
                };
                if let Some(envelope) = Envelope::from_json(&payload) {
                    if tx.send(envelope).is_err() {
                        break;
                    }
                } else {
                    warn!("dropped pubsub message that did not decode as an envelope");
                }
            }
        });

        rx
    }

    pub async fn set_instance_info(&self, record: &InstanceRecord) {
        let Some(mut manager) = self.manager.clone() else {
            return;
        };
        let key = self.instance_key(&record.instance_id);
        let Ok(raw) = serde_json::to_string(record) else { return };
        if let Err(err) = manager
            .set_ex::<_, _, ()>(&key, raw, self.state_ttl_secs)
            .await
        {
            warn!(error = %err, "failed to write instance record");
        }
    }

    pub async fn remove_instance(&self, instance_id: &str) {
        let Some(mut manager) = self.manager.clone() else {
            return;
        };
        let key = self.instance_key(instance_id);
        let _: Result<(), redis::RedisError> = manager.del(&key).await;
    }

    #[must_use]
    pub async fn get_all_instances(&self) -> Vec<InstanceRecord> {
        let Some(mut manager) = self.manager.clone() else {
            return Vec::new();
        };
        let pattern = format!("{}:instances:*", self.key_prefix);
        let keys: Vec<String> = match manager.keys(&pattern).await {
            Ok(k) => k,
            Err(err) => {
                warn!(error = %err, "failed to list instance keys");
                return Vec::new();
            },
        };
        if keys.is_empty() {
            return Vec::new();
        }
        let values: HashMap<String, String> = match manager.mget(&keys).await.map(|vals: Vec<Option<String>>| {
            keys.into_iter().zip(vals).filter_map(|(k, v)| v.map(|v| (k, v))).collect()
        }) {
            Ok(m) => m,
            Err(err) => {
                warn!(error = %err, "failed to read instance records");
                return Vec::new();
            },
        };
        values
            .values()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect()
    }

    pub async fn record_connection_owner(&self, socket_id: &str, instance_id: &str) {
        let Some(mut manager) = self.manager.clone() else {
            return;
        };
        let key = self.connection_owner_key(socket_id);
        let _: Result<(), redis::RedisError> = manager
            .set_ex(&key, instance_id, self.state_ttl_secs)
            .await;
    }

    #[must_use]
    pub async fn get_connection_owner(&self, socket_id: &str) -> Option<String> {
        let mut manager = self.manager.clone()?;
        let key = self.connection_owner_key(socket_id);
        manager.get(&key).await.ok().flatten()
    }

    pub async fn remove_connection_owner(&self, socket_id: &str) {
        let Some(mut manager) = self.manager.clone() else {
            return;
        };
        let key = self.connection_owner_key(socket_id);
        let _: Result<(), redis::RedisError> = manager.del(&key).await;
    }

    /// Attempt to acquire a distributed lock via `SET NX PX`. Returns
    /// `false` both on lock contention and when the store is unreachable —
    /// callers should treat both as "fall back to local-only retry".
    pub async fn try_acquire_distributed_lock(&self, key: &str, ttl_ms: u64) -> bool {
        let Some(mut manager) = self.manager.clone() else {
            return false;
        };
        let lock_key = self.retry_lock_key(key);
        let opts = redis::SetOptions::default()
            .with_expiration(redis::SetExpiry::PX(ttl_ms))
            .conditional_set(redis::ExistenceCheck::NX);
        match manager.set_options::<_, _, Option<String>>(&lock_key, "1", opts).await {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(err) => {
                warn!(error = %err, "distributed lock attempt failed, falling back to local retry");
                false
            },
        }
    }

    pub async fn release_distributed_lock(&self, key: &str) {
        let Some(mut manager) = self.manager.clone() else {
            return;
        };
        let lock_key = self.retry_lock_key(key);
        let _: Result<(), redis::RedisError> = manager.del(&lock_key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn degraded_client() -> SharedStateClient {
        let config = SharedStoreConfig::default();
        SharedStateClient::degraded(&config)
    }

    #[tokio::test]
    async fn degraded_client_reports_disconnected() {
        let client = degraded_client();
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn degraded_client_returns_empty_instance_list() {
        let client = degraded_client();
        assert!(client.get_all_instances().await.is_empty());
    }

    #[tokio::test]
    async fn degraded_client_lock_attempt_fails_closed() {
        let client = degraded_client();
        assert!(!client.try_acquire_distributed_lock("k", 1000).await);
    }

    #[tokio::test]
    async fn degraded_client_publish_is_a_silent_noop() {
        let client = degraded_client();
        client.publish_broadcast("inst-1", "room:lobby", serde_json::json!({})).await;
    }

    #[test]
    fn channel_naming_is_prefixed() {
        let client = degraded_client();
        assert_eq!(client.broadcast_channel(), "gw:broadcast");
        assert_eq!(client.direct_channel("i1"), "gw:direct:i1");
    }
}
