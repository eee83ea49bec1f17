//! Connection registry (spec §4.C): socket ↔ user mapping, authentication
//! state, activity tracking, and inactivity eviction.
//!
//! All mutations go through a single `RwLock`-guarded map — one
//! synchronization domain, per spec §5. Reads return owned snapshots; no
//! caller can retain a reference into the internal map.
//!
//! Token verification for `register_user` is the caller's responsibility
//! (the gateway dispatcher calls `gateway-auth` before invoking this crate)
//! so the registry itself stays free of a credential-verification
//! dependency — see DESIGN.md.

use std::collections::{HashMap, HashSet};

use gateway_common::clock;
use tokio::sync::RwLock;

/// A single connected socket, owned exclusively by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub socket_id: String,
    pub user_id: Option<String>,
    pub authenticated: bool,
    pub token: Option<String>,
    pub user_agent: Option<String>,
    pub remote_address: Option<String>,
    pub connected_at: u64,
    pub last_activity: u64,
    /// Weak back-reference to room manager state — the registry is not the
    /// source of truth for membership.
    pub rooms: HashSet<String>,
}

impl Connection {
    fn new(socket_id: String, user_agent: Option<String>, remote_address: Option<String>) -> Self {
        let now = clock::now_millis();
        Self {
            socket_id,
            user_id: None,
            authenticated: false,
            token: None,
            user_agent,
            remote_address,
            connected_at: now,
            last_activity: now,
            rooms: HashSet::new(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = clock::now_millis();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no connection for socket {0}")]
    SocketNotFound(String),
}

#[derive(Default)]
struct Inner {
    connections: HashMap<String, Connection>,
    user_index: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn unlink_user(&mut self, user_id: &str, socket_id: &str) {
        if let Some(sockets) = self.user_index.get_mut(user_id) {
            sockets.remove(socket_id);
            if sockets.is_empty() {
                self.user_index.remove(user_id);
            }
        }
    }
}

/// The connection registry: a single actor guarding the socket↔user map.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly connected (as yet unauthenticated) socket.
    pub async fn connect(
        &self,
        socket_id: impl Into<String>,
        user_agent: Option<String>,
        remote_address: Option<String>,
    ) -> Connection {
        let socket_id = socket_id.into();
        let conn = Connection::new(socket_id.clone(), user_agent, remote_address);
        let mut inner = self.inner.write().await;
        inner.connections.insert(socket_id, conn.clone());
        conn
    }

    /// Bind a socket to a user. Creates the connection record if it does
    /// not already exist (defensive — normally `connect` runs first).
    /// Re-registering the same socket to the same user is a no-op beyond
    /// refreshing state (idempotent per spec §8).
    pub async fn register_user(
        &self,
        socket_id: &str,
        user_id: &str,
        token: Option<String>,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let now = clock::now_millis();

        let previous_user = inner.connections.get(socket_id).and_then(|c| c.user_id.clone());

        let conn = inner
            .connections
            .entry(socket_id.to_string())
            .or_insert_with(|| Connection::new(socket_id.to_string(), None, None));
        conn.user_id = Some(user_id.to_string());
        conn.authenticated = true;
        conn.token = token;
        conn.last_activity = now;

        if previous_user.as_deref() != Some(user_id) {
            if let Some(prev) = previous_user {
                inner.unlink_user(&prev, socket_id);
            }
            inner
                .user_index
                .entry(user_id.to_string())
                .or_default()
                .insert(socket_id.to_string());
        }

        Ok(())
    }

    /// Remove a socket's connection record. Idempotent.
    pub async fn remove_user(&self, socket_id: &str) -> Option<Connection> {
        let mut inner = self.inner.write().await;
        let removed = inner.connections.remove(socket_id);
        if let Some(conn) = &removed {
            if let Some(user_id) = &conn.user_id {
                inner.unlink_user(user_id, socket_id);
            }
        }
        removed
    }

    /// Refresh a socket's last-activity timestamp.
    pub async fn update_activity(&self, socket_id: &str) {
        if let Some(conn) = self.inner.write().await.connections.get_mut(socket_id) {
            conn.touch();
        }
    }

    /// Snapshot of every live socket id for a user.
    #[must_use]
    pub async fn get_sockets_for_user(&self, user_id: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .user_index
            .get(user_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// A snapshot of a single connection, if present.
    #[must_use]
    pub async fn get(&self, socket_id: &str) -> Option<Connection> {
        self.inner.read().await.connections.get(socket_id).cloned()
    }

    #[must_use]
    pub async fn contains(&self, socket_id: &str) -> bool {
        self.inner.read().await.connections.contains_key(socket_id)
    }

    #[must_use]
    pub async fn client_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Connections whose last activity predates `now - minutes`.
    #[must_use]
    pub async fn get_inactive_connections(&self, minutes: u64) -> Vec<Connection> {
        let cutoff = clock::now_millis().saturating_sub(minutes * 60_000);
        self.inner
            .read()
            .await
            .connections
            .values()
            .filter(|c| c.last_activity < cutoff)
            .cloned()
            .collect()
    }

    /// Remove every connection inactive for more than `minutes`, returning
    /// the removed socket ids so the caller can close the underlying
    /// sockets.
    pub async fn disconnect_inactive(&self, minutes: u64) -> Vec<String> {
        let inactive = self.get_inactive_connections(minutes).await;
        let mut removed = Vec::with_capacity(inactive.len());
        for conn in inactive {
            if self.remove_user(&conn.socket_id).await.is_some() {
                removed.push(conn.socket_id);
            }
        }
        removed
    }

    /// Record that a socket joined a room — invoked by the room manager's
    /// post-mutation hook (spec §9) to keep the weak back-reference
    /// current. Never the room manager's source of truth.
    pub async fn record_room_joined(&self, socket_id: &str, room: &str) {
        if let Some(conn) = self.inner.write().await.connections.get_mut(socket_id) {
            conn.rooms.insert(room.to_string());
        }
    }

    /// Symmetric with [`Self::record_room_joined`].
    pub async fn record_room_left(&self, socket_id: &str, room: &str) {
        if let Some(conn) = self.inner.write().await.connections.get_mut(socket_id) {
            conn.rooms.remove(room);
        }
    }

    /// Clear every room back-reference for a socket (used before
    /// `remove_user`, mirroring the dispatcher's `leaveAllRooms` → `removeUser`
    /// ordering in spec §4.C).
    pub async fn clear_rooms(&self, socket_id: &str) {
        if let Some(conn) = self.inner.write().await.connections.get_mut(socket_id) {
            conn.rooms.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_creates_unauthenticated_connection() {
        let registry = ConnectionRegistry::new();
        registry.connect("s1", None, None).await;
        let conn = registry.get("s1").await.unwrap();
        assert!(!conn.authenticated);
        assert!(conn.user_id.is_none());
        assert_eq!(registry.client_count().await, 1);
    }

    #[tokio::test]
    async fn register_user_links_user_index() {
        let registry = ConnectionRegistry::new();
        registry.connect("s1", None, None).await;
        registry.register_user("s1", "u1", None).await.unwrap();

        let conn = registry.get("s1").await.unwrap();
        assert!(conn.authenticated);
        assert_eq!(conn.user_id.as_deref(), Some("u1"));
        assert_eq!(registry.get_sockets_for_user("u1").await, vec!["s1"]);
    }

    #[tokio::test]
    async fn dual_connection_same_user() {
        let registry = ConnectionRegistry::new();
        registry.connect("s1", None, None).await;
        registry.connect("s2", None, None).await;
        registry.register_user("s1", "u2", None).await.unwrap();
        registry.register_user("s2", "u2", None).await.unwrap();

        let mut sockets = registry.get_sockets_for_user("u2").await;
        sockets.sort();
        assert_eq!(sockets, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn register_user_is_idempotent() {
        let registry = ConnectionRegistry::new();
        registry.connect("s1", None, None).await;
        registry.register_user("s1", "u1", None).await.unwrap();
        registry.register_user("s1", "u1", None).await.unwrap();
        assert_eq!(registry.get_sockets_for_user("u1").await, vec!["s1"]);
    }

    #[tokio::test]
    async fn remove_user_is_idempotent() {
        let registry = ConnectionRegistry::new();
        registry.connect("s1", None, None).await;
        registry.register_user("s1", "u1", None).await.unwrap();
        assert!(registry.remove_user("s1").await.is_some());
        assert!(registry.remove_user("s1").await.is_none());
        assert!(registry.get_sockets_for_user("u1").await.is_empty());
        assert_eq!(registry.client_count().await, 0);
    }

    #[tokio::test]
    async fn disconnect_cleanup_removes_user_index_entry() {
        let registry = ConnectionRegistry::new();
        registry.connect("s1", None, None).await;
        registry.register_user("s1", "u1", None).await.unwrap();
        registry.remove_user("s1").await;
        assert!(registry.get_sockets_for_user("u1").await.is_empty());
    }

    #[tokio::test]
    async fn inactive_connections_are_detected_by_cutoff() {
        let registry = ConnectionRegistry::new();
        registry.connect("s1", None, None).await;
        if let Some(conn) = registry.inner.write().await.connections.get_mut("s1") {
            conn.last_activity = 0;
        }
        let inactive = registry.get_inactive_connections(1).await;
        assert_eq!(inactive.len(), 1);
        let removed = registry.disconnect_inactive(1).await;
        assert_eq!(removed, vec!["s1".to_string()]);
        assert_eq!(registry.client_count().await, 0);
    }

    #[tokio::test]
    async fn switching_user_updates_both_index_entries() {
        let registry = ConnectionRegistry::new();
        registry.connect("s1", None, None).await;
        registry.register_user("s1", "u1", None).await.unwrap();
        registry.register_user("s1", "u2", None).await.unwrap();
        assert!(registry.get_sockets_for_user("u1").await.is_empty());
        assert_eq!(registry.get_sockets_for_user("u2").await, vec!["s1"]);
    }
}
