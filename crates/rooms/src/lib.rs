//! Room manager (spec §4.D): named membership groups used for broadcast
//! fan-out.
//!
//! Rooms live in a single `RwLock`-guarded map, mirroring the registry's
//! single-synchronization-domain design (spec §5). A `Room`'s membership is
//! authoritative here; the connection registry only keeps a weak
//! back-reference, updated through the post-mutation hooks below, for
//! cheap lookups of "what rooms is this socket in" without taking the
//! room manager's lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use gateway_common::clock;
use gateway_registry::ConnectionRegistry;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomType {
    User,
    Group,
    System,
    Other,
}

impl RoomType {
    /// Infer a room's type from its name by the gateway's naming convention.
    /// Rooms created explicitly as system rooms always carry `System`
    /// regardless of name.
    #[must_use]
    pub fn infer(name: &str) -> Self {
        if let Some(rest) = name.strip_prefix("user:") {
            if !rest.is_empty() {
                return Self::User;
            }
        }
        if name.starts_with("system:") {
            return Self::System;
        }
        if name.starts_with("room:") {
            return Self::Group;
        }
        Self::Other
    }
}

/// Build the conventional room name for a user's private room.
#[must_use]
pub fn user_room_name(user_id: &str) -> String {
    format!("user:{user_id}")
}

/// Build the conventional room name for a named group room.
#[must_use]
pub fn group_room_name(name: &str) -> String {
    format!("room:{name}")
}

#[derive(Debug, Clone)]
pub struct Room {
    pub name: String,
    pub room_type: RoomType,
    pub members: HashSet<String>,
    pub metadata: Map<String, Value>,
    pub created_at: u64,
}

impl Room {
    fn new(name: String, room_type: RoomType) -> Self {
        Self {
            name,
            room_type,
            members: HashSet::new(),
            metadata: Map::new(),
            created_at: clock::now_millis(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RoomError {
    #[error("no room named {0}")]
    NotFound(String),
}

/// The room manager: a single actor over `name -> Room`.
pub struct RoomManager {
    rooms: RwLock<HashMap<String, Room>>,
    registry: Arc<ConnectionRegistry>,
}

impl RoomManager {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            registry,
        }
    }

    /// Add a socket to a room, creating it (with an inferred type) if it
    /// doesn't exist yet. Joining a room twice is a no-op.
    pub async fn add_to_room(&self, socket_id: &str, room_name: &str) {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(room_name.to_string())
            .or_insert_with(|| Room::new(room_name.to_string(), RoomType::infer(room_name)));
        room.members.insert(socket_id.to_string());
        drop(rooms);
        self.registry.record_room_joined(socket_id, room_name).await;
    }

    /// Remove a socket from a room. Non-system rooms with no remaining
    /// members are deleted; system rooms persist empty (spec §4.D
    /// invariant).
    pub async fn remove_from_room(&self, socket_id: &str, room_name: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(room_name) {
            room.members.remove(socket_id);
            if room.members.is_empty() && room.room_type != RoomType::System {
                rooms.remove(room_name);
            }
        }
        drop(rooms);
        self.registry.record_room_left(socket_id, room_name).await;
    }

    /// Remove a socket from every room it currently belongs to, resolved
    /// from the registry's weak back-reference.
    pub async fn leave_all_rooms(&self, socket_id: &str) {
        let Some(conn) = self.registry.get(socket_id).await else {
            return;
        };
        for room_name in conn.rooms {
            self.remove_from_room(socket_id, &room_name).await;
        }
        self.registry.clear_rooms(socket_id).await;
    }

    /// Snapshot of member socket ids for local delivery. Cross-instance
    /// fan-out (publishing to the shared broadcast channel, spec §4.E) is
    /// the caller's responsibility — this crate only owns membership.
    #[must_use]
    pub async fn broadcast_to_room(&self, room_name: &str) -> Vec<String> {
        self.rooms
            .read()
            .await
            .get(room_name)
            .map(|r| r.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub async fn get_rooms_by_type(&self, room_type: RoomType) -> Vec<String> {
        self.rooms
            .read()
            .await
            .values()
            .filter(|r| r.room_type == room_type)
            .map(|r| r.name.clone())
            .collect()
    }

    #[must_use]
    pub async fn get_room_details(&self, room_name: &str) -> Option<Room> {
        self.rooms.read().await.get(room_name).cloned()
    }

    pub async fn set_metadata(
        &self,
        room_name: &str,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), RoomError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_name)
            .ok_or_else(|| RoomError::NotFound(room_name.to_string()))?;
        room.metadata.insert(key.into(), value);
        Ok(())
    }

    /// Create a persistent room that survives having zero members, used
    /// for broadcast targets like `system:announcements`.
    pub async fn create_system_room(&self, name: &str, metadata: Map<String, Value>) {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(name.to_string())
            .or_insert_with(|| Room::new(name.to_string(), RoomType::System));
        room.room_type = RoomType::System;
        room.metadata.extend(metadata);
    }

    #[must_use]
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> RoomManager {
        let registry = Arc::new(ConnectionRegistry::new());
        registry.connect("s1", None, None).await;
        registry.connect("s2", None, None).await;
        RoomManager::new(registry)
    }

    #[tokio::test]
    async fn join_then_leave_is_a_no_op() {
        let mgr = setup().await;
        mgr.add_to_room("s1", "room:lobby").await;
        mgr.remove_from_room("s1", "room:lobby").await;
        assert!(mgr.get_room_details("room:lobby").await.is_none());
    }

    #[tokio::test]
    async fn joining_twice_is_idempotent() {
        let mgr = setup().await;
        mgr.add_to_room("s1", "room:lobby").await;
        mgr.add_to_room("s1", "room:lobby").await;
        let room = mgr.get_room_details("room:lobby").await.unwrap();
        assert_eq!(room.members.len(), 1);
    }

    #[tokio::test]
    async fn non_system_room_auto_deletes_when_empty() {
        let mgr = setup().await;
        mgr.add_to_room("s1", "room:lobby").await;
        mgr.add_to_room("s2", "room:lobby").await;
        mgr.remove_from_room("s1", "room:lobby").await;
        assert!(mgr.get_room_details("room:lobby").await.is_some());
        mgr.remove_from_room("s2", "room:lobby").await;
        assert!(mgr.get_room_details("room:lobby").await.is_none());
    }

    #[tokio::test]
    async fn system_room_persists_when_empty() {
        let mgr = setup().await;
        mgr.create_system_room("system:announcements", Map::new()).await;
        mgr.add_to_room("s1", "system:announcements").await;
        mgr.remove_from_room("s1", "system:announcements").await;
        let room = mgr.get_room_details("system:announcements").await.unwrap();
        assert_eq!(room.room_type, RoomType::System);
        assert!(room.members.is_empty());
    }

    #[tokio::test]
    async fn leave_all_rooms_clears_every_membership() {
        let mgr = setup().await;
        mgr.add_to_room("s1", "room:a").await;
        mgr.add_to_room("s1", "room:b").await;
        mgr.leave_all_rooms("s1").await;
        assert!(mgr.get_room_details("room:a").await.is_none());
        assert!(mgr.get_room_details("room:b").await.is_none());
        let conn = mgr.registry.get("s1").await.unwrap();
        assert!(conn.rooms.is_empty());
    }

    #[tokio::test]
    async fn get_rooms_by_type_filters_correctly() {
        let mgr = setup().await;
        mgr.add_to_room("s1", "room:lobby").await;
        mgr.add_to_room("s1", "user:u1").await;
        mgr.create_system_room("system:announcements", Map::new()).await;

        assert_eq!(mgr.get_rooms_by_type(RoomType::Group).await, vec!["room:lobby"]);
        assert_eq!(mgr.get_rooms_by_type(RoomType::User).await, vec!["user:u1"]);
        assert_eq!(
            mgr.get_rooms_by_type(RoomType::System).await,
            vec!["system:announcements"]
        );
    }

    #[tokio::test]
    async fn broadcast_to_room_returns_member_snapshot() {
        let mgr = setup().await;
        mgr.add_to_room("s1", "room:lobby").await;
        mgr.add_to_room("s2", "room:lobby").await;
        let mut members = mgr.broadcast_to_room("room:lobby").await;
        members.sort();
        assert_eq!(members, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn set_metadata_requires_existing_room() {
        let mgr = setup().await;
        assert!(mgr.set_metadata("room:none", "k", Value::Bool(true)).await.is_err());
        mgr.add_to_room("s1", "room:lobby").await;
        assert!(mgr.set_metadata("room:lobby", "k", Value::Bool(true)).await.is_ok());
        let room = mgr.get_room_details("room:lobby").await.unwrap();
        assert_eq!(room.metadata.get("k"), Some(&Value::Bool(true)));
    }
}
