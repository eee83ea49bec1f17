//! Wire format for cross-instance messages (spec §4.E envelope vocabulary).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Envelope {
    /// Fan out to every socket in `room`, on every instance. `origin` is the
    /// publishing instance's id, so the publisher's own subscriber (the
    /// broadcast channel loops back to every subscriber, including the
    /// sender) can skip redelivering what it already applied locally.
    Broadcast {
        room: String,
        payload: Value,
        origin: String,
    },
    /// Deliver to a single socket owned by the instance subscribed to the
    /// direct channel this was published on.
    Direct { socket_id: String, payload: Value },
    /// Force-close a socket owned by the receiving instance.
    Disconnect { socket_id: String, reason: String },
    /// Mirror a room join onto the receiving instance's local bookkeeping.
    Join { socket_id: String, room: String },
    /// Mirror a room leave onto the receiving instance's local bookkeeping.
    Leave { socket_id: String, room: String },
    /// An application-defined fan-out event, not interpreted by the gateway
    /// itself. Same self-echo concern as `Broadcast`.
    CrossInstance {
        event: String,
        payload: Value,
        origin: String,
    },
}

impl Envelope {
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    #[must_use]
    pub fn from_json(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let envelope = Envelope::Broadcast {
            room: "room:lobby".into(),
            payload: serde_json::json!({"text": "hi"}),
            origin: "inst-1".into(),
        };
        let raw = envelope.to_json();
        let decoded = Envelope::from_json(&raw).unwrap();
        match decoded {
            Envelope::Broadcast { room, .. } => assert_eq!(room, "room:lobby"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(Envelope::from_json("not json").is_none());
    }
}
