//! Wire protocol for the gateway's socket event surface and push metadata
//! envelope (spec §6).
//!
//! Every inbound/outbound socket message is a JSON object carrying an
//! `event` name and an opaque payload. Inbound event names and their
//! required payload shapes are modeled as tagged variants (spec §9: "model
//! as tagged variants per event name with explicit required fields; reject
//! or coerce at the dispatcher boundary") rather than as an untyped map.

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

/// Hard cap on a single inbound frame's serialized size.
pub const MAX_FRAME_BYTES: usize = 262_144; // 256 KiB

/// Default socket ping interval, used by the gateway's keepalive loop.
pub const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;

/// Default inactivity window after which a socket is considered dead if no
/// pong/activity has been observed.
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 60_000;

// ── Generic wire envelopes ───────────────────────────────────────────────────

/// The raw shape of any inbound client → gateway frame, before the event
/// name is matched against a known variant.
#[derive(Debug, Clone, Deserialize)]
pub struct RawInboundFrame {
    pub event: String,
    #[serde(default = "serde_json::Value::default")]
    pub data: serde_json::Value,
}

/// The wire shape of a gateway → client frame.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundFrame {
    pub event: String,
    pub payload: serde_json::Value,
}

impl OutboundFrame {
    #[must_use]
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

// ── Inbound event payloads (client → server) ────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterParams {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticateParams {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyTokenParams {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomParams {
    pub room: String,
}

/// Shared shape for `client:event` / `client:message` / `client:action`,
/// each requiring a different discriminator field (`type` / `content` /
/// `action`) but otherwise carrying an opaque object.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEventParams {
    pub r#type: Option<String>,
    pub content: Option<serde_json::Value>,
    pub action: Option<serde_json::Value>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl ClientEventParams {
    /// Validate the required discriminator is present for the given kind.
    pub fn require_discriminator(&self, kind: ClientEventKind) -> Result<(), &'static str> {
        let present = match kind {
            ClientEventKind::Event => self.r#type.is_some(),
            ClientEventKind::Message => self.content.is_some(),
            ClientEventKind::Action => self.action.is_some(),
        };
        if present {
            Ok(())
        } else {
            Err(kind.missing_field_error())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEventKind {
    Event,
    Message,
    Action,
}

impl ClientEventKind {
    #[must_use]
    pub fn socket_event_name(self) -> &'static str {
        match self {
            Self::Event => "client:event",
            Self::Message => "client:message",
            Self::Action => "client:action",
        }
    }

    #[must_use]
    pub fn backend_path(self) -> &'static str {
        match self {
            Self::Event => "/api/events",
            Self::Message => "/api/messages",
            Self::Action => "/api/actions",
        }
    }

    #[must_use]
    pub fn ack_event_name(self) -> &'static str {
        match self {
            Self::Event => "server:response",
            Self::Message => "message:ack",
            Self::Action => "action:result",
        }
    }

    fn missing_field_error(self) -> &'static str {
        match self {
            Self::Event => "missing required field 'type'",
            Self::Message => "missing required field 'content'",
            Self::Action => "missing required field 'action'",
        }
    }
}

/// A fully decoded, dispatchable inbound event.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Register(RegisterParams),
    Authenticate(AuthenticateParams),
    VerifyToken(VerifyTokenParams),
    Ping(serde_json::Value),
    RoomJoin(RoomParams),
    RoomLeave(RoomParams),
    ClientEvent(ClientEventKind, ClientEventParams),
    Unknown(String, serde_json::Value),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid payload for event '{event}': {reason}")]
    InvalidPayload { event: String, reason: String },
}

impl RawInboundFrame {
    /// Decode the raw frame into a typed [`InboundEvent`], validating the
    /// shape required by each event name.
    pub fn decode(self) -> Result<InboundEvent, DecodeError> {
        let event = self.event.as_str();
        let bad = |reason: String| DecodeError::InvalidPayload {
            event: self.event.clone(),
            reason,
        };

        match event {
            "register" => serde_json::from_value(self.data)
                .map(InboundEvent::Register)
                .map_err(|e| bad(e.to_string())),
            "authenticate" => serde_json::from_value(self.data)
                .map(InboundEvent::Authenticate)
                .map_err(|e| bad(e.to_string())),
            "verify-token" => serde_json::from_value(self.data)
                .map(InboundEvent::VerifyToken)
                .map_err(|e| bad(e.to_string())),
            "ping" => Ok(InboundEvent::Ping(self.data)),
            "room:join" => serde_json::from_value(self.data)
                .map(InboundEvent::RoomJoin)
                .map_err(|e| bad(e.to_string())),
            "room:leave" => serde_json::from_value(self.data)
                .map(InboundEvent::RoomLeave)
                .map_err(|e| bad(e.to_string())),
            "client:event" | "client:message" | "client:action" => {
                let kind = match event {
                    "client:event" => ClientEventKind::Event,
                    "client:message" => ClientEventKind::Message,
                    _ => ClientEventKind::Action,
                };
                let params: ClientEventParams =
                    serde_json::from_value(self.data).map_err(|e| bad(e.to_string()))?;
                params
                    .require_discriminator(kind)
                    .map_err(|e| bad(e.to_string()))?;
                Ok(InboundEvent::ClientEvent(kind, params))
            },
            other => Ok(InboundEvent::Unknown(other.to_string(), self.data)),
        }
    }
}

// ── Outbound payloads (server → client) ─────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct WelcomePayload {
    pub message: String,
    #[serde(rename = "socketId")]
    pub socket_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AckPayload {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AckPayload {
    #[must_use]
    pub fn ok(extra: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            success: true,
            error: None,
            extra,
        }
    }

    #[must_use]
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PongPayload {
    pub timestamp: u64,
    pub echo: serde_json::Value,
    pub authenticated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub event: String,
    pub message: String,
    pub code: String,
}

// ── Push metadata envelope (spec §4.K) ──────────────────────────────────────

/// Attached to every push-API delivery so consumers can trace it back to the
/// originating request.
#[derive(Debug, Clone, Serialize)]
pub struct PushMeta {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub timestamp: u64,
    pub source: &'static str,
}

impl PushMeta {
    #[must_use]
    pub fn new(request_id: impl Into<String>, timestamp: u64) -> Self {
        Self {
            request_id: request_id.into(),
            timestamp,
            source: "push-api",
        }
    }
}

/// Wraps an arbitrary payload with the `_meta` push envelope before it is
/// delivered to a socket, per spec §4.K.
#[must_use]
pub fn with_push_meta(mut payload: serde_json::Value, meta: &PushMeta) -> serde_json::Value {
    let meta_value = serde_json::to_value(meta).unwrap_or(serde_json::Value::Null);
    match payload.as_object_mut() {
        Some(obj) => {
            obj.insert("_meta".to_string(), meta_value);
            payload
        },
        None => serde_json::json!({ "value": payload, "_meta": meta_value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_register_with_token() {
        let raw = RawInboundFrame {
            event: "register".into(),
            data: serde_json::json!({ "userId": "u1", "token": "abc" }),
        };
        match raw.decode().unwrap() {
            InboundEvent::Register(p) => {
                assert_eq!(p.user_id, "u1");
                assert_eq!(p.token.as_deref(), Some("abc"));
            },
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn client_message_requires_content() {
        let raw = RawInboundFrame {
            event: "client:message".into(),
            data: serde_json::json!({ "notContent": 1 }),
        };
        assert!(raw.decode().is_err());
    }

    #[test]
    fn client_message_with_content_decodes() {
        let raw = RawInboundFrame {
            event: "client:message".into(),
            data: serde_json::json!({ "content": "hi" }),
        };
        assert!(matches!(
            raw.decode().unwrap(),
            InboundEvent::ClientEvent(ClientEventKind::Message, _)
        ));
    }

    #[test]
    fn unknown_event_passes_through() {
        let raw = RawInboundFrame {
            event: "custom:thing".into(),
            data: serde_json::json!({ "x": 1 }),
        };
        assert!(matches!(raw.decode().unwrap(), InboundEvent::Unknown(name, _) if name == "custom:thing"));
    }

    #[test]
    fn push_meta_merges_into_object_payload() {
        let meta = PushMeta::new("req-1", 123);
        let wrapped = with_push_meta(serde_json::json!({ "x": 1 }), &meta);
        assert_eq!(wrapped["x"], 1);
        assert_eq!(wrapped["_meta"]["requestId"], "req-1");
    }
}
