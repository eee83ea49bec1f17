//! Monotonic time, wall-clock timestamps, and opaque id generation.
//!
//! Every other component consumes time and identity only through this
//! module — no component may call `Instant::now`, `Uuid::new_v4`, or read
//! `hostname`/`pid` directly.

use std::{
    sync::OnceLock,
    time::{SystemTime, UNIX_EPOCH},
};

/// Milliseconds since the Unix epoch, from the wall clock.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Wall-clock timestamp as RFC 3339 (ISO 8601).
#[must_use]
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// A collision-free opaque identifier, suitable for socket ids, request ids
/// and message ids.
#[must_use]
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

static INSTANCE_ID: OnceLock<String> = OnceLock::new();

/// A unique identifier for this process, stable for its lifetime.
///
/// Resolution order: `INSTANCE_ID` env var, else `<hostname>-<pid>-<rand>`.
#[must_use]
pub fn instance_id() -> &'static str {
    INSTANCE_ID.get_or_init(resolve_instance_id)
}

fn resolve_instance_id() -> String {
    if let Ok(v) = std::env::var("INSTANCE_ID")
        && !v.is_empty()
    {
        return v;
    }
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".into());
    let pid = std::process::id();
    let suffix = new_id();
    let short_suffix = &suffix[..8];
    format!("{host}-{pid}-{short_suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_is_stable() {
        assert_eq!(instance_id(), instance_id());
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_id(), new_id());
    }

    #[test]
    fn now_millis_is_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(b >= a);
    }
}
