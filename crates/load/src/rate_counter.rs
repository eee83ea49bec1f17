//! Per-`(userId, eventName)` message-rate counter with a 1-second reset
//! horizon.
//!
//! Grounded on the `DashMap<Key, WindowState>` + periodic-cleanup pattern
//! used by the teacher's request throttle, generalized from a fixed
//! per-route window to a per-user-per-event one, so a per-event rate limit
//! override applies independently to each event a user sends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

const CLEANUP_EVERY_HITS: u64 = 1024;
const STALE_AFTER: Duration = Duration::from_secs(5);

struct Window {
    started_at: Instant,
    count: u32,
}

type Key = (String, String);

/// Tracks a rolling per-second message count per `(userId, eventName)` pair.
pub struct RateCounter {
    buckets: DashMap<Key, Window>,
    hits_seen: AtomicU64,
}

impl Default for RateCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateCounter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            hits_seen: AtomicU64::new(0),
        }
    }

    /// Record one message for `(user_id, event)`, returning the count
    /// observed in the current 1-second window (including this message).
    pub fn record(&self, user_id: &str, event: &str) -> u32 {
        self.record_at(user_id, event, Instant::now())
    }

    fn record_at(&self, user_id: &str, event: &str, now: Instant) -> u32 {
        let key = (user_id.to_string(), event.to_string());
        let count = match self.buckets.entry(key) {
            Entry::Occupied(mut occupied) => {
                let window = occupied.get_mut();
                if now.duration_since(window.started_at) >= Duration::from_secs(1) {
                    window.started_at = now;
                    window.count = 1;
                } else {
                    window.count += 1;
                }
                window.count
            },
            Entry::Vacant(vacant) => {
                vacant.insert(Window { started_at: now, count: 1 });
                1
            },
        };
        self.cleanup_if_needed(now);
        count
    }

    /// Convenience check: has `(user_id, event)` exceeded `limit` messages
    /// in the current window?
    pub fn is_over(&self, user_id: &str, event: &str, limit: u32) -> bool {
        self.record(user_id, event) > limit
    }

    pub fn remove(&self, user_id: &str, event: &str) {
        self.buckets.remove(&(user_id.to_string(), event.to_string()));
    }

    fn cleanup_if_needed(&self, now: Instant) {
        let seen = self.hits_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if !seen.is_multiple_of(CLEANUP_EVERY_HITS) {
            return;
        }
        self.buckets.retain(|_, w| now.duration_since(w.started_at) <= STALE_AFTER);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_within_the_same_window() {
        let counter = RateCounter::new();
        let now = Instant::now();
        assert_eq!(counter.record_at("u1", "message", now), 1);
        assert_eq!(counter.record_at("u1", "message", now), 2);
        assert_eq!(counter.record_at("u1", "message", now), 3);
    }

    #[test]
    fn resets_after_the_window_elapses() {
        let counter = RateCounter::new();
        let now = Instant::now();
        counter.record_at("u1", "message", now);
        counter.record_at("u1", "message", now);
        let later = now + Duration::from_millis(1100);
        assert_eq!(counter.record_at("u1", "message", later), 1);
    }

    #[test]
    fn keys_are_independent_per_user() {
        let counter = RateCounter::new();
        let now = Instant::now();
        counter.record_at("u1", "message", now);
        assert_eq!(counter.record_at("u2", "message", now), 1);
    }

    #[test]
    fn keys_are_independent_per_event() {
        let counter = RateCounter::new();
        let now = Instant::now();
        counter.record_at("u1", "message", now);
        assert_eq!(counter.record_at("u1", "typing", now), 1);
    }

    #[test]
    fn is_over_reports_limit_breach() {
        let counter = RateCounter::new();
        assert!(!counter.is_over("u1", "message", 2));
        assert!(!counter.is_over("u1", "message", 2));
        assert!(counter.is_over("u1", "message", 2));
    }
}
