//! Message batcher (spec §4.I): coalesces outbound messages per target
//! (typically a socket or room) behind a size/time/payload-bounded buffer
//! before handing them to a delivery callback.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use gateway_config::BatcherConfig;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

pub type BatchReadyCallback = Arc<dyn Fn(String, Vec<Value>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct TargetState {
    items: Vec<Value>,
    payload_bytes: usize,
    flush_scheduled: bool,
}

/// Batches items per target key, flushing on whichever bound is hit first:
/// item count, accumulated payload bytes, or elapsed time since the first
/// buffered item.
pub struct Batcher {
    config: BatcherConfig,
    targets: DashMap<String, Arc<Mutex<TargetState>>>,
    on_ready: BatchReadyCallback,
}

impl Batcher {
    #[must_use]
    pub fn new(config: BatcherConfig, on_ready: BatchReadyCallback) -> Arc<Self> {
        Arc::new(Self { config, targets: DashMap::new(), on_ready })
    }

    fn target_state(&self, target: &str) -> Arc<Mutex<TargetState>> {
        self.targets.entry(target.to_string()).or_default().clone()
    }

    /// Enqueue one item for `target`. May trigger an immediate flush if the
    /// batch is already at its size/payload bound; otherwise schedules a
    /// delayed flush for the first item in a fresh batch.
    pub async fn add(self: &Arc<Self>, target: &str, item: Value) {
        let item_bytes = serde_json::to_vec(&item).map(|v| v.len()).unwrap_or(0);
        let state_arc = self.target_state(target);
        let mut should_schedule = false;
        {
            let mut state = state_arc.lock().await;

            let would_overflow = !state.items.is_empty()
                && (state.items.len() >= self.config.max_batch_size
                    || state.payload_bytes + item_bytes > self.config.max_payload_bytes);
            if would_overflow {
                let items = std::mem::take(&mut state.items);
                state.payload_bytes = 0;
                state.flush_scheduled = false;
                drop(state);
                (self.on_ready)(target.to_string(), items).await;
                state = state_arc.lock().await;
            }

            state.items.push(item);
            state.payload_bytes += item_bytes;

            if state.items.len() >= self.config.max_batch_size
                || state.payload_bytes >= self.config.max_payload_bytes
            {
                let items = std::mem::take(&mut state.items);
                state.payload_bytes = 0;
                state.flush_scheduled = false;
                drop(state);
                (self.on_ready)(target.to_string(), items).await;
            } else if !state.flush_scheduled {
                state.flush_scheduled = true;
                should_schedule = true;
            }
        }

        if should_schedule {
            let this = Arc::clone(self);
            let target = target.to_string();
            let delay = Duration::from_millis(self.config.max_delay_ms);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                this.flush_target(&target).await;
            });
        }
    }

    /// Flush `target`'s current batch if non-empty. A no-op if another
    /// path (size/payload trigger) already drained it — the concurrent-
    /// flush guard is the per-target mutex plus the emptiness check.
    pub async fn flush_target(&self, target: &str) {
        let Some(state_arc) = self.targets.get(target).map(|e| e.clone()) else {
            return;
        };
        let items = {
            let mut state = state_arc.lock().await;
            state.flush_scheduled = false;
            if state.items.is_empty() {
                return;
            }
            state.payload_bytes = 0;
            std::mem::take(&mut state.items)
        };
        debug!(target, count = items.len(), "flushing batch");
        (self.on_ready)(target.to_string(), items).await;
    }

    /// Flush every target with a non-empty buffer, used on shutdown.
    pub async fn flush_all(&self) {
        let keys: Vec<String> = self.targets.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.flush_target(&key).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(max_batch_size: usize, max_delay_ms: u64, max_payload_bytes: usize) -> BatcherConfig {
        BatcherConfig { max_batch_size, max_delay_ms, max_payload_bytes }
    }

    fn counting_callback() -> (BatchReadyCallback, Arc<AtomicUsize>, Arc<Mutex<Vec<(String, usize)>>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let calls_clone = calls.clone();
        let seen_clone = seen.clone();
        let cb: BatchReadyCallback = Arc::new(move |target, items| {
            let calls = calls_clone.clone();
            let seen = seen_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                seen.lock().await.push((target, items.len()));
            })
        });
        (cb, calls, seen)
    }

    #[tokio::test]
    async fn flushes_immediately_at_max_batch_size() {
        let (cb, calls, seen) = counting_callback();
        let batcher = Batcher::new(config(2, 10_000, 1_000_000), cb);
        batcher.add("s1", Value::from(1)).await;
        batcher.add("s1", Value::from(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().await[0], ("s1".to_string(), 2));
    }

    #[tokio::test]
    async fn flushes_after_delay_when_under_size_bound() {
        let (cb, calls, _seen) = counting_callback();
        let batcher = Batcher::new(config(100, 20, 1_000_000), cb);
        batcher.add("s1", Value::from(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn payload_bound_triggers_flush() {
        let (cb, calls, _seen) = counting_callback();
        let big = Value::String("x".repeat(50));
        let batcher = Batcher::new(config(1_000, 10_000, 60), cb);
        batcher.add("s1", big.clone()).await;
        batcher.add("s1", big).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn targets_are_independent() {
        let (cb, calls, _seen) = counting_callback();
        let batcher = Batcher::new(config(1, 10_000, 1_000_000), cb);
        batcher.add("s1", Value::from(1)).await;
        batcher.add("s2", Value::from(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn flush_all_drains_every_pending_target() {
        let (cb, calls, _seen) = counting_callback();
        let batcher = Batcher::new(config(100, 10_000, 1_000_000), cb);
        batcher.add("s1", Value::from(1)).await;
        batcher.add("s2", Value::from(1)).await;
        batcher.flush_all().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
