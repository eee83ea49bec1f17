//! Periodic load sampling and level/throttling transitions.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gateway_config::LoadConfig;
use sysinfo::System;
use tokio::sync::Mutex;
use tracing::info;

use crate::classify::{classify_snapshot, connection_throttle_engaged, message_throttle_engaged, LoadLevel, LoadSnapshot};
use crate::rate_counter::RateCounter;

const LAG_PROBE_INTERVAL: Duration = Duration::from_millis(50);

fn level_to_u8(level: LoadLevel) -> u8 {
    match level {
        LoadLevel::Normal => 0,
        LoadLevel::Elevated => 1,
        LoadLevel::High => 2,
        LoadLevel::Critical => 3,
    }
}

fn u8_to_level(v: u8) -> LoadLevel {
    match v {
        0 => LoadLevel::Normal,
        1 => LoadLevel::Elevated,
        2 => LoadLevel::High,
        _ => LoadLevel::Critical,
    }
}

/// Samples CPU/memory via `sysinfo`, tracks connection count and tokio
/// dispatch lag, and classifies load on a fixed interval.
pub struct LoadMonitor {
    config: LoadConfig,
    system: Mutex<System>,
    connection_count: AtomicU64,
    lag_ms: Arc<AtomicU64>,
    level: AtomicU8,
    connection_throttling: std::sync::atomic::AtomicBool,
    message_throttling: std::sync::atomic::AtomicBool,
    pub rate_counter: RateCounter,
}

impl LoadMonitor {
    #[must_use]
    pub fn new(config: LoadConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            system: Mutex::new(System::new_all()),
            connection_count: AtomicU64::new(0),
            lag_ms: Arc::new(AtomicU64::new(0)),
            level: AtomicU8::new(0),
            connection_throttling: std::sync::atomic::AtomicBool::new(false),
            message_throttling: std::sync::atomic::AtomicBool::new(false),
            rate_counter: RateCounter::new(),
        })
    }

    pub fn set_connection_count(&self, count: u64) {
        self.connection_count.store(count, Ordering::Relaxed);
    }

    #[must_use]
    pub fn level(&self) -> LoadLevel {
        u8_to_level(self.level.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn is_connection_throttling(&self) -> bool {
        self.connection_throttling.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_message_throttling(&self) -> bool {
        self.message_throttling.load(Ordering::Relaxed)
    }

    /// Per-event message rate limit while throttling: a named override if
    /// one is configured, else the global `max_message_rate_under_load`.
    #[must_use]
    pub fn message_rate_limit(&self, event: &str) -> u32 {
        self.config
            .rate_limit_overrides
            .get(event)
            .copied()
            .unwrap_or(self.config.max_message_rate_under_load)
    }

    #[must_use]
    pub fn max_connections_under_load(&self) -> usize {
        self.config.max_connections_under_load
    }

    async fn sample(&self) -> LoadSnapshot {
        let mut system = self.system.lock().await;
        system.refresh_cpu();
        system.refresh_memory();
        let cpu_percent = f64::from(system.global_cpu_info().cpu_usage());
        let memory_percent = if system.total_memory() == 0 {
            0.0
        } else {
            system.used_memory() as f64 / system.total_memory() as f64 * 100.0
        };
        LoadSnapshot {
            cpu_percent,
            memory_percent,
            connections: self.connection_count.load(Ordering::Relaxed) as f64,
            event_loop_lag_ms: self.lag_ms.load(Ordering::Relaxed) as f64,
        }
    }

    /// Spawn the dispatch-lag probe: a tight tokio interval whose overshoot
    /// past its scheduled tick approximates executor queueing delay.
    fn spawn_lag_probe(&self) -> tokio::task::JoinHandle<()> {
        let lag_ms = Arc::clone(&self.lag_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(LAG_PROBE_INTERVAL);
            let mut expected = Instant::now() + LAG_PROBE_INTERVAL;
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let overshoot = now.saturating_duration_since(expected);
                lag_ms.store(overshoot.as_millis() as u64, Ordering::Relaxed);
                expected = now + LAG_PROBE_INTERVAL;
            }
        })
    }

    /// Spawn the classification loop: samples, classifies, and logs
    /// `loadLevelChanged` / `throttlingChanged` transitions.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.spawn_lag_probe();
        let interval = Duration::from_millis(self.config.check_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let snapshot = self.sample().await;
                let new_level = classify_snapshot(&snapshot, &self.config);
                let old_level = self.level();
                if new_level != old_level {
                    self.level.store(level_to_u8(new_level), Ordering::Relaxed);
                    info!(
                        event = "loadLevelChanged",
                        from = old_level.as_str(),
                        to = new_level.as_str(),
                        cpu_percent = snapshot.cpu_percent,
                        memory_percent = snapshot.memory_percent,
                        connections = snapshot.connections,
                        event_loop_lag_ms = snapshot.event_loop_lag_ms,
                        "load level changed"
                    );
                }

                let was_connection_throttling = self.is_connection_throttling();
                let now_connection_throttling = connection_throttle_engaged(new_level);
                if now_connection_throttling != was_connection_throttling {
                    self.connection_throttling.store(now_connection_throttling, Ordering::Relaxed);
                    info!(
                        event = "connectionThrottlingChanged",
                        throttling = now_connection_throttling,
                        level = new_level.as_str(),
                        "connection throttling state changed"
                    );
                }

                let was_message_throttling = self.is_message_throttling();
                let now_message_throttling = message_throttle_engaged(new_level);
                if now_message_throttling != was_message_throttling {
                    self.message_throttling.store(now_message_throttling, Ordering::Relaxed);
                    info!(
                        event = "messageThrottlingChanged",
                        throttling = now_message_throttling,
                        level = new_level.as_str(),
                        "message throttling state changed"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_at_normal_and_not_throttling() {
        let monitor = LoadMonitor::new(LoadConfig::default());
        assert_eq!(monitor.level(), LoadLevel::Normal);
        assert!(!monitor.is_connection_throttling());
        assert!(!monitor.is_message_throttling());
    }

    #[tokio::test]
    async fn message_rate_limit_uses_override_when_present() {
        let mut config = LoadConfig::default();
        config.rate_limit_overrides.insert("client:event".into(), 5);
        let monitor = LoadMonitor::new(config);
        assert_eq!(monitor.message_rate_limit("client:event"), 5);
        assert_eq!(monitor.message_rate_limit("client:message"), 20);
    }

    #[tokio::test]
    async fn sample_reflects_configured_connection_count() {
        let monitor = LoadMonitor::new(LoadConfig::default());
        monitor.set_connection_count(42);
        let snapshot = monitor.sample().await;
        assert_eq!(snapshot.connections, 42.0);
    }
}
