//! Load-level classification (spec §4.G): four metrics, each checked
//! against its own elevated/high/critical thresholds, collapsed to a
//! single level by taking the maximum severity across all four.

use gateway_config::{LoadConfig, LoadThreshold};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoadLevel {
    Normal,
    Elevated,
    High,
    Critical,
}

impl LoadLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Elevated => "elevated",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[must_use]
pub fn classify_metric(value: f64, threshold: &LoadThreshold) -> LoadLevel {
    if value >= threshold.critical {
        LoadLevel::Critical
    } else if value >= threshold.high {
        LoadLevel::High
    } else if value >= threshold.elevated {
        LoadLevel::Elevated
    } else {
        LoadLevel::Normal
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoadSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub connections: f64,
    pub event_loop_lag_ms: f64,
}

/// The load level is the worst of the four independent metric levels.
#[must_use]
pub fn classify_snapshot(snapshot: &LoadSnapshot, config: &LoadConfig) -> LoadLevel {
    [
        classify_metric(snapshot.cpu_percent, &config.cpu_percent),
        classify_metric(snapshot.memory_percent, &config.memory_percent),
        classify_metric(snapshot.connections, &config.connections),
        classify_metric(snapshot.event_loop_lag_ms, &config.event_loop_lag_ms),
    ]
    .into_iter()
    .max()
    .unwrap_or(LoadLevel::Normal)
}

/// Connection admission throttles only at `Critical`. No hysteresis: the
/// level alone decides, every check interval.
#[must_use]
pub fn connection_throttle_engaged(level: LoadLevel) -> bool {
    level == LoadLevel::Critical
}

/// Message throttling engages at `High` and `Critical`. No hysteresis.
#[must_use]
pub fn message_throttle_engaged(level: LoadLevel) -> bool {
    level >= LoadLevel::High
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threshold() -> LoadThreshold {
        LoadThreshold { elevated: 70.0, high: 85.0, critical: 95.0 }
    }

    #[test]
    fn classifies_each_band() {
        let t = threshold();
        assert_eq!(classify_metric(10.0, &t), LoadLevel::Normal);
        assert_eq!(classify_metric(70.0, &t), LoadLevel::Elevated);
        assert_eq!(classify_metric(85.0, &t), LoadLevel::High);
        assert_eq!(classify_metric(95.0, &t), LoadLevel::Critical);
    }

    #[test]
    fn snapshot_level_is_the_worst_metric() {
        let config = LoadConfig::default();
        let snapshot = LoadSnapshot {
            cpu_percent: 10.0,
            memory_percent: 10.0,
            connections: 0.0,
            event_loop_lag_ms: 1_000.0,
        };
        assert_eq!(classify_snapshot(&snapshot, &config), LoadLevel::Critical);
    }

    #[test]
    fn connection_throttle_engages_only_at_critical() {
        assert!(!connection_throttle_engaged(LoadLevel::Normal));
        assert!(!connection_throttle_engaged(LoadLevel::Elevated));
        assert!(!connection_throttle_engaged(LoadLevel::High));
        assert!(connection_throttle_engaged(LoadLevel::Critical));
    }

    #[test]
    fn message_throttle_engages_at_high_and_critical() {
        assert!(!message_throttle_engaged(LoadLevel::Normal));
        assert!(!message_throttle_engaged(LoadLevel::Elevated));
        assert!(message_throttle_engaged(LoadLevel::High));
        assert!(message_throttle_engaged(LoadLevel::Critical));
    }
}
