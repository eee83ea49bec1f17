//! Load-based admission control (spec §4.G).

pub mod classify;
pub mod monitor;
pub mod rate_counter;

pub use classify::{classify_metric, classify_snapshot, connection_throttle_engaged, message_throttle_engaged, LoadLevel, LoadSnapshot};
pub use monitor::LoadMonitor;
pub use rate_counter::RateCounter;
