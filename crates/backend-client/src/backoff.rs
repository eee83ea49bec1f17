//! Exponential backoff with jitter (spec §4.H): `min(maxDelay, initial *
//! factor^attempt) + jitter`.

use std::time::Duration;

use gateway_config::BackendConfig;
use rand::Rng;

#[must_use]
pub fn compute_delay(attempt: u32, config: &BackendConfig) -> Duration {
    let base = config.initial_delay_ms as f64 * config.backoff_factor.powi(attempt as i32);
    let capped = base.min(config.max_delay_ms as f64);
    let jitter = capped * config.jitter_factor * rand::thread_rng().gen_range(-1.0..=1.0);
    Duration::from_millis((capped + jitter).max(0.0).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackendConfig {
        BackendConfig {
            initial_delay_ms: 100,
            backoff_factor: 2.0,
            max_delay_ms: 1_000,
            jitter_factor: 0.0,
            ..BackendConfig::default()
        }
    }

    #[test]
    fn grows_exponentially_without_jitter() {
        let c = config();
        assert_eq!(compute_delay(0, &c), Duration::from_millis(100));
        assert_eq!(compute_delay(1, &c), Duration::from_millis(200));
        assert_eq!(compute_delay(2, &c), Duration::from_millis(400));
    }

    #[test]
    fn caps_at_max_delay() {
        let c = config();
        assert_eq!(compute_delay(10, &c), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_is_symmetric_around_the_capped_delay() {
        let c = BackendConfig { jitter_factor: 0.5, ..config() };
        for _ in 0..100 {
            let delay = compute_delay(1, &c);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(300));
        }
    }
}
