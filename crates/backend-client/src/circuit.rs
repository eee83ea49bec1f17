//! Circuit breaker (spec §4.H), grounded on the `CircuitBreaker` state
//! machine from the pack's Fechatter auth-service reference — the teacher
//! repo has no outbound resilient-client code of its own to generalize.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
enum CircuitState {
    Closed,
    Open(Instant),
    HalfOpen,
}

pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    failure_count: AtomicU64,
    failure_threshold: u64,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU64::new(0),
            failure_threshold: u64::from(failure_threshold),
            reset_timeout,
        }
    }

    /// Whether a call may currently proceed. `Open` transitions to
    /// `HalfOpen` once the reset timeout has elapsed, admitting a single
    /// trial call.
    pub async fn is_available(&self) -> bool {
        let state = *self.state.read().await;
        match state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open(since) => {
                if since.elapsed() > self.reset_timeout {
                    *self.state.write().await = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            },
        }
    }

    /// A single success in `HalfOpen` closes the circuit.
    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        match *state {
            CircuitState::HalfOpen => {
                *state = CircuitState::Closed;
                self.failure_count.store(0, Ordering::SeqCst);
            },
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            },
            CircuitState::Open(_) => {},
        }
    }

    pub async fn record_failure(&self) {
        let mut state = self.state.write().await;
        match *state {
            CircuitState::Closed => {
                let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count >= self.failure_threshold {
                    *state = CircuitState::Open(Instant::now());
                    warn!(failures = count, "circuit breaker opened");
                }
            },
            CircuitState::HalfOpen => {
                *state = CircuitState::Open(Instant::now());
                warn!("circuit breaker re-opened from half-open probe");
            },
            CircuitState::Open(_) => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(2, Duration::from_millis(50));
        assert!(cb.is_available().await);
        cb.record_failure().await;
        assert!(cb.is_available().await);
        cb.record_failure().await;
        assert!(!cb.is_available().await);
    }

    #[tokio::test]
    async fn half_opens_after_timeout_then_closes_on_single_success() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(10));
        cb.record_failure().await;
        assert!(!cb.is_available().await);
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(cb.is_available().await);
        cb.record_success().await;
        assert!(cb.is_available().await);
        // A fresh failure now needs the full threshold again.
        cb.record_failure().await;
        assert!(cb.is_available().await);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_circuit() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(10));
        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(cb.is_available().await);
        cb.record_failure().await;
        assert!(!cb.is_available().await);
    }
}
