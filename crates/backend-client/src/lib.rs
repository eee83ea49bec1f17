//! Resilient backend HTTP client (spec §4.H): a pooled `reqwest` client
//! wrapped in retry-with-backoff and a circuit breaker, with an optional
//! distributed-retry guard so a struggling backend isn't hammered by every
//! gateway instance retrying in lockstep.

pub mod backoff;
pub mod circuit;

use std::sync::Arc;
use std::time::Duration;

use gateway_common::{ErrorKind, GatewayError};
use gateway_config::BackendConfig;
use gateway_shared_state::SharedStateClient;
use serde_json::Value;
use tracing::{debug, warn};

use circuit::CircuitBreaker;

pub struct BackendClient {
    http: reqwest::Client,
    config: BackendConfig,
    circuit: CircuitBreaker,
    shared_state: Option<Arc<SharedStateClient>>,
}

impl BackendClient {
    pub fn new(config: BackendConfig, shared_state: Option<Arc<SharedStateClient>>) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .pool_max_idle_per_host(config.max_connections)
            .build()
            .map_err(|e| {
                GatewayError::new(ErrorKind::Configuration, "backend-client-init-failed", e.to_string())
                    .with_source(e)
            })?;
        let circuit = CircuitBreaker::new(config.circuit_failure_threshold, Duration::from_millis(config.circuit_reset_timeout_ms));
        Ok(Self { http, config, circuit, shared_state })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// POST a JSON body to `path` on the backend, retrying transient
    /// failures with exponential backoff. 4xx responses are never retried;
    /// 5xx, network errors, and timeouts are, up to `max_retries`.
    pub async fn post_json(&self, path: &str, body: Value) -> Result<Value, GatewayError> {
        if !self.circuit.is_available().await {
            return Err(GatewayError::new(
                ErrorKind::BackendService,
                "circuit-open",
                "backend circuit breaker is open",
            ));
        }

        let mut attempt = 0u32;
        loop {
            if attempt > 0 && self.config.distributed_retry_enabled {
                if let Some(shared_state) = &self.shared_state {
                    let lock_key = format!("{path}:{attempt}");
                    if !shared_state
                        .try_acquire_distributed_lock(&lock_key, self.config.distributed_retry_lock_ttl_ms)
                        .await
                    {
                        debug!(path, attempt, "another instance holds the retry lock, backing off without calling");
                        tokio::time::sleep(backoff::compute_delay(attempt, &self.config)).await;
                        attempt += 1;
                        if attempt > self.config.max_retries {
                            return Err(GatewayError::new(
                                ErrorKind::BackendService,
                                "retries-exhausted",
                                "backend call failed after distributed retry coordination",
                            ));
                        }
                        continue;
                    }
                }
            }

            match self.try_once(path, &body).await {
                Ok(value) => {
                    self.circuit.record_success().await;
                    return Ok(value);
                },
                Err(RetryOutcome::Terminal(err)) => {
                    self.circuit.record_failure().await;
                    return Err(err);
                },
                Err(RetryOutcome::Retryable(err)) => {
                    self.circuit.record_failure().await;
                    if attempt >= self.config.max_retries {
                        return Err(err);
                    }
                    let delay = backoff::compute_delay(attempt, &self.config);
                    warn!(path, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying backend call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
            }
        }
    }

    async fn try_once(&self, path: &str, body: &Value) -> Result<Value, RetryOutcome> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| RetryOutcome::Terminal(backend_error("invalid-response-body", e.to_string())));
        }

        let message = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(RetryOutcome::Terminal(
                GatewayError::new(ErrorKind::BackendService, "backend-rejected", message)
                    .with_details(serde_json::json!({"status": status.as_u16()})),
            ))
        } else {
            Err(RetryOutcome::Retryable(
                GatewayError::new(ErrorKind::BackendService, "backend-unavailable", message)
                    .with_details(serde_json::json!({"status": status.as_u16()})),
            ))
        }
    }
}

enum RetryOutcome {
    Retryable(GatewayError),
    Terminal(GatewayError),
}

fn backend_error(code: &str, message: String) -> GatewayError {
    GatewayError::new(ErrorKind::BackendService, code, message)
}

fn classify_transport_error(err: reqwest::Error) -> RetryOutcome {
    let gw = if err.is_timeout() {
        GatewayError::new(ErrorKind::Timeout, "backend-timeout", err.to_string())
    } else {
        GatewayError::new(ErrorKind::Connection, "backend-connection-failed", err.to_string())
    };
    RetryOutcome::Retryable(gw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_path() {
        let config = BackendConfig { base_url: "http://h:1/".into(), ..BackendConfig::default() };
        let client = BackendClient::new(config, None).unwrap();
        assert_eq!(client.url("/api/events"), "http://h:1/api/events");
    }
}
