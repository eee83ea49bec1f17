//! Configuration schema covering every field enumerated in spec §6's
//! "Configuration surface". Field names are semantic, not wire-literal;
//! defaults match the values spec.md quotes inline.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
    pub cors_allow_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: 8080,
            ping_interval_ms: gateway_protocol::DEFAULT_PING_INTERVAL_MS,
            ping_timeout_ms: gateway_protocol::DEFAULT_PING_TIMEOUT_MS,
            cors_allow_origins: vec!["*".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedStoreConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    pub url: Option<String>,
    pub tls: bool,
    /// Prefix applied to every shared-state key (`<prefix>:instances:<id>`, …).
    pub key_prefix: String,
    /// TTL applied to instance and connection-state records.
    pub state_ttl_secs: u64,
    /// How often connection state is re-synced to the store in the background.
    pub sync_interval_secs: u64,
}

impl Default for SharedStoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 6379,
            password: None,
            db: 0,
            url: None,
            tls: false,
            key_prefix: "gw".into(),
            state_ttl_secs: 45,
            sync_interval_secs: 30,
        }
    }
}

impl SharedStoreConfig {
    /// The effective Redis connection URL.
    #[must_use]
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let scheme = if self.tls { "rediss" } else { "redis" };
        match &self.password {
            Some(pw) => format!("{scheme}://:{pw}@{}:{}/{}", self.host, self.port, self.db),
            None => format!("{scheme}://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub id: Option<String>,
    pub group: String,
    pub max_connections_per_instance: usize,
    pub load_balancing_enabled: bool,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            id: None,
            group: "default".into(),
            max_connections_per_instance: 20_000,
            load_balancing_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadThreshold {
    pub elevated: f64,
    pub high: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub check_interval_ms: u64,
    pub cpu_percent: LoadThreshold,
    pub memory_percent: LoadThreshold,
    pub connections: LoadThreshold,
    pub event_loop_lag_ms: LoadThreshold,
    pub max_connections_under_load: usize,
    pub max_message_rate_under_load: u32,
    /// Per-event overrides of the default message rate limit.
    pub rate_limit_overrides: std::collections::HashMap<String, u32>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 10_000,
            cpu_percent: LoadThreshold {
                elevated: 70.0,
                high: 85.0,
                critical: 95.0,
            },
            memory_percent: LoadThreshold {
                elevated: 70.0,
                high: 85.0,
                critical: 95.0,
            },
            connections: LoadThreshold {
                elevated: 1_000.0,
                high: 5_000.0,
                critical: 10_000.0,
            },
            event_loop_lag_ms: LoadThreshold {
                elevated: 100.0,
                high: 500.0,
                critical: 1_000.0,
            },
            max_connections_under_load: 1_000,
            max_message_rate_under_load: 20,
            rate_limit_overrides: std::collections::HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
    pub circuit_failure_threshold: u32,
    pub circuit_reset_timeout_ms: u64,
    pub distributed_retry_enabled: bool,
    pub distributed_retry_lock_ttl_ms: u64,
    pub max_connections: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9000".into(),
            timeout_ms: 5_000,
            max_retries: 3,
            initial_delay_ms: 100,
            backoff_factor: 2.0,
            max_delay_ms: 10_000,
            jitter_factor: 0.1,
            circuit_failure_threshold: 5,
            circuit_reset_timeout_ms: 30_000,
            distributed_retry_enabled: false,
            distributed_retry_lock_ttl_ms: 60_000,
            max_connections: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    pub max_batch_size: usize,
    pub max_delay_ms: u64,
    pub max_payload_bytes: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_delay_ms: 50,
            max_payload_bytes: 65_536,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC-SHA256 shared secret used to verify bearer credentials.
    pub jwt_secret: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { jwt_secret: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub shared_store: SharedStoreConfig,
    pub instance: InstanceConfig,
    pub load: LoadConfig,
    pub backend: BackendConfig,
    pub batcher: BatcherConfig,
    pub auth: AuthConfig,
}
