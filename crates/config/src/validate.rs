//! Startup validation: reject configuration that would leave the gateway in
//! a programmatically-broken state (spec §7: configuration errors are fatal).

use crate::schema::{GatewayConfig, LoadThreshold};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub path: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }
}

fn check_threshold_order(path: &'static str, t: LoadThreshold, out: &mut Vec<Diagnostic>) {
    if !(t.elevated <= t.high && t.high <= t.critical) {
        out.push(Diagnostic {
            severity: Severity::Error,
            path,
            message: format!(
                "thresholds must satisfy elevated <= high <= critical, got {}/{}/{}",
                t.elevated, t.high, t.critical
            ),
        });
    }
}

/// Validate a loaded configuration, returning every diagnostic found.
#[must_use]
pub fn validate(config: &GatewayConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();

    check_threshold_order("load.cpu_percent", config.load.cpu_percent, &mut diagnostics);
    check_threshold_order(
        "load.memory_percent",
        config.load.memory_percent,
        &mut diagnostics,
    );
    check_threshold_order("load.connections", config.load.connections, &mut diagnostics);
    check_threshold_order(
        "load.event_loop_lag_ms",
        config.load.event_loop_lag_ms,
        &mut diagnostics,
    );

    if config.server.port == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path: "server.port",
            message: "port must be nonzero".into(),
        });
    }

    if config.backend.max_retries > 20 {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            path: "backend.max_retries",
            message: "max_retries above 20 is unusual and may exhaust the backoff cap quickly".into(),
        });
    }

    if config.backend.distributed_retry_enabled && config.shared_store.url.is_none() {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            path: "backend.distributed_retry_enabled",
            message: "distributed retry is enabled but no shared_store.url is configured; it will \
                      silently fall back to local retry"
                .into(),
        });
    }

    if config.auth.jwt_secret.is_none() {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            path: "auth.jwt_secret",
            message: "no jwt secret configured; bearer token verification will always fail".into(),
        });
    }

    ValidationResult { diagnostics }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors() {
        let result = validate(&GatewayConfig::default());
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
    }

    #[test]
    fn out_of_order_thresholds_are_an_error() {
        let mut cfg = GatewayConfig::default();
        cfg.load.cpu_percent.critical = 10.0;
        let result = validate(&cfg);
        assert!(result.has_errors());
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut cfg = GatewayConfig::default();
        cfg.server.port = 0;
        assert!(validate(&cfg).has_errors());
    }
}
