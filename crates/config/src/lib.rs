//! Configuration loading, validation and env substitution for the gateway.
//!
//! Config file: `gateway.toml`, searched in `./` then `~/.config/gateway/`.
//! Every string value supports `${ENV_VAR}` substitution; a handful of
//! commonly-tuned fields also have direct `GATEWAY_*` environment overrides
//! applied after the file is parsed.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, discover_and_load, load_config, LoadError},
    schema::{
        AuthConfig, BackendConfig, BatcherConfig, GatewayConfig, InstanceConfig, LoadConfig,
        LoadThreshold, ServerConfig, SharedStoreConfig,
    },
    validate::{validate, Diagnostic, Severity, ValidationResult},
};
