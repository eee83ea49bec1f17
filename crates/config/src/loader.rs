use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::GatewayConfig};

const CONFIG_FILENAMES: &[&str] = &["gateway.toml"];

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Load config from an explicit path.
pub fn load_config(path: &Path) -> Result<GatewayConfig, LoadError> {
    let raw = std::fs::read_to_string(path).map_err(|e| LoadError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let raw = substitute_env(&raw);
    toml::from_str(&raw).map_err(|e| LoadError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Discover `gateway.toml` in the working directory or `~/.config/gateway/`,
/// falling back to defaults, then apply `GATEWAY_*` environment overrides.
#[must_use]
pub fn discover_and_load() -> GatewayConfig {
    let mut config = if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                GatewayConfig::default()
            },
        }
    } else {
        debug!("no config file found, using defaults");
        GatewayConfig::default()
    };
    apply_env_overrides(&mut config);
    config
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }
    if let Some(dirs) = directories::ProjectDirs::from("", "", "gateway") {
        for name in CONFIG_FILENAMES {
            let p = dirs.config_dir().join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }
    None
}

/// Apply a handful of commonly-overridden `GATEWAY_*` environment variables
/// on top of a loaded (or default) config — covers the configuration
/// surface items most often tuned per-deployment without editing the file.
pub fn apply_env_overrides(config: &mut GatewayConfig) {
    if let Ok(v) = std::env::var("GATEWAY_BIND_ADDRESS") {
        config.server.bind_address = v;
    }
    if let Some(v) = std::env::var("GATEWAY_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
    {
        config.server.port = v;
    }
    if let Ok(v) = std::env::var("GATEWAY_INSTANCE_ID") {
        config.instance.id = Some(v);
    }
    if let Ok(v) = std::env::var("GATEWAY_SHARED_STORE_URL") {
        config.shared_store.url = Some(v);
    }
    if let Ok(v) = std::env::var("GATEWAY_BACKEND_BASE_URL") {
        config.backend.base_url = v;
    }
    if let Ok(v) = std::env::var("GATEWAY_JWT_SECRET") {
        config.auth.jwt_secret = Some(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrips_through_toml() {
        let cfg = GatewayConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: GatewayConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.port, cfg.server.port);
        assert_eq!(
            parsed.load.cpu_percent.critical,
            cfg.load.cpu_percent.critical
        );
    }

    #[test]
    fn load_missing_file_errors() {
        let err = load_config(Path::new("/nonexistent/gateway.toml")).unwrap_err();
        assert!(matches!(err, LoadError::Read { .. }));
    }

    #[test]
    fn env_override_applies_on_top_of_defaults() {
        unsafe {
            std::env::set_var("GATEWAY_PORT", "9999");
        }
        let mut cfg = GatewayConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.server.port, 9999);
        unsafe {
            std::env::remove_var("GATEWAY_PORT");
        }
    }
}
