//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `SHORTMESH_HOMESERVER` - Homeserver base URL
//! - `SHORTMESH_HOMESERVER_DOMAIN` - Homeserver server name
//! - `SHORTMESH_POLL_INTERVAL_SECS` - Account rescan interval
//! - `SHORTMESH_PAIRING_TIMEOUT_SECS` - Pairing reply timeout

use std::env;

use tracing::warn;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "SHORTMESH";

/// Apply environment variable overrides to a config.
pub fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(homeserver) = env::var(format!("{}_HOMESERVER", ENV_PREFIX)) {
        config.homeserver = homeserver;
    }
    if let Ok(domain) = env::var(format!("{}_HOMESERVER_DOMAIN", ENV_PREFIX)) {
        config.homeserver_domain = domain;
    }

    if let Some(secs) = parse_secs("POLL_INTERVAL_SECS") {
        config.sync.poll_interval_secs = secs;
    }
    if let Some(secs) = parse_secs("PAIRING_TIMEOUT_SECS") {
        config.sync.pairing_timeout_secs = secs;
    }

    config
}

fn parse_secs(name: &str) -> Option<u64> {
    let var = format!("{}_{}", ENV_PREFIX, name);
    let value = env::var(&var).ok()?;
    match value.parse() {
        Ok(secs) => Some(secs),
        Err(_) => {
            warn!("Ignoring {}: '{}' is not a number of seconds", var, value);
            None
        }
    }
}

/// Get the config file path from environment or use default.
///
/// Checks `SHORTMESH_CONFIG` environment variable, otherwise returns "shortmesh.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "shortmesh.conf".to_string())
}
