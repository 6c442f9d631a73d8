//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use crate::bridge::patterns::SuccessPattern;
use crate::common::error::ConfigError;
use crate::common::types::UserId;
use crate::config::types::Config;

/// Upper bound for `sync.stale_event_grace_secs` (30 days).
const MAX_STALE_EVENT_GRACE_SECS: u64 = 30 * 24 * 60 * 60;

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.homeserver.is_empty() {
        errors.push("homeserver is required".to_string());
    }
    if config.homeserver_domain.is_empty() {
        errors.push("homeserver_domain is required".to_string());
    }

    if config.bridges.is_empty() {
        errors.push("bridges is empty - no platforms configured".to_string());
    }

    for (platform, bridge) in &config.bridges {
        if !UserId::new(bridge.bot.as_str()).is_qualified() {
            errors.push(format!(
                "bridges.{}.bot '{}' must be a full user id (@name:domain)",
                platform, bridge.bot
            ));
        }

        match bridge.commands.login.as_deref() {
            Some(login) if !login.trim().is_empty() => {}
            _ => errors.push(format!("bridges.{}.commands.login is required", platform)),
        }

        if let Some(ref template) = bridge.success {
            if let Err(e) = SuccessPattern::compile(template) {
                errors.push(format!(
                    "bridges.{}.success is not a valid pattern: '{}' ({})",
                    platform, template, e
                ));
            }
        }

        if let Some(ref prefix) = bridge.puppet_prefix {
            if !prefix.starts_with('@') {
                errors.push(format!(
                    "bridges.{}.puppet_prefix '{}' must start with '@'",
                    platform, prefix
                ));
            }
        }
    }

    let sync = &config.sync;
    if sync.poll_interval_secs == 0 {
        errors.push("sync.poll_interval_secs must be non-zero".to_string());
    }
    if sync.pairing_timeout_secs == 0 {
        errors.push("sync.pairing_timeout_secs must be non-zero".to_string());
    }
    if sync.stale_event_grace_secs > MAX_STALE_EVENT_GRACE_SECS {
        errors.push(format!(
            "sync.stale_event_grace_secs must be at most {} (got {})",
            MAX_STALE_EVENT_GRACE_SECS, sync.stale_event_grace_secs
        ));
    }
    if sync.restart_factor < 1.0 {
        errors.push(format!(
            "sync.restart_factor must be at least 1.0 (got {})",
            sync.restart_factor
        ));
    }
    if sync.restart_max_delay_secs < sync.restart_min_delay_secs {
        errors.push("sync.restart_max_delay_secs must not be below restart_min_delay_secs".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::*;
    use std::collections::BTreeMap;

    fn make_valid_config() -> Config {
        let mut bridges = BTreeMap::new();
        bridges.insert(
            "wa".to_string(),
            BridgeConfig {
                bot: "@whatsappbot:example.org".to_string(),
                puppet_prefix: Some("@whatsapp_".to_string()),
                commands: CommandConfig {
                    login: Some("!wa login".to_string()),
                    devices: None,
                    cancel: Some("!wa cancel".to_string()),
                    failed: Some("Failed to log in".to_string()),
                },
                success: Some("Successfully logged in as %s".to_string()),
            },
        );
        Config {
            homeserver: "https://matrix.example.org".to_string(),
            homeserver_domain: "example.org".to_string(),
            bridges,
            sync: SyncConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&make_valid_config()).is_ok());
    }

    #[test]
    fn test_missing_homeserver() {
        let mut config = make_valid_config();
        config.homeserver = String::new();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("homeserver is required"));
    }

    #[test]
    fn test_no_bridges() {
        let mut config = make_valid_config();
        config.bridges.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_unqualified_bot() {
        let mut config = make_valid_config();
        config.bridges.get_mut("wa").unwrap().bot = "whatsappbot".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("bridges.wa.bot"));
    }

    #[test]
    fn test_missing_login_command() {
        let mut config = make_valid_config();
        config.bridges.get_mut("wa").unwrap().commands.login = None;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("commands.login is required"));
    }

    #[test]
    fn test_invalid_success_pattern() {
        let mut config = make_valid_config();
        config.bridges.get_mut("wa").unwrap().success = Some("[bad %s".to_string());
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("bridges.wa.success"));
    }

    #[test]
    fn test_stale_event_grace_out_of_range() {
        let mut config = make_valid_config();
        config.sync.stale_event_grace_secs = 10_000_000_000_000;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("stale_event_grace_secs"));

        config.sync.stale_event_grace_secs = MAX_STALE_EVENT_GRACE_SECS;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_multiple_errors() {
        let mut config = make_valid_config();
        config.sync.poll_interval_secs = 0;
        config.sync.restart_factor = 0.5;
        let err = validate_config(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("poll_interval_secs"));
        assert!(message.contains("restart_factor"));
    }
}
