//! Configuration file parsing (HOCON format).

use std::path::Path;

use hocon::HoconLoader;

use crate::common::error::ConfigError;
use crate::config::types::Config;

/// Load configuration from a HOCON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ConfigError::IoError {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        });
    }

    HoconLoader::new()
        .load_file(path)
        .map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?
        .resolve()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

/// Load configuration from a HOCON string.
pub fn load_config_str(content: &str) -> Result<Config, ConfigError> {
    HoconLoader::new()
        .load_str(content)
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?
        .resolve()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        homeserver = "https://matrix.example.org"
        homeserver_domain = "example.org"

        bridges {
            wa {
                bot = "@whatsappbot:example.org"
                puppet_prefix = "@whatsapp_"
                commands {
                    login = "!wa login"
                    devices = "!wa list-logins"
                    cancel = "!wa cancel"
                    failed = "Failed to log in"
                }
                success = "Successfully logged in as %s"
            }
            signal {
                bot = "@signalbot:example.org"
                commands {
                    login = "!signal login"
                }
            }
        }

        sync {
            poll_interval_secs = 10
        }
    "#;

    #[test]
    fn test_load_sample() {
        let config = load_config_str(SAMPLE).unwrap();
        assert_eq!(config.homeserver, "https://matrix.example.org");
        assert_eq!(config.platforms(), vec!["signal", "wa"]);

        let wa = &config.bridges["wa"];
        assert_eq!(wa.bot, "@whatsappbot:example.org");
        assert_eq!(wa.commands.login.as_deref(), Some("!wa login"));
        assert_eq!(wa.commands.failed.as_deref(), Some("Failed to log in"));
        assert_eq!(wa.success.as_deref(), Some("Successfully logged in as %s"));

        let signal = &config.bridges["signal"];
        assert!(signal.commands.cancel.is_none());
        assert!(signal.success.is_none());
    }

    #[test]
    fn test_sync_defaults_fill_missing_keys() {
        let config = load_config_str(SAMPLE).unwrap();
        assert_eq!(config.sync.poll_interval_secs, 10);
        assert_eq!(config.sync.pairing_timeout_secs, 300);
        assert_eq!(config.sync.stale_event_grace_secs, 100);
    }

    #[test]
    fn test_missing_file() {
        let err = load_config("/nonexistent/shortmesh.conf").unwrap_err();
        assert!(matches!(err, ConfigError::IoError { .. }));
    }

    #[test]
    fn test_missing_required_field() {
        let err = load_config_str("homeserver = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
