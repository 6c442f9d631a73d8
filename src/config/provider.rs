//! Static bridge bindings served to the sync core.
//!
//! `BridgeCatalog` is built once from a validated `Config`. Bindings are
//! immutable, so readers never need the per-user lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::bridge::patterns::{contains_failure, SuccessPattern};
use crate::common::error::ConfigError;
use crate::common::types::UserId;
use crate::config::types::Config;

/// Command templates a bridge bot understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplates {
    pub login: Option<String>,
    pub devices: Option<String>,
    pub cancel: Option<String>,
    /// Failure token, matched as a substring of notices.
    pub failed: Option<String>,
}

/// Everything the core needs to talk to one platform's bot.
#[derive(Debug, Clone)]
pub struct BridgeBinding {
    pub platform: String,
    pub bot: UserId,
    pub puppet_prefix: Option<String>,
    pub commands: CommandTemplates,
    pub success: Option<SuccessPattern>,
}

impl BridgeBinding {
    /// Login command, or a configuration error naming what is missing.
    pub fn login_command(&self) -> Result<&str, ConfigError> {
        self.command("login", self.commands.login.as_deref())
    }

    pub fn devices_command(&self) -> Result<&str, ConfigError> {
        self.command("devices", self.commands.devices.as_deref())
    }

    pub fn cancel_command(&self) -> Result<&str, ConfigError> {
        self.command("cancel", self.commands.cancel.as_deref())
    }

    fn command<'a>(&self, name: &str, value: Option<&'a str>) -> Result<&'a str, ConfigError> {
        value.ok_or_else(|| ConfigError::MissingCommand {
            platform: self.platform.clone(),
            command: name.to_string(),
        })
    }

    /// Whether `user` is one of this bridge's puppet users.
    pub fn is_puppet(&self, user: &UserId) -> bool {
        self.puppet_prefix
            .as_deref()
            .map(|prefix| user.as_str().starts_with(prefix))
            .unwrap_or(false)
    }
}

/// Source of per-platform bridge bindings.
pub trait ConfigProvider: Send + Sync {
    /// Binding for one platform.
    fn binding(&self, platform: &str) -> Option<&BridgeBinding>;

    /// All bindings, in a stable order.
    fn bindings(&self) -> Vec<&BridgeBinding>;

    /// Whether `text` matches the platform's success template.
    ///
    /// A platform without a template never matches.
    fn matches_success_pattern(&self, platform: &str, text: &str) -> bool {
        self.binding(platform)
            .and_then(|binding| binding.success.as_ref())
            .map(|pattern| pattern.is_match(text))
            .unwrap_or(false)
    }

    /// Whether `text` carries the platform's failure token.
    fn matches_failure(&self, platform: &str, text: &str) -> bool {
        self.binding(platform)
            .map(|binding| contains_failure(binding.commands.failed.as_deref(), text))
            .unwrap_or(false)
    }

    /// Platform whose bot is `user`, if any.
    fn platform_for_bot(&self, user: &UserId) -> Option<&str> {
        self.bindings()
            .into_iter()
            .find(|binding| &binding.bot == user)
            .map(|binding| binding.platform.as_str())
    }

    /// Platform whose puppet prefix matches `user`, if any.
    fn platform_for_puppet(&self, user: &UserId) -> Option<&str> {
        self.bindings()
            .into_iter()
            .find(|binding| binding.is_puppet(user))
            .map(|binding| binding.platform.as_str())
    }
}

/// Shared config provider handle.
pub type SharedConfigProvider = Arc<dyn ConfigProvider>;

/// Bindings compiled from configuration.
#[derive(Debug, Clone, Default)]
pub struct BridgeCatalog {
    bindings: BTreeMap<String, BridgeBinding>,
}

impl BridgeCatalog {
    /// Build the catalog from a config.
    ///
    /// Templates that fail to compile are logged and dropped; run
    /// `validate_config` first to reject them instead.
    pub fn from_config(config: &Config) -> Self {
        let bindings = config
            .bridges
            .iter()
            .map(|(platform, bridge)| {
                let success = bridge.success.as_deref().and_then(|template| {
                    SuccessPattern::compile(template)
                        .map_err(|e| {
                            warn!(platform = %platform, "Invalid success pattern '{}': {}", template, e)
                        })
                        .ok()
                });
                let binding = BridgeBinding {
                    platform: platform.clone(),
                    bot: UserId::new(bridge.bot.as_str()),
                    puppet_prefix: bridge.puppet_prefix.clone(),
                    commands: CommandTemplates {
                        login: bridge.commands.login.clone(),
                        devices: bridge.commands.devices.clone(),
                        cancel: bridge.commands.cancel.clone(),
                        failed: bridge.commands.failed.clone(),
                    },
                    success,
                };
                (platform.clone(), binding)
            })
            .collect();

        Self { bindings }
    }

    /// Build a catalog directly from bindings.
    pub fn from_bindings(bindings: impl IntoIterator<Item = BridgeBinding>) -> Self {
        Self {
            bindings: bindings
                .into_iter()
                .map(|binding| (binding.platform.clone(), binding))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl ConfigProvider for BridgeCatalog {
    fn binding(&self, platform: &str) -> Option<&BridgeBinding> {
        self.bindings.get(platform)
    }

    fn bindings(&self) -> Vec<&BridgeBinding> {
        self.bindings.values().collect()
    }
}

/// Look up a binding through any provider, or `MissingBinding`.
pub fn require_binding<'a>(
    provider: &'a dyn ConfigProvider,
    platform: &str,
) -> Result<&'a BridgeBinding, ConfigError> {
    provider
        .binding(platform)
        .ok_or_else(|| ConfigError::MissingBinding {
            platform: platform.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::load_config_str;

    fn catalog() -> BridgeCatalog {
        let config = load_config_str(
            r#"
            homeserver = "https://matrix.example.org"
            homeserver_domain = "example.org"
            bridges {
                wa {
                    bot = "@whatsappbot:example.org"
                    puppet_prefix = "@whatsapp_"
                    commands {
                        login = "!wa login"
                        cancel = "!wa cancel"
                        failed = "Failed to log in"
                    }
                    success = "Successfully logged in as %s"
                }
                signal {
                    bot = "@signalbot:example.org"
                    commands { login = "!signal login" }
                }
            }
            "#,
        )
        .unwrap();
        BridgeCatalog::from_config(&config)
    }

    #[test]
    fn test_binding_lookup() {
        let catalog = catalog();
        assert_eq!(catalog.len(), 2);
        let wa = catalog.binding("wa").unwrap();
        assert_eq!(wa.bot, UserId::new("@whatsappbot:example.org"));
        assert_eq!(wa.login_command().unwrap(), "!wa login");
        assert!(catalog.binding("telegram").is_none());
    }

    #[test]
    fn test_missing_command_is_config_error() {
        let catalog = catalog();
        let signal = catalog.binding("signal").unwrap();
        let err = signal.cancel_command().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingCommand { ref platform, ref command }
                if platform == "signal" && command == "cancel"
        ));
    }

    #[test]
    fn test_require_missing_binding() {
        let catalog = catalog();
        assert!(matches!(
            require_binding(&catalog, "telegram"),
            Err(ConfigError::MissingBinding { .. })
        ));
        assert!(require_binding(&catalog, "wa").is_ok());
    }

    #[test]
    fn test_success_and_failure_matching() {
        let catalog = catalog();
        assert!(catalog.matches_success_pattern("wa", "Successfully logged in as +1555"));
        assert!(!catalog.matches_success_pattern("signal", "Successfully logged in as +1555"));
        assert!(catalog.matches_failure("wa", "Failed to log in"));
        assert!(!catalog.matches_failure("signal", "Failed to log in"));
    }

    #[test]
    fn test_platform_lookup_by_identity() {
        let catalog = catalog();
        assert_eq!(
            catalog.platform_for_bot(&UserId::new("@signalbot:example.org")),
            Some("signal")
        );
        assert_eq!(
            catalog.platform_for_puppet(&UserId::new("@whatsapp_15551234:example.org")),
            Some("wa")
        );
        assert_eq!(catalog.platform_for_bot(&UserId::new("@alice:example.org")), None);
    }
}
