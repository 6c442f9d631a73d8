//! Configuration type definitions.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::common::reconnect::ReconnectConfig;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Homeserver base URL used by the protocol client.
    pub homeserver: String,
    /// Server name appended to local ids (`@local:<domain>`).
    pub homeserver_domain: String,
    /// Bridge definitions keyed by platform name (`wa`, `signal`, ...).
    pub bridges: BTreeMap<String, BridgeConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// One platform bridge bot.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Bot identity, e.g. `@whatsappbot:example.org`.
    pub bot: String,
    /// Prefix of the bridge's puppet users, e.g. `@whatsapp_`.
    pub puppet_prefix: Option<String>,
    pub commands: CommandConfig,
    /// Success template; `%s` is a wildcard.
    pub success: Option<String>,
}

/// Command vocabulary understood by a bridge bot.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    pub login: Option<String>,
    pub devices: Option<String>,
    pub cancel: Option<String>,
    /// Token that marks a failure notice (substring match).
    pub failed: Option<String>,
}

/// Sync and pairing tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub poll_interval_secs: u64,
    pub pairing_timeout_secs: u64,
    pub stale_event_grace_secs: u64,
    pub event_buffer: usize,
    pub dedup_window: usize,
    pub account_concurrency: usize,
    pub restart_min_delay_secs: u64,
    pub restart_max_delay_secs: u64,
    pub restart_factor: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            pairing_timeout_secs: 300,
            stale_event_grace_secs: 100,
            event_buffer: 256,
            dedup_window: 512,
            account_concurrency: 4,
            restart_min_delay_secs: 5,
            restart_max_delay_secs: 300,
            restart_factor: 1.5,
        }
    }
}

/// Runtime settings derived from `SyncConfig`.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    /// Bounded wait after which an unanswered pairing resolves as timed out.
    pub pairing_timeout: Duration,
    /// Events older than a session's start minus this are history replay.
    pub stale_event_grace: Duration,
    pub event_buffer: usize,
    pub dedup_window: usize,
    pub account_concurrency: usize,
    pub restart: ReconnectConfig,
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            pairing_timeout: Duration::from_secs(config.pairing_timeout_secs),
            stale_event_grace: Duration::from_secs(config.stale_event_grace_secs),
            event_buffer: config.event_buffer.max(1),
            dedup_window: config.dedup_window,
            account_concurrency: config.account_concurrency.max(1),
            restart: ReconnectConfig {
                initial_delay: Duration::from_secs(config.restart_min_delay_secs),
                max_delay: Duration::from_secs(config.restart_max_delay_secs),
                multiplier: config.restart_factor as f32,
                jitter: true,
            },
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl Config {
    /// Runtime sync settings.
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings::from(&self.sync)
    }

    /// Platform names in a stable order.
    pub fn platforms(&self) -> Vec<&str> {
        self.bridges.keys().map(String::as_str).collect()
    }
}
