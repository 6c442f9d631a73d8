//! ShortMesh sync - configuration check.
//!
//! Loads and validates the bridge configuration and prints the bindings the
//! sync core would run with.

use anyhow::Result;
use tracing::{error, info};

use shortmesh_sync::config::env::get_config_path;
use shortmesh_sync::{load_and_validate, BridgeCatalog, ConfigProvider};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("ShortMesh sync v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args().nth(1).unwrap_or_else(get_config_path);
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;

    info!("Configuration loaded successfully");
    info!("  Homeserver: {}", config.homeserver);
    info!("  Domain: {}", config.homeserver_domain);

    let settings = config.sync_settings();
    info!(
        "  Sync: poll every {}s, pairing timeout {}s, {} account(s) at a time",
        settings.poll_interval.as_secs(),
        settings.pairing_timeout.as_secs(),
        settings.account_concurrency
    );

    let catalog = BridgeCatalog::from_config(&config);
    for binding in catalog.bindings() {
        info!(
            platform = %binding.platform,
            bot = %binding.bot,
            puppet_prefix = ?binding.puppet_prefix,
            login = ?binding.commands.login,
            devices = ?binding.commands.devices,
            cancel = ?binding.commands.cancel,
            success_pattern = binding.success.is_some(),
            "Bridge binding"
        );
    }
    info!("{} bridge(s) configured", catalog.len());

    Ok(())
}
