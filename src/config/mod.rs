//! Configuration parsing, validation and the bridge catalog.

pub mod env;
pub mod parser;
pub mod provider;
pub mod types;
pub mod validate;

use std::path::Path;

pub use parser::{load_config, load_config_str};
pub use provider::{
    BridgeBinding, BridgeCatalog, CommandTemplates, ConfigProvider, SharedConfigProvider,
};
pub use types::*;

use crate::common::error::ConfigError;

/// Load a config file, apply environment overrides and validate it.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let config = env::apply_env_overrides(load_config(path)?);
    validate::validate_config(&config)?;
    Ok(config)
}
