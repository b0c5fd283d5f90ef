pub mod ask;
pub mod config_cmd;
pub mod models;
pub mod tokens;

use std::path::Path;

use anyhow::Context;
use sourcechat_chat::ModelRegistry;
use sourcechat_config::AppConfig;

/// Load from `path`, or the default location, with environment overrides.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(p) => AppConfig::load_with_env(p),
        None => AppConfig::load(),
    };
    config.context("Failed to load config")
}

/// Built-in models plus `[[models]]` entries from the config.
pub fn registry(config: &AppConfig) -> anyhow::Result<ModelRegistry> {
    ModelRegistry::builtin()
        .with_overrides(&config.models)
        .context("Invalid [[models]] entry")
}
