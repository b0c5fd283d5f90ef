//! `sourcechat config`: Configuration helpers.

use clap::Subcommand;
use sourcechat_config::AppConfig;

const REDACTED: &str = "***";

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration with secrets masked
    Show,
    /// Print a default config file
    Init,
    /// Print the default config file location
    Path,
}

pub fn run(config: &AppConfig, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => println!("{}", toml::to_string_pretty(&redacted(config))?),
        ConfigAction::Init => println!("{}", AppConfig::default_toml()),
        ConfigAction::Path => {
            println!("{}", AppConfig::config_dir().join("config.toml").display())
        }
    }
    Ok(())
}

fn redacted(config: &AppConfig) -> AppConfig {
    let mask = |s: &Option<String>| s.as_ref().map(|_| REDACTED.to_string());
    let mut out = config.clone();
    out.openai.api_key = mask(&config.openai.api_key);
    out.search.api_key = mask(&config.search.api_key);
    out.storage.account_key = mask(&config.storage.account_key);
    out
}
