//! `sourcechat models`: List the model registry.

use sourcechat_chat::{ModelSpec, SourcesPlacement};
use sourcechat_config::AppConfig;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    let registry = super::registry(config)?;

    println!(
        "{:<20} {:>8} {:>8}  {:<16} {:<5} {:<8} SOURCES",
        "MODEL", "LIMIT", "BUDGET", "TOKENIZER", "SEED", "TEMP"
    );
    for spec in registry.list() {
        let marker = if spec.id == config.openai.model_name { " *" } else { "" };
        println!("{}{marker}", row(spec));
    }
    Ok(())
}

fn row(spec: &ModelSpec) -> String {
    let caps = &spec.capabilities;
    let placement = match caps.sources_placement {
        SourcesPlacement::SystemMessage => "system",
        SourcesPlacement::UserMessage => "user",
    };
    format!(
        "{:<20} {:>8} {:>8}  {:<16} {:<5} {:<8.2} {placement}",
        spec.id,
        spec.context_limit,
        spec.prompt_budget(),
        spec.tokenizer,
        if caps.supports_seed { "yes" } else { "no" },
        caps.default_temperature,
    )
}
