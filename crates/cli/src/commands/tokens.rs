//! `sourcechat tokens`: Count tokens the way the context builder does.

use std::io::Read;

use anyhow::Context;
use sourcechat_chat::{TiktokenCounter, TokenCounter};
use sourcechat_config::AppConfig;

pub fn run(config: &AppConfig, model: Option<String>, text: Option<String>) -> anyhow::Result<()> {
    let model = model.unwrap_or_else(|| config.openai.model_name.clone());
    let text = match text {
        Some(t) => t,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    let registry = super::registry(config)?;
    let spec = registry.spec(&model)?;
    let tokens = TiktokenCounter::new().count(&text, &spec.tokenizer)?;

    println!("{tokens}");
    tracing::debug!(
        model = %model,
        tokenizer = %spec.tokenizer,
        limit = spec.context_limit,
        "Counted tokens"
    );
    Ok(())
}
