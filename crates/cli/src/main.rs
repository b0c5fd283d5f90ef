//! SourceChat CLI entry point.
//!
//! Commands:
//! - `ask`: Answer one question from the indexed documents (NDJSON on stdout)
//! - `models`: List known models and their token budgets
//! - `tokens`: Count tokens in a piece of text for a model
//! - `config`: Show the effective configuration or a default file

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "sourcechat",
    about = "SourceChat: retrieval-augmented chat over indexed documents",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.sourcechat/config.toml)
    #[arg(short, long, global = true, env = "SOURCECHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question, streaming records as JSON lines
    Ask(commands::ask::AskArgs),

    /// List known models
    Models,

    /// Count tokens for a model
    Tokens {
        /// Model id from the registry
        #[arg(short, long)]
        model: Option<String>,

        /// Text to count; read from stdin when omitted
        text: Option<String>,
    },

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: commands::config_cmd::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only records
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ask(args) => commands::ask::run(&config, args).await?,
        Commands::Models => commands::models::run(&config)?,
        Commands::Tokens { model, text } => commands::tokens::run(&config, model, text)?,
        Commands::Config { action } => commands::config_cmd::run(&config, action)?,
    }

    Ok(())
}
