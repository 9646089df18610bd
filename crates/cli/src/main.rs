//! kbase CLI
//!
//! Main entry point for the kbase command-line tool: knowledge base
//! management and grounded question answering.

mod commands;

use clap::{Parser, Subcommand};
use commands::{AskCommand, KnowledgeCommand};
use kbase_core::{config::AppConfig, logging};
use std::path::PathBuf;

/// kbase - document knowledge bases with retrieval-augmented answers
#[derive(Parser, Debug)]
#[command(name = "kbase")]
#[command(about = "Document knowledge bases with retrieval-augmented answers", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "KBASE_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "KBASE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Model provider (dashscope, openai, ollama, mock)
    #[arg(short, long, global = true, env = "KBASE_PROVIDER")]
    provider: Option<String>,

    /// Chat model identifier
    #[arg(short, long, global = true, env = "KBASE_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask a question against a knowledge base
    Ask(AskCommand),

    /// Knowledge base management
    Knowledge(KnowledgeCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    let config = AppConfig::load()?.with_overrides(
        cli.workspace,
        cli.config,
        cli.provider,
        cli.model,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );

    logging::init_logging(config.log_level.as_deref(), config.no_color)?;

    tracing::info!("kbase starting");
    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!("Provider: {}", config.llm.provider);
    tracing::debug!("Model: {}", config.llm.chat_model);

    config.validate()?;
    config.ensure_kbase_dir()?;

    let command_name = match &cli.command {
        Commands::Ask(_) => "ask",
        Commands::Knowledge(_) => "knowledge",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Ask(cmd) => cmd.execute(&config).await,
        Commands::Knowledge(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    Ok(result?)
}
