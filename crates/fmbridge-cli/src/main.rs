//! Command-line front end for the on-device model bridge.
//!
//! Usage:
//! ```bash
//! found info                           # Availability and model details
//! found quest "What is Rust?"          # One-shot generation
//! found quest -t calculate "15 + 27?"  # Generation with tools
//! found stream "Tell me a story"       # Streaming generation
//! found tool calculate 144 / 12        # Run a tool without the model
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fmbridge_core::BridgeConfig;
use tracing_subscriber::EnvFilter;

mod commands;
mod tools;

#[derive(Debug, Parser)]
#[command(name = "found", author, version, about)]
struct Cli {
    /// Log debug output, including every boundary crossing
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to an fmbridge.toml (default: resolved from the environment)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show model availability and details
    Info(commands::info::InfoArgs),

    /// Ask the model a question
    Quest(commands::quest::QuestArgs),

    /// Stream the model's answer as it is generated
    Stream(commands::stream::StreamArgs),

    /// Run or exercise the built-in tools
    Tool(commands::tool::ToolArgs),
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info(_) => f.debug_tuple("Info").finish(),
            Self::Quest(_) => f.debug_tuple("Quest").finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish(),
            Self::Tool(_) => f.debug_tuple("Tool").finish(),
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(level.parse().context("failed to parse log directive")?),
        )
        .init();
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    match path {
        Some(path) => {
            let mut config = BridgeConfig::load(path)
                .with_context(|| format!("failed to load config: {}", path.display()))?;
            config.apply_env_overrides();
            Ok(config)
        }
        None => BridgeConfig::load_resolved().context("failed to load config"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    let config = load_config(cli.config.as_deref())?;

    match &cli.command {
        Command::Info(args) => commands::info::run(args, config),
        Command::Quest(args) => commands::quest::run(args, config).await,
        Command::Stream(args) => commands::stream::run(args, config),
        Command::Tool(args) => commands::tool::run(args, config),
    }
}
