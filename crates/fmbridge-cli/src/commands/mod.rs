//! CLI command implementations for `found`.
//!
//! - **`info`**: Report model availability, model details and the context window
//! - **`quest`**: One-shot generation, optionally with tools or structured output
//! - **`stream`**: Generation delivered chunk by chunk
//! - **`tool`**: Run a built-in tool directly, or ask the model to use it
//!
//! Each command module exports an `*Args` struct implementing `clap::Args` and
//! a `run` function.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use console::style;
use fmbridge_core::{Bridge, BridgeConfig, Session, Tool};

pub mod info;
pub mod quest;
pub mod stream;
pub mod tool;

/// Loads the shim and fails unless the model can be used right now.
fn available_bridge(config: BridgeConfig) -> Result<Arc<Bridge>> {
    let bridge = Bridge::init_global(config).context("failed to load the model shim")?;
    let availability = bridge.availability();
    if !availability.is_available() {
        bail!(
            "model not available on this device ({})",
            availability.describe()
        );
    }
    Ok(bridge)
}

/// Creates a session and registers `tools` on it.
fn open_session(
    config: BridgeConfig,
    instructions: Option<&str>,
    tools: Vec<Arc<dyn Tool>>,
) -> Result<Session> {
    let bridge = available_bridge(config)?;
    let mut session = Session::new(bridge, instructions).context("failed to create session")?;

    if let Some(instructions) = session.instructions() {
        println!("{} {}", style("System:").dim(), instructions);
        println!(
            "{} {}/{} tokens",
            style("Initial context:").dim(),
            session.context_size(),
            session.max_context_size()
        );
    }

    for tool in tools {
        let name = tool.name().to_string();
        session
            .register_tool(tool)
            .with_context(|| format!("failed to register tool '{name}'"))?;
    }
    Ok(session)
}

fn print_context_usage(session: &Session) {
    let usage = format!(
        "Context: {}/{} tokens ({:.1}% used)",
        session.context_size(),
        session.max_context_size(),
        session.context_usage_percent()
    );
    if session.is_context_near_limit() {
        println!("{} {}", style("⚠").yellow().bold(), style(usage).yellow());
        println!("  Consider starting a new session; the context window is nearly full.");
    } else {
        println!("{}", style(usage).dim());
    }
}
