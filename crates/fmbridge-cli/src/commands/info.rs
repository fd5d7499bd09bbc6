//! `found info` command implementation.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use fmbridge_core::{Availability, Bridge, BridgeConfig, MAX_CONTEXT_SIZE};

/// Arguments for the `info` command.
#[derive(Args)]
pub struct InfoArgs {
    /// Print a JSON object instead of text
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: &InfoArgs, config: BridgeConfig) -> Result<()> {
    let bridge = Bridge::init_global(config).context("failed to load the model shim")?;
    let availability = bridge.availability();
    let model_info = bridge.model_info();

    if args.json {
        let report = serde_json::json!({
            "availability": {
                "code": availability.code(),
                "available": availability.is_available(),
                "status": availability.describe(),
            },
            "model": model_info,
            "library": bridge.library_path().map(|path| path.display().to_string()),
            "streaming": bridge.supports_streaming(),
            "contextWindow": MAX_CONTEXT_SIZE,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", style("Model").bold().underlined());
    println!("{}: {}", style("Availability").cyan(), describe(availability));
    println!("{}: {}", style("Details").cyan(), model_info.trim_end());
    println!("{}: {MAX_CONTEXT_SIZE} tokens", style("Context window").cyan());

    println!();
    println!("{}", style("Bridge").bold().underlined());
    if let Some(path) = bridge.library_path() {
        println!("{}: {}", style("Library").cyan(), path.display());
    }
    println!(
        "{}: {}",
        style("Streaming").cyan(),
        if bridge.supports_streaming() { "yes" } else { "no" }
    );

    if !availability.is_available() {
        println!();
        println!(
            "{} The on-device model is not available. Check the OS version and Apple Intelligence settings.",
            style("⚠").yellow().bold()
        );
    }

    Ok(())
}

fn describe(availability: Availability) -> String {
    let marker = match availability {
        Availability::Available => style("✓").green().bold(),
        Availability::NotReady => style("…").yellow().bold(),
        Availability::FeatureDisabled | Availability::DeviceIneligible => style("✗").red().bold(),
        Availability::Unknown(_) => style("?").yellow().bold(),
    };
    format!("{marker} {}", availability.describe())
}
