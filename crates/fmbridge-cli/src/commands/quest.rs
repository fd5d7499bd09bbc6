//! `found quest` command implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use fmbridge_core::{
    BridgeConfig, GenerationConfig, GenerationOptions, Request, StructuredResponse, is_error_text,
};

use super::{open_session, print_context_usage};
use crate::tools;

/// Arguments for the `quest` command.
#[derive(Args)]
pub struct QuestArgs {
    /// The question or instruction for the model
    pub prompt: String,

    /// System instructions for the session
    #[arg(short, long)]
    pub instructions: Option<String>,

    /// Tools the model may call (comma separated, e.g. `calculate`)
    #[arg(short, long, value_delimiter = ',')]
    pub tools: Vec<String>,

    /// Sampling temperature, 0.0 (deterministic) to 1.0 (creative)
    #[arg(long, conflicts_with_all = ["tools", "structured"])]
    pub temperature: Option<f32>,

    /// Upper bound on generated tokens
    #[arg(long, conflicts_with_all = ["tools", "structured"])]
    pub max_tokens: Option<i32>,

    /// Seconds to wait for an answer (default: from config, else 60)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Ask for a JSON envelope with content, metadata and confidence
    #[arg(long, conflicts_with = "tools")]
    pub structured: bool,
}

pub async fn run(args: &QuestArgs, config: BridgeConfig) -> Result<()> {
    let timeout = args
        .timeout
        .map_or_else(|| config.generation.timeout(), Duration::from_secs);
    let request = build_request(args, &config.generation);
    let tools = tools::resolve(&args.tools)?;

    let mut session = open_session(config, args.instructions.as_deref(), tools)?;

    println!("{} {}", style("→").cyan(), style(&args.prompt).bold());
    let answer = session
        .respond_with_timeout(timeout, request)
        .await
        .context("generation failed")?;

    if is_error_text(&answer) {
        println!("{} {}", style("✗").red().bold(), answer);
    } else if args.structured {
        print_structured(&answer)?;
    } else {
        println!("{answer}");
    }

    println!();
    print_context_usage(&session);
    session.release();
    Ok(())
}

/// Chooses the entry point: structured, tools, parameterized or plain.
///
/// Generation flags conflict with `--tools` and `--structured` on the command
/// line; config defaults only apply to plain requests.
fn build_request(args: &QuestArgs, defaults: &GenerationConfig) -> Request {
    if args.structured {
        return Request::structured(&args.prompt);
    }
    if !args.tools.is_empty() {
        return Request::tools(&args.prompt);
    }

    let temperature = args.temperature.or(defaults.temperature);
    let max_tokens = args.max_tokens.or(defaults.max_tokens);
    if temperature.is_none() && max_tokens.is_none() {
        return Request::respond(&args.prompt);
    }

    let options = GenerationOptions {
        temperature,
        max_tokens,
        ..GenerationOptions::default()
    };
    Request::with_options(&args.prompt, options)
}

fn print_structured(answer: &str) -> Result<()> {
    let Ok(envelope) = StructuredResponse::parse(answer) else {
        println!("{answer}");
        return Ok(());
    };

    println!("{}", envelope.content);
    if let Some(confidence) = envelope.confidence {
        println!("{} {:.0}%", style("Confidence:").dim(), confidence * 100.0);
    }
    if let Some(metadata) = &envelope.metadata {
        println!("{}", style("Metadata:").dim());
        println!("{}", serde_json::to_string_pretty(metadata)?);
    }
    Ok(())
}
