//! `found tool` command implementation.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use console::style;
use fmbridge_core::{BridgeConfig, Tool, ToolRegistry, is_error_text};

use super::{open_session, print_context_usage};
use crate::tools::calculator::{self, Calculator};

const CALCULATOR_INSTRUCTIONS: &str = "You are a helpful assistant with access to a calculate function.

The calculate function supports ONLY these operations:
- Addition (add, plus, +)
- Subtraction (subtract, minus, -)
- Multiplication (multiply, times, *)
- Division (divide, /)

When users ask mathematical questions:
- ALWAYS use the calculate function with basic math expressions
- Convert natural language to mathematical expressions (e.g., \"2 plus 2\" becomes \"2 + 2\")
- For unsupported operations (square root, powers, etc.), explain what operations are supported
- Never perform calculations yourself";

/// Arguments for the `tool` command.
#[derive(Args)]
pub struct ToolArgs {
    #[command(subcommand)]
    pub command: ToolCommand,
}

#[derive(Debug, Subcommand)]
pub enum ToolCommand {
    /// Evaluate an expression with the calculator tool, without the model
    Calculate {
        /// Two numbers and one operation, e.g. `144 divided by 12`
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        expression: Vec<String>,
    },

    /// Ask the model a math question it answers with the calculator tool
    Calc {
        /// The question, e.g. "What is 15 + 27?"
        question: String,
    },
}

pub fn run(args: &ToolArgs, config: BridgeConfig) -> Result<()> {
    match &args.command {
        ToolCommand::Calculate { expression } => calculate(&expression.join(" ")),
        ToolCommand::Calc { question } => ask(question, config),
    }
}

/// Runs the calculator through the same registry path the native callback
/// takes: JSON arguments in, validation, execution, result out.
fn calculate(expression: &str) -> Result<()> {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(Calculator));
    let args = serde_json::json!({ "arguments": expression }).to_string();

    let result = registry.invoke(calculator::NAME, &args);
    if result.is_error() {
        println!("{} {}", style("✗").red().bold(), result.error);
        bail!("calculation failed");
    }

    println!("{} {expression} = {}", style("✓").green().bold(), result.content);
    Ok(())
}

fn ask(question: &str, config: BridgeConfig) -> Result<()> {
    let mut session = open_session(
        config,
        Some(CALCULATOR_INSTRUCTIONS),
        vec![Arc::new(Calculator) as Arc<dyn Tool>],
    )?;

    println!("{} {}", style("→").cyan(), style(question).bold());
    let answer = session
        .respond_with_tools(question)
        .context("generation failed")?;
    if is_error_text(&answer) {
        println!("{} {}", style("✗").red().bold(), answer);
    } else {
        println!("{answer}");
    }

    println!();
    print_context_usage(&session);
    session.release();
    Ok(())
}
