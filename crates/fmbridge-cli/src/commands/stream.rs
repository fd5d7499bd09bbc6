//! `found stream` command implementation.

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use fmbridge_core::BridgeConfig;

use super::{open_session, print_context_usage};
use crate::tools;

/// Arguments for the `stream` command.
#[derive(Args)]
pub struct StreamArgs {
    /// The question or instruction for the model
    pub prompt: String,

    /// System instructions for the session
    #[arg(short, long)]
    pub instructions: Option<String>,

    /// Tools the model may call (comma separated); the answer then arrives in
    /// one piece
    #[arg(short, long, value_delimiter = ',')]
    pub tools: Vec<String>,
}

pub fn run(args: &StreamArgs, config: BridgeConfig) -> Result<()> {
    let tools = tools::resolve(&args.tools)?;
    let with_tools = !tools.is_empty();
    let mut session = open_session(config, args.instructions.as_deref(), tools)?;

    if with_tools {
        println!(
            "{} Tool-enabled answers arrive in one piece.",
            style("ℹ").blue()
        );
    } else if !session.bridge().supports_streaming() {
        println!(
            "{} The loaded shim cannot stream; the answer arrives in one piece.",
            style("ℹ").blue()
        );
    }

    println!("{} {}", style("→").cyan(), style(&args.prompt).bold());
    let mut sink = ChunkSink::new(io::stdout());
    let on_chunk = |chunk: &str, done: bool| sink.deliver(chunk, done);
    let streamed = if with_tools {
        session.respond_with_tools_streaming(&args.prompt, on_chunk)
    } else {
        session.respond_streaming(&args.prompt, on_chunk)
    };
    streamed.context("generation failed")?;
    sink.finish().context("failed to write answer")?;

    println!();
    print_context_usage(&session);
    session.release();
    Ok(())
}

/// Writes chunks as they arrive and keeps the first write error.
///
/// The native call cannot be stopped from a chunk callback, so after a
/// failure the remaining chunks are dropped and the error is reported once
/// the call returns.
struct ChunkSink<W> {
    out: W,
    error: Option<io::Error>,
}

impl<W: Write> ChunkSink<W> {
    fn new(out: W) -> Self {
        Self { out, error: None }
    }

    fn deliver(&mut self, chunk: &str, done: bool) {
        if self.error.is_some() {
            return;
        }
        let written = if done {
            writeln!(self.out)
        } else {
            write!(self.out, "{chunk}").and_then(|()| self.out.flush())
        };
        if let Err(e) = written {
            self.error = Some(e);
        }
    }

    fn finish(self) -> io::Result<()> {
        self.error.map_or(Ok(()), Err)
    }
}
