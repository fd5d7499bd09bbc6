//! Built-in tools the model can call.

use std::sync::Arc;

use anyhow::{Result, bail};
use fmbridge_core::Tool;

pub mod calculator;

/// Names accepted by `--tools`.
pub const AVAILABLE: &[&str] = &[calculator::NAME];

pub fn by_name(name: &str) -> Option<Arc<dyn Tool>> {
    match name {
        calculator::NAME => Some(Arc::new(calculator::Calculator)),
        _ => None,
    }
}

/// Resolves `--tools` names, failing on the first unknown one.
pub fn resolve(names: &[String]) -> Result<Vec<Arc<dyn Tool>>> {
    names
        .iter()
        .map(|name| match by_name(name) {
            Some(tool) => Ok(tool),
            None => bail!("unknown tool '{name}' (available: {})", AVAILABLE.join(", ")),
        })
        .collect()
}
