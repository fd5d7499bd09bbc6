//! Process-wide tool registry.
//!
//! The shim only knows tool *names*; when the model calls one, the callback
//! bridge looks the name up here. Sessions register into and clear from this
//! single map, so it is shared by every session in the process.
//!
//! # Name Collisions
//!
//! Names are global. If two sessions register different tools under the same
//! name, the later registration replaces the earlier one for *both* sessions,
//! and clearing either session removes the name for both. A collision is
//! logged at `warn`.
//!
//! # Concurrency
//!
//! Lookups take a read lock only long enough to clone the tool's [`Arc`];
//! tools execute without any registry lock held, so a tool may itself use the
//! registry.

use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, PoisonError, RwLock},
};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::tool::{Tool, ToolResult};

/// Serialized result returned when a result cannot be encoded.
const UNENCODABLE_RESULT: &str = r#"{"content":"","error":"failed to encode tool result"}"#;

/// Tools by name, shared by every session and the callback bridge.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `tool` under its name, replacing any tool already there.
    ///
    /// Returns the replaced tool.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        let name = tool.name().to_string();
        let previous = self
            .tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), Arc::clone(&tool));

        if let Some(previous) = &previous
            && !Arc::ptr_eq(previous, &tool)
        {
            warn!(tool = %name, "Tool name already registered; replacing previous implementation");
        }
        debug!(tool = %name, "Tool added to registry");
        previous
    }

    /// Removes the tool registered under `name`, whoever registered it.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the named tool on JSON-encoded arguments.
    ///
    /// Every failure is reported in the result's `error` field:
    /// - unknown tool name
    /// - arguments that are not a JSON object (blank input counts as `{}`)
    /// - failed validation
    /// - `Err` from [`Tool::execute`]
    /// - a panic inside the tool
    #[must_use]
    pub fn invoke(&self, name: &str, args_json: &str) -> ToolResult {
        let Some(tool) = self.get(name) else {
            warn!(tool = %name, "Model called an unknown tool");
            return ToolResult::failure(format!("tool '{name}' not found"));
        };

        let args = match parse_arguments(args_json) {
            Ok(args) => args,
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool arguments are not valid JSON");
                return ToolResult::failure(format!("failed to parse arguments: {e}"));
            }
        };

        debug!(tool = %name, "Invoking tool");

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            tool.validate(&args).map(|()| tool.execute(&args))
        }));

        let result = match outcome {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => ToolResult::failure(format!("{e:#}")),
            Ok(Err(e)) => ToolResult::failure(format!("validation failed: {e}")),
            Err(panic) => ToolResult::failure(format!(
                "tool panicked: {}",
                panic_message(panic.as_ref())
            )),
        };

        if result.is_error() {
            warn!(tool = %name, error = %result.error, "Tool failed");
        } else {
            info!(tool = %name, "Tool completed");
        }
        result
    }

    /// [`ToolRegistry::invoke`], encoded as the JSON the shim expects back.
    #[must_use]
    pub fn invoke_json(&self, name: &str, args_json: &str) -> String {
        let result = self.invoke(name, args_json);
        serde_json::to_string(&result).unwrap_or_else(|e| {
            warn!(tool = %name, error = %e, "Failed to encode tool result");
            UNENCODABLE_RESULT.to_string()
        })
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

fn parse_arguments(args_json: &str) -> serde_json::Result<Map<String, Value>> {
    if args_json.trim().is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str(args_json)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
