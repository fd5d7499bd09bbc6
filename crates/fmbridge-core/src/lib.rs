//! Host-side bridge to the on-device Foundation Models shim.
//!
//! This crate loads the native shim library (`libFMShim`), resolves its
//! entry points once per process and exposes them as safe, owned Rust
//! sessions. It handles string ownership across the boundary, the single
//! process-wide tool callback, and a host-side estimate of the model's
//! context window.
//!
//! # Key Components
//!
//! - **Bridge**: [`Bridge::global`] locates, verifies and loads the shim
//! - **Sessions**: [`Session`] owns one native handle and its conversation
//!   state
//! - **Tools**: host [`Tool`]s are registered per session and resolved by
//!   name when the model calls back through the [`ToolRegistry`]
//! - **Context**: [`ContextTracker`] rejects prompts that would overflow the
//!   window before they reach the model
//!
//! # Example
//!
//! ```ignore
//! use fmbridge_core::{Availability, Session, availability};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! if availability() != Availability::Available {
//!     return Ok(());
//! }
//!
//! let mut session = Session::create(Some("Answer in one sentence."))?;
//! let answer = session.respond("What is the capital of France?", None)?;
//! println!("{answer} ({:.1}% of context used)", session.context_usage_percent());
//! session.release();
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! The bridge and registry are shared behind [`std::sync::Arc`] and may be
//! used from any thread. A [`Session`] serialises its own calls through
//! `&mut self`; distinct sessions may run concurrently. Tool callbacks can
//! arrive on any thread while a session call is blocked.

mod bridge;
mod callback;
mod config;
mod context;
mod loader;
mod locator;
mod marshal;
mod options;
mod registry;
mod response;
mod session;
mod tool;
mod validation;

#[cfg(test)]
mod testing;

/// Process-wide bridge to the loaded shim.
pub use bridge::{Bridge, BridgeError, availability, model_info};

/// Configuration file and environment overrides.
pub use config::{
    BridgeConfig, CONFIG_ENV, CONFIG_FILE_NAME, ConfigError, GenerationConfig, LibraryConfig,
    SHIM_PATH_ENV,
};

/// Host-side context window accounting.
pub use context::{ContextOverflow, ContextTracker, MAX_CONTEXT_SIZE, estimate_tokens};

/// Library discovery and loading.
pub use loader::{LoadError, ShimLibrary};
pub use locator::{LocateError, ShimLocator};

pub use marshal::MarshalError;
pub use options::GenerationOptions;

/// Tool model, validation and process-wide dispatch.
pub use registry::ToolRegistry;
pub use tool::{ArgumentType, ParameterDefinition, Tool, ToolArgument, ToolDefinition, ToolResult};
pub use validation::{ArgumentError, ValidationError, validate_arguments};

/// Response text helpers.
pub use response::{ERROR_PREFIX, StructuredResponse, is_error_text};

/// Sessions and their calls.
pub use session::{Request, Session, SessionError};

pub use fmbridge_abi::Availability;
