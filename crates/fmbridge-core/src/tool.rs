//! Host-defined tools the model may call mid-generation.
//!
//! A [`Tool`] is registered on a [`Session`](crate::Session); the session
//! sends its [`ToolDefinition`] to the shim and stores the implementation in
//! the process-wide [`ToolRegistry`](crate::ToolRegistry), where the callback
//! bridge finds it by name.
//!
//! # Example
//!
//! ```
//! use fmbridge_core::{ArgumentType, Tool, ToolArgument, ToolResult};
//! use serde_json::{Map, Value};
//!
//! struct Echo;
//!
//! impl Tool for Echo {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//!
//!     fn description(&self) -> &str {
//!         "Repeats its input"
//!     }
//!
//!     fn parameters(&self) -> Vec<ToolArgument> {
//!         vec![ToolArgument::new("text", ArgumentType::String).required()]
//!     }
//!
//!     fn execute(&self, args: &Map<String, Value>) -> anyhow::Result<ToolResult> {
//!         let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
//!         Ok(ToolResult::success(text))
//!     }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::validation::{ValidationError, validate_arguments};

/// A named capability the model may invoke.
///
/// Implementations run on whatever thread the shim calls back on, possibly
/// while another host thread is blocked inside a generation call. Tools that
/// touch shared state must synchronise it themselves.
pub trait Tool: Send + Sync {
    /// Unique name within a session; the model calls the tool by this name.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Declared arguments. Sent to the shim and used by [`Tool::validate`].
    fn parameters(&self) -> Vec<ToolArgument> {
        Vec::new()
    }

    /// Checks arguments before [`Tool::execute`] runs.
    ///
    /// The default checks them against [`Tool::parameters`]; a tool with no
    /// declared parameters accepts anything.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    fn validate(&self, args: &Map<String, Value>) -> Result<(), ValidationError> {
        validate_arguments(args, &self.parameters())
    }

    /// Runs the tool.
    ///
    /// Returning `Err` is equivalent to returning a result whose `error` field
    /// holds the error's message.
    ///
    /// # Errors
    ///
    /// Any failure the tool wants reported back to the model.
    fn execute(&self, args: &Map<String, Value>) -> anyhow::Result<ToolResult>;
}

/// JSON kind an argument must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ArgumentType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl std::fmt::Display for ArgumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of one tool argument and its constraints.
///
/// Length, pattern and enum constraints apply to strings; minimum and maximum
/// apply to numbers and integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolArgument {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ArgumentType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
}

impl ToolArgument {
    /// Creates an optional, unconstrained argument.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ArgumentType) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
            required: false,
            min_length: None,
            max_length: None,
            minimum: None,
            maximum: None,
            pattern: None,
            allowed: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_length(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    #[must_use]
    pub fn with_range(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    #[must_use]
    pub fn with_allowed<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = values.into_iter().map(Into::into).collect();
        self
    }
}

/// Outcome of a tool invocation, as sent back to the shim.
///
/// A non-empty `error` marks failure; `content` is then usually empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl ToolResult {
    #[must_use]
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            error: String::new(),
        }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            error: error.into(),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Per-parameter entry of the wire definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    #[serde(rename = "type")]
    pub kind: ArgumentType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

/// Tool definition in the JSON shape `RegisterTool` expects.
///
/// ```json
/// {"name": "calculate", "description": "...",
///  "parameters": {"arguments": {"type": "string", "description": "...", "required": true}}}
/// ```
///
/// Older shims send and accept definitions without `parameters`, so the map
/// defaults to empty when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterDefinition>,
}

impl ToolDefinition {
    /// Builds the wire definition of `tool`.
    #[must_use]
    pub fn from_tool(tool: &dyn Tool) -> Self {
        let parameters = tool
            .parameters()
            .into_iter()
            .map(|arg| {
                let definition = ParameterDefinition {
                    kind: arg.kind,
                    description: arg.description,
                    required: arg.required,
                    allowed: (!arg.allowed.is_empty()).then_some(arg.allowed),
                };
                (arg.name, definition)
            })
            .collect();

        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters,
        }
    }

    /// Serializes to the JSON text passed to `RegisterTool`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
