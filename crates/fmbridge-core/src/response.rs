//! Helpers for interpreting response text.
//!
//! The shim has no separate error channel: a failure inside the model comes
//! back as ordinary text starting with [`ERROR_PREFIX`]. The bridge passes
//! such text through untouched; callers decide whether to treat it as failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix the shim puts in front of failures folded into response text.
pub const ERROR_PREFIX: &str = "Error:";

/// Whether `text` follows the shim's error-text convention.
#[must_use]
pub fn is_error_text(text: &str) -> bool {
    text.trim_start().starts_with(ERROR_PREFIX)
}

/// Envelope returned by the structured-output entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Model confidence, 0.0 to 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl StructuredResponse {
    /// Parses structured-output text.
    ///
    /// # Errors
    ///
    /// Returns an error if `text` is not a JSON object with a `content` string.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
