//! Generation options.

use fmbridge_abi::{DEFAULT_TEMPERATURE, NO_TOKEN_LIMIT};
use serde::{Deserialize, Serialize};

/// Knobs for a single generation call.
///
/// The shim's parameterized entry point only takes `max_tokens` and
/// `temperature`; the remaining fields are carried so callers can express
/// them once a shim accepts them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOptions {
    /// Maximum tokens to generate; no limit when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,

    /// Sampling temperature, 0.0 (deterministic) to 1.0 (very random).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling threshold, 0.0 to 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,

    /// Only meaningful together with a temperature of 0.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl GenerationOptions {
    #[must_use]
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_tokens(max_tokens: i32) -> Self {
        Self {
            max_tokens: Some(max_tokens),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn deterministic() -> Self {
        Self::with_temperature(0.0)
    }

    #[must_use]
    pub fn creative() -> Self {
        Self::with_temperature(0.9)
    }

    #[must_use]
    pub fn balanced() -> Self {
        Self::with_temperature(0.7)
    }

    /// Sets the token limit on an existing set of options.
    #[must_use]
    pub fn max_tokens(mut self, max_tokens: i32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the temperature on an existing set of options.
    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// `max_tokens` as passed to the shim, `-1` meaning no limit.
    #[must_use]
    pub fn native_max_tokens(&self) -> i32 {
        self.max_tokens.unwrap_or(NO_TOKEN_LIMIT)
    }

    /// `temperature` as passed to the shim, 0.7 when unset.
    #[must_use]
    pub fn native_temperature(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }
}
