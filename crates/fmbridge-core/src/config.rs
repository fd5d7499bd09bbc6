//! Bridge configuration.
//!
//! Configuration lives in `fmbridge.toml`. Every field is optional; an absent
//! file means defaults everywhere.
//!
//! # Resolution Algorithm
//!
//! 1. `FMBRIDGE_CONFIG` environment variable
//! 2. Current directory
//! 3. Parent directories (walk up to filesystem root)
//! 4. User config directory (`~/.config/fmbridge/fmbridge.toml`)
//!
//! The `FMBRIDGE_SHIM_PATH` environment variable overrides `library.path`
//! after the file is loaded.
//!
//! # Example
//!
//! ```toml
//! [library]
//! path = "/opt/fm/libFMShim.dylib"
//! checksum = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
//!
//! [generation]
//! timeout_secs = 30
//! temperature = 0.2
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// File name searched for during resolution.
pub const CONFIG_FILE_NAME: &str = "fmbridge.toml";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "FMBRIDGE_CONFIG";

/// Environment variable naming an explicit shim library.
pub const SHIM_PATH_ENV: &str = "FMBRIDGE_SHIM_PATH";

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Errors that can occur during configuration resolution or loading.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// I/O error when reading a config file.
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error when a config file is malformed.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level contents of `fmbridge.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Where to find the shim and how to trust it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LibraryConfig {
    /// Explicit library path; skips the search entirely.
    pub path: Option<PathBuf>,

    /// Expected SHA-256 of the library file, hex encoded.
    pub checksum: Option<String>,

    /// Replaces the default conventional search list.
    pub search_paths: Option<Vec<PathBuf>>,

    /// Replaces the system temporary directory as extraction target.
    pub extract_dir: Option<PathBuf>,
}

/// Defaults applied by front ends when issuing generation calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationConfig {
    pub timeout_secs: Option<u64>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

impl GenerationConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}

impl BridgeConfig {
    /// Loads a config file from an explicit path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents, path)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Finds and loads the config file, returning defaults if none exists.
    ///
    /// Environment overrides are applied to the result.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is found but cannot be read or
    /// parsed. A missing file is not an error.
    pub fn load_resolved() -> Result<Self, ConfigError> {
        let mut config = match Self::resolve_path() {
            Some(path) => {
                debug!(path = %path.display(), "Loading bridge config");
                Self::load(&path)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Returns the first config file found by the resolution algorithm.
    #[must_use]
    pub fn resolve_path() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV).map(PathBuf::from)
            && path.exists()
        {
            return Some(path);
        }

        if let Ok(current) = std::env::current_dir()
            && let Some(path) = find_in_ancestors(&current)
        {
            return Some(path);
        }

        dirs::config_dir()
            .map(|dir| dir.join("fmbridge").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    /// Applies `FMBRIDGE_SHIM_PATH` on top of the file contents.
    pub fn apply_env_overrides(&mut self) {
        if let Some(path) = std::env::var_os(SHIM_PATH_ENV).filter(|v| !v.is_empty()) {
            self.library.path = Some(PathBuf::from(path));
        }
    }
}

/// Walks from `start` up to the filesystem root looking for the config file.
fn find_in_ancestors(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}
