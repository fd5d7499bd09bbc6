//! Finds the shim library on disk, extracting the embedded copy if needed.

use std::{
    env::consts::{DLL_PREFIX, DLL_SUFFIX},
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use fmbridge_abi::SHIM_BASE_NAME;
use tracing::{debug, info};

use crate::config::LibraryConfig;

/// Shim library bundled at build time (empty when none was provided).
pub static EMBEDDED_SHIM: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/embedded_shim.bin"));

/// Errors that can occur while locating the shim library.
#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    /// Nothing on the search path and no embedded library to fall back to.
    #[error("shim library not found (searched: {searched:?}) and no embedded copy is available")]
    NotFound { searched: Vec<PathBuf> },

    /// The embedded library could not be written out.
    #[error("failed to extract embedded shim library to {path}: {source}")]
    Extract {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Platform file name of the shim, e.g. `libFMShim.dylib`.
#[must_use]
pub fn shim_file_name() -> String {
    format!("{DLL_PREFIX}{SHIM_BASE_NAME}{DLL_SUFFIX}")
}

/// File name used for the extracted copy of the embedded shim.
#[must_use]
pub fn extracted_file_name() -> String {
    format!("{DLL_PREFIX}{SHIM_BASE_NAME}_embedded{DLL_SUFFIX}")
}

/// Conventional locations checked before falling back to extraction, in
/// priority order.
#[must_use]
pub fn default_search_paths() -> Vec<PathBuf> {
    let name = shim_file_name();
    let mut paths = vec![Path::new(".").join(&name)];

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        paths.push(exe_dir.join(&name));
    }

    paths.push(Path::new("lib").join(&name));
    paths.push(Path::new("build").join(&name));
    paths
}

/// Resolves the path the loader should open.
///
/// Search order:
/// 1. Each search path, first existing file wins.
/// 2. The embedded library, extracted once to a deterministic path inside
///    the extraction directory. An existing file at that path is reused
///    as-is and never rewritten.
#[derive(Debug, Clone)]
pub struct ShimLocator {
    search_paths: Vec<PathBuf>,
    extract_dir: PathBuf,
    embedded: &'static [u8],
}

impl ShimLocator {
    /// Creates a locator with the default search paths, the system temporary
    /// directory and the library embedded at build time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            search_paths: default_search_paths(),
            extract_dir: std::env::temp_dir(),
            embedded: EMBEDDED_SHIM,
        }
    }

    /// Creates a locator honouring the `[library]` section of the config.
    #[must_use]
    pub fn from_config(config: &LibraryConfig) -> Self {
        let mut locator = Self::new();
        if let Some(paths) = &config.search_paths {
            locator.search_paths.clone_from(paths);
        }
        if let Some(dir) = &config.extract_dir {
            locator.extract_dir.clone_from(dir);
        }
        locator
    }

    #[must_use]
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }

    #[must_use]
    pub fn with_extract_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extract_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_embedded(mut self, bytes: &'static [u8]) -> Self {
        self.embedded = bytes;
        self
    }

    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Deterministic destination of the extracted library.
    #[must_use]
    pub fn extraction_path(&self) -> PathBuf {
        self.extract_dir.join(extracted_file_name())
    }

    /// Finds or materializes the shim library.
    ///
    /// # Errors
    ///
    /// Returns [`LocateError::NotFound`] if no search path exists and there is
    /// no embedded library, or [`LocateError::Extract`] if the embedded library
    /// cannot be written.
    pub fn locate(&self) -> Result<PathBuf, LocateError> {
        if let Some(found) = self.search_paths.iter().find(|path| path.is_file()) {
            info!(path = %found.display(), "Found shim library");
            return Ok(found.clone());
        }

        debug!(searched = ?self.search_paths, "No shim library on search path");
        self.extract()
    }

    fn extract(&self) -> Result<PathBuf, LocateError> {
        let path = self.extraction_path();

        if path.exists() {
            info!(path = %path.display(), "Using previously extracted shim library");
            return Ok(path);
        }

        if self.embedded.is_empty() {
            return Err(LocateError::NotFound {
                searched: self.search_paths.clone(),
            });
        }

        let extract_err = |source| LocateError::Extract {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.extract_dir).map_err(extract_err)?;

        // Write next to the destination, then move into place, so a crash
        // never leaves a truncated library that later runs would reuse.
        let mut staged = tempfile::NamedTempFile::new_in(&self.extract_dir).map_err(extract_err)?;
        staged.write_all(self.embedded).map_err(extract_err)?;
        staged.flush().map_err(extract_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            staged
                .as_file()
                .set_permissions(fs::Permissions::from_mode(0o755))
                .map_err(extract_err)?;
        }

        match staged.persist_noclobber(&path) {
            Ok(_) => {
                info!(path = %path.display(), bytes = self.embedded.len(), "Extracted embedded shim library");
                Ok(path)
            }
            // Another process won the race; its copy is just as good.
            Err(_) if path.exists() => Ok(path),
            Err(err) => Err(extract_err(err.error)),
        }
    }
}

impl Default for ShimLocator {
    fn default() -> Self {
        Self::new()
    }
}
