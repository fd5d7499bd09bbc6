//! Dynamic loading of the shim library.

use std::path::{Path, PathBuf};

use fmbridge_abi::{ShimVTable, symbols};
use libloading::Library;
use tracing::{debug, info};

/// Errors that can occur when loading the shim library.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LoadError {
    /// Failed to read or open the dynamic library.
    #[error("failed to load library {path}: {reason}")]
    LibraryLoad { path: PathBuf, reason: String },

    /// A required entry point is not exported.
    #[error("missing symbol '{symbol}': {reason}")]
    MissingSymbol { symbol: &'static str, reason: String },

    /// Checksum mismatch.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

/// An opened shim library together with its resolved entry points.
///
/// The function pointers in [`ShimLibrary::vtable`] point into the mapped
/// library, which stays mapped for as long as this value is alive.
pub struct ShimLibrary {
    vtable: ShimVTable,
    path: PathBuf,
    _library: Library,
}

impl ShimLibrary {
    /// Opens the library at `path` and resolves every required entry point.
    ///
    /// When `checksum` is given, the file's SHA-256 digest is verified before
    /// the library is mapped, so an unexpected binary never runs its
    /// initializers.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The checksum does not match
    /// - The library cannot be opened
    /// - Any required symbol is missing (the whole load fails; no partial
    ///   table is returned)
    pub fn load(path: impl AsRef<Path>, checksum: Option<&str>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading shim library");

        if let Some(expected) = checksum {
            verify_checksum(path, expected)?;
        }

        // SAFETY: loading a library runs its initializers. The path was found
        // by the locator or configured explicitly, and optionally checksummed.
        let library = unsafe { Library::new(path) }.map_err(|e| LoadError::LibraryLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let vtable = resolve_vtable(&library)?;

        debug!(
            path = %path.display(),
            streaming = vtable.respond_streaming.is_some(),
            "Shim symbol table resolved"
        );

        Ok(Self {
            vtable,
            path: path.to_path_buf(),
            _library: library,
        })
    }

    #[must_use]
    pub fn vtable(&self) -> ShimVTable {
        self.vtable
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for ShimLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShimLibrary")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn verify_checksum(path: &Path, expected: &str) -> Result<(), LoadError> {
    let bytes = std::fs::read(path).map_err(|e| LoadError::LibraryLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let digest = sha256::digest(&bytes[..]);
    if !digest.eq_ignore_ascii_case(expected) {
        return Err(LoadError::ChecksumMismatch {
            expected: expected.to_string(),
            actual: digest,
        });
    }
    debug!(path = %path.display(), checksum = %digest, "Checksum verified");
    Ok(())
}

/// Resolves the full table from an opened library.
fn resolve_vtable(library: &Library) -> Result<ShimVTable, LoadError> {
    // SAFETY: each symbol is looked up with the signature the shim exports it
    // under; the ABI crate mirrors the shim's `@_cdecl` declarations.
    unsafe {
        Ok(ShimVTable {
            create_session: required(library, symbols::CREATE_SESSION)?,
            create_session_with_instructions: required(
                library,
                symbols::CREATE_SESSION_WITH_INSTRUCTIONS,
            )?,
            release_session: required(library, symbols::RELEASE_SESSION)?,
            check_availability: required(library, symbols::CHECK_MODEL_AVAILABILITY)?,
            respond: required(library, symbols::RESPOND_SYNC)?,
            respond_structured: required(library, symbols::RESPOND_WITH_STRUCTURED_OUTPUT)?,
            respond_with_tools: required(library, symbols::RESPOND_WITH_TOOLS)?,
            respond_with_options: required(library, symbols::RESPOND_WITH_OPTIONS)?,
            model_info: required(library, symbols::GET_MODEL_INFO)?,
            register_tool: required(library, symbols::REGISTER_TOOL)?,
            clear_tools: required(library, symbols::CLEAR_TOOLS)?,
            set_tool_callback: required(library, symbols::SET_TOOL_CALLBACK)?,
            free: required(library, symbols::FREE)?,
            respond_streaming: optional(library, symbols::RESPOND_STREAMING),
        })
    }
}

/// # Safety
///
/// `T` must be the exact function pointer type the symbol is exported with.
unsafe fn required<T: Copy>(library: &Library, symbol: &'static str) -> Result<T, LoadError> {
    // SAFETY: forwarded to the caller.
    unsafe { library.get::<T>(symbol.as_bytes()) }
        .map(|resolved| *resolved)
        .map_err(|e| LoadError::MissingSymbol {
            symbol,
            reason: e.to_string(),
        })
}

/// # Safety
///
/// `T` must be the exact function pointer type the symbol is exported with.
unsafe fn optional<T: Copy>(library: &Library, symbol: &'static str) -> Option<T> {
    // SAFETY: forwarded to the caller.
    match unsafe { library.get::<T>(symbol.as_bytes()) } {
        Ok(resolved) => Some(*resolved),
        Err(_) => {
            debug!(symbol, "Optional shim symbol not exported");
            None
        }
    }
}
