//! The process-wide bridge to the shim.
//!
//! A [`Bridge`] owns the resolved symbol table, the tool registry and the
//! mapped library. Production code reaches it through [`Bridge::global`],
//! which locates, loads and wires up the shim exactly once per process;
//! every session holds an [`Arc`] to it and never reopens the library.
//!
//! If initialization fails, the error is kept and returned to every later
//! caller: nothing can run, but the failure is reported rather than panicking.

use std::{
    path::Path,
    sync::{Arc, OnceLock},
};

use fmbridge_abi::{Availability, ShimVTable};
use tracing::{info, warn};

use crate::{
    callback,
    config::{BridgeConfig, ConfigError, LibraryConfig},
    loader::{LoadError, ShimLibrary},
    locator::{LocateError, ShimLocator},
    marshal::NativeString,
    registry::ToolRegistry,
};

/// Why the bridge could not be initialized.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

type GlobalBridge = Result<Arc<Bridge>, Arc<BridgeError>>;

static GLOBAL: OnceLock<GlobalBridge> = OnceLock::new();

/// Resolved shim entry points plus the tool registry they call back into.
pub struct Bridge {
    vtable: ShimVTable,
    registry: Arc<ToolRegistry>,
    // Declared last so the library is unmapped after nothing can call into it.
    library: Option<ShimLibrary>,
}

impl Bridge {
    /// Returns the process-wide bridge, initializing it on first use from the
    /// resolved `fmbridge.toml` (see [`BridgeConfig::load_resolved`]).
    ///
    /// # Errors
    ///
    /// Returns the initialization error, the same one on every call.
    pub fn global() -> Result<Arc<Self>, Arc<BridgeError>> {
        GLOBAL
            .get_or_init(|| Self::initialize(BridgeConfig::load_resolved()))
            .clone()
    }

    /// Initializes the process-wide bridge from an explicit configuration.
    ///
    /// Only the first initialization takes effect; if the bridge already
    /// exists, `config` is ignored and the existing outcome is returned.
    ///
    /// # Errors
    ///
    /// Returns the initialization error, the same one on every call.
    pub fn init_global(config: BridgeConfig) -> Result<Arc<Self>, Arc<BridgeError>> {
        GLOBAL.get_or_init(|| Self::initialize(Ok(config))).clone()
    }

    fn initialize(config: Result<BridgeConfig, ConfigError>) -> GlobalBridge {
        let result = config
            .map_err(BridgeError::from)
            .and_then(|config| Self::open(&config.library));
        match result {
            Ok(bridge) => {
                bridge.install_callback();
                Ok(Arc::new(bridge))
            }
            Err(e) => {
                warn!(error = %e, "Shim bridge unavailable");
                Err(Arc::new(e))
            }
        }
    }

    /// Locates and loads the shim. The callback is not installed here; only
    /// the process-wide bridge owns it.
    fn open(config: &LibraryConfig) -> Result<Self, BridgeError> {
        let path = match &config.path {
            Some(path) => path.clone(),
            None => ShimLocator::from_config(config).locate()?,
        };
        let library = ShimLibrary::load(&path, config.checksum.as_deref())?;
        let bridge = Self::new(library.vtable(), Some(library));
        info!(path = %path.display(), "Shim bridge ready");
        Ok(bridge)
    }

    fn new(vtable: ShimVTable, library: Option<ShimLibrary>) -> Self {
        Self {
            vtable,
            registry: Arc::new(ToolRegistry::new()),
            library,
        }
    }

    fn install_callback(&self) {
        callback::install(&self.vtable, Arc::clone(&self.registry));
    }

    /// A bridge over an in-process table, wired to the callback the way the
    /// global one is.
    #[cfg(test)]
    pub(crate) fn from_vtable(vtable: ShimVTable) -> Self {
        let bridge = Self::new(vtable, None);
        bridge.install_callback();
        bridge
    }

    #[must_use]
    pub fn vtable(&self) -> &ShimVTable {
        &self.vtable
    }

    /// The registry the tool callback resolves names in.
    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Path of the loaded library, if this bridge opened one.
    #[must_use]
    pub fn library_path(&self) -> Option<&Path> {
        self.library.as_ref().map(ShimLibrary::path)
    }

    #[must_use]
    pub fn supports_streaming(&self) -> bool {
        self.vtable.respond_streaming.is_some()
    }

    #[must_use]
    pub fn availability(&self) -> Availability {
        // SAFETY: resolved from the shim with this signature.
        Availability::from_code(unsafe { (self.vtable.check_availability)() })
    }

    /// Freeform description of the model, or an `Error:` text if the shim
    /// returned nothing.
    #[must_use]
    pub fn model_info(&self) -> String {
        // SAFETY: resolved from the shim with this signature; the result is
        // owned by us and released with the shim's `free`.
        let info = unsafe { NativeString::from_raw((self.vtable.model_info)(), self.vtable.free) };
        info.map_or_else(
            || "Error: Could not get model info".to_string(),
            NativeString::into_string,
        )
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("library", &self.library_path())
            .field("streaming", &self.supports_streaming())
            .field("registry", &self.registry)
            .finish()
    }
}

/// Availability through the global bridge; `Unknown(-1)` if it failed to
/// initialize.
#[must_use]
pub fn availability() -> Availability {
    match Bridge::global() {
        Ok(bridge) => bridge.availability(),
        Err(_) => Availability::Unknown(-1),
    }
}

/// Model description through the global bridge, or the initialization error.
#[must_use]
pub fn model_info() -> String {
    match Bridge::global() {
        Ok(bridge) => bridge.model_info(),
        Err(e) => format!("Error: shim not initialized: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_vtable, test_lock};

    #[test]
    fn test_from_vtable_installs_callback_with_own_registry() {
        let _guard = test_lock();

        let bridge = Bridge::from_vtable(fake_vtable());

        let active = callback::active_registry().expect("installed");
        assert!(Arc::ptr_eq(&active, bridge.registry()));
        assert!(bridge.library_path().is_none());
    }

    #[test]
    fn test_unwired_bridge_leaves_active_registry_alone() {
        // Arrange
        let _guard = test_lock();
        let wired = Bridge::from_vtable(fake_vtable());

        // Act
        let second = Bridge::new(fake_vtable(), None);

        // Assert
        let active = callback::active_registry().expect("installed");
        assert!(Arc::ptr_eq(&active, wired.registry()));
        assert!(!Arc::ptr_eq(&active, second.registry()));
    }

    #[test]
    fn test_availability_maps_shim_code() {
        let _guard = test_lock();
        let bridge = Bridge::from_vtable(fake_vtable());

        assert_eq!(bridge.availability(), Availability::Available);
    }

    #[test]
    fn test_model_info_copies_and_frees_native_text() {
        let _guard = test_lock();
        let bridge = Bridge::from_vtable(fake_vtable());

        assert_eq!(bridge.model_info(), "Fake on-device model (test shim)");
    }

    #[test]
    fn test_streaming_support_follows_optional_symbol() {
        let _guard = test_lock();
        let with = Bridge::from_vtable(fake_vtable());
        let without = Bridge::from_vtable(ShimVTable {
            respond_streaming: None,
            ..fake_vtable()
        });

        assert!(with.supports_streaming());
        assert!(!without.supports_streaming());
    }

    #[test]
    fn test_open_with_missing_explicit_path_fails_without_panicking() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = LibraryConfig {
            path: Some(dir.path().join("libFMShim.so")),
            ..LibraryConfig::default()
        };

        let err = Bridge::open(&config).expect_err("nothing to load");

        assert!(matches!(err, BridgeError::Load(LoadError::LibraryLoad { .. })));
    }

    #[test]
    fn test_open_without_library_or_embedded_copy_reports_locate_error() {
        // Arrange - nothing on the search path, and extraction would need an
        // embedded copy the test build does not carry
        let dir = tempfile::tempdir().expect("tempdir");
        let config = LibraryConfig {
            search_paths: Some(vec![dir.path().join("absent.so")]),
            extract_dir: Some(dir.path().to_path_buf()),
            ..LibraryConfig::default()
        };

        // Act
        let result = Bridge::open(&config);

        // Assert
        if crate::locator::EMBEDDED_SHIM.is_empty() {
            let err = result.expect_err("nothing to locate");
            assert!(matches!(err, BridgeError::Locate(LocateError::NotFound { .. })));
        }
    }
}
