//! The tool callback the shim calls into.
//!
//! The shim accepts a single process-wide callback, so one `extern "C"`
//! trampoline serves every session. It resolves tool names through the
//! registry installed with [`install`] and behaves like an independent
//! request handler: it makes no assumption about which thread it runs on or
//! which host call is blocked waiting for the shim, and nothing it does can
//! unwind into native frames.

use std::{
    ffi::c_char,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, PoisonError, RwLock},
};

use fmbridge_abi::ShimVTable;
use tracing::{debug, error, info};

use crate::{
    marshal::{CallbackBuffer, copy_borrowed},
    registry::ToolRegistry,
    tool::ToolResult,
};

/// Returned when encoding fails and no better result can be produced.
const CALLBACK_FAILED: &str = r#"{"content":"","error":"tool callback failed"}"#;

static ACTIVE: RwLock<Option<Arc<ToolRegistry>>> = RwLock::new(None);

/// Points the shim's callback at `registry`.
///
/// Production code installs once, from the bridge singleton. Installing
/// again swaps the registry the trampoline consults.
pub fn install(vtable: &ShimVTable, registry: Arc<ToolRegistry>) {
    *ACTIVE.write().unwrap_or_else(PoisonError::into_inner) = Some(registry);
    // SAFETY: `tool_callback` has the exact signature the shim expects and
    // lives for the whole process.
    unsafe { (vtable.set_tool_callback)(tool_callback) };
    info!("Tool callback installed");
}

/// The registry the trampoline currently dispatches to.
#[must_use]
pub fn active_registry() -> Option<Arc<ToolRegistry>> {
    ACTIVE.read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Entry point handed to `SetToolCallback`.
///
/// Returns a JSON-encoded [`ToolResult`] in a C-allocated buffer that the
/// shim frees, or null if no buffer could be allocated.
///
/// # Safety
///
/// `name` and `args_json` must each be null or a null-terminated string valid
/// for the duration of the call.
pub unsafe extern "C" fn tool_callback(name: *const c_char, args_json: *const c_char) -> *mut c_char {
    // SAFETY: forwarded to the caller.
    let encoded = catch_unwind(AssertUnwindSafe(|| unsafe { dispatch(name, args_json) }))
        .unwrap_or_else(|_| {
            error!("Tool callback panicked");
            CALLBACK_FAILED.to_string()
        });

    match CallbackBuffer::new(&encoded) {
        Ok(buffer) => buffer.into_raw(),
        Err(e) => {
            error!(error = %e, "Failed to hand tool result to the shim");
            std::ptr::null_mut()
        }
    }
}

/// # Safety
///
/// See [`tool_callback`].
unsafe fn dispatch(name: *const c_char, args_json: *const c_char) -> String {
    // SAFETY: forwarded to the caller.
    let (name, args_json) = unsafe { (copy_borrowed(name), copy_borrowed(args_json)) };

    let Some(name) = name else {
        return encode(&ToolResult::failure("tool name is missing"));
    };
    let args_json = args_json.unwrap_or_default();
    debug!(tool = %name, "Tool callback invoked");

    match active_registry() {
        Some(registry) => registry.invoke_json(&name, &args_json),
        None => encode(&ToolResult::failure(format!("tool '{name}' not found"))),
    }
}

fn encode(result: &ToolResult) -> String {
    serde_json::to_string(result).unwrap_or_else(|_| CALLBACK_FAILED.to_string())
}
