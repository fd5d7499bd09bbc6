//! In-process stand-in for the shim library.
//!
//! Every entry point is a Rust `extern "C" fn` with the shim's signature.
//! Results are allocated with the C allocator and the table's `free` is
//! `libc::free`, so the real marshaling, ownership and callback paths run
//! unchanged. Prompts drive the behaviour:
//!
//! - `"no response"` makes a respond call return null
//! - `"slow: ..."` sleeps for [`SLOW_CALL`] before answering
//! - `"call <tool> <json>"` on the tools entry point calls back into the host
//!   through the registered tool callback, while the host is still blocked in
//!   the outer call
//!
//! Anything else is answered with `"Response to: <prompt>"`.

use std::{
    ffi::{CStr, c_char, c_float, c_int, c_void},
    sync::{
        Mutex, OnceLock, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use fmbridge_abi::{SHIM_TRUE, ShimVTable, StreamChunkFn, ToolCallbackFn};

use crate::tool::ToolDefinition;

/// How long a `"slow: ..."` prompt blocks inside the fake shim.
pub(crate) const SLOW_CALL: Duration = Duration::from_millis(300);

/// Tool name the fake shim refuses to register.
pub(crate) const REJECTED_TOOL: &str = "rejected";

static CALLBACK: Mutex<Option<ToolCallbackFn>> = Mutex::new(None);

/// Serialises tests that install the process-wide tool callback.
pub(crate) fn test_lock() -> tokio::sync::MutexGuard<'static, ()> {
    lock().blocking_lock()
}

pub(crate) async fn test_lock_async() -> tokio::sync::MutexGuard<'static, ()> {
    lock().lock().await
}

fn lock() -> &'static tokio::sync::Mutex<()> {
    static LOCK: OnceLock<tokio::sync::Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| tokio::sync::Mutex::new(()))
}

/// State behind one fake native session handle.
///
/// Handles are never freed, so tests can inspect a session after the host
/// released it.
#[derive(Debug, Default)]
pub(crate) struct FakeSession {
    pub instructions: Option<String>,
    pub releases: AtomicUsize,
    pub respond_calls: AtomicUsize,
    pub tools: Mutex<Vec<ToolDefinition>>,
    pub clears: AtomicUsize,
    pub last_options: Mutex<Option<(c_int, c_float)>>,
    pub last_tool_result: Mutex<Option<String>>,
}

impl FakeSession {
    pub(crate) fn tool_names(&self) -> Vec<String> {
        self.tools
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|definition| definition.name.clone())
            .collect()
    }
}

/// Borrows the state behind a handle the fake shim created.
///
/// # Safety
///
/// `handle` must come from one of this module's create functions.
pub(crate) unsafe fn fake_session<'a>(handle: *mut c_void) -> &'a FakeSession {
    // SAFETY: handles are leaked boxes and live for the rest of the process.
    unsafe { &*handle.cast::<FakeSession>() }
}

/// A complete table backed by this module, with streaming support.
pub(crate) fn fake_vtable() -> ShimVTable {
    ShimVTable {
        create_session,
        create_session_with_instructions,
        release_session,
        check_availability,
        respond: respond_sync,
        respond_structured,
        respond_with_tools,
        respond_with_options,
        model_info,
        register_tool,
        clear_tools,
        set_tool_callback,
        free: libc::free,
        respond_streaming: Some(respond_streaming),
    }
}

/// A table whose session creation always fails.
pub(crate) fn failing_create_vtable() -> ShimVTable {
    ShimVTable {
        create_session: create_null,
        create_session_with_instructions: create_null_with_instructions,
        ..fake_vtable()
    }
}

/// Invokes the callback most recently passed to `SetToolCallback`, the way the
/// shim does mid-generation, and returns the decoded JSON.
pub(crate) fn invoke_registered_callback(name: &str, args_json: &str) -> Option<String> {
    let callback = (*CALLBACK.lock().unwrap_or_else(PoisonError::into_inner))?;
    let name = std::ffi::CString::new(name).ok()?;
    let args = std::ffi::CString::new(args_json).ok()?;

    // SAFETY: both arguments are valid for the duration of the call.
    let raw = unsafe { callback(name.as_ptr(), args.as_ptr()) };
    take_malloced(raw)
}

/// Copies and frees a buffer the host allocated for the shim.
fn take_malloced(raw: *mut c_char) -> Option<String> {
    if raw.is_null() {
        return None;
    }
    // SAFETY: callback results are null-terminated and C-allocated.
    let text = unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned();
    // SAFETY: ownership passed to us; released once with the C allocator.
    unsafe { libc::free(raw.cast()) };
    Some(text)
}

fn new_handle(instructions: Option<String>) -> *mut c_void {
    let session = FakeSession {
        instructions,
        ..FakeSession::default()
    };
    Box::into_raw(Box::new(session)).cast()
}

fn to_malloced(text: &str) -> *mut c_char {
    let Ok(owned) = std::ffi::CString::new(text) else {
        return std::ptr::null_mut();
    };
    // SAFETY: `owned` is null-terminated; strdup allocates with malloc.
    unsafe { libc::strdup(owned.as_ptr()) }
}

/// # Safety
///
/// `ptr` must be a valid null-terminated string.
unsafe fn read(ptr: *const c_char) -> String {
    // SAFETY: forwarded to the caller.
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

fn answer(prompt: &str) -> *mut c_char {
    if prompt == "no response" {
        return std::ptr::null_mut();
    }
    if let Some(rest) = prompt.strip_prefix("slow: ") {
        std::thread::sleep(SLOW_CALL);
        return to_malloced(&format!("Slow response to: {rest}"));
    }
    to_malloced(&format!("Response to: {prompt}"))
}

unsafe extern "C" fn create_session() -> *mut c_void {
    new_handle(None)
}

unsafe extern "C" fn create_session_with_instructions(instructions: *const c_char) -> *mut c_void {
    // SAFETY: the host passes a valid C string.
    new_handle(Some(unsafe { read(instructions) }))
}

unsafe extern "C" fn create_null() -> *mut c_void {
    std::ptr::null_mut()
}

unsafe extern "C" fn create_null_with_instructions(_instructions: *const c_char) -> *mut c_void {
    std::ptr::null_mut()
}

unsafe extern "C" fn release_session(session: *mut c_void) {
    // SAFETY: the host only releases handles this module created.
    let session = unsafe { fake_session(session) };
    session.releases.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn check_availability() -> c_int {
    0
}

unsafe extern "C" fn respond_sync(session: *mut c_void, prompt: *const c_char) -> *mut c_char {
    // SAFETY: valid handle and C string per the ABI contract.
    let (session, prompt) = unsafe { (fake_session(session), read(prompt)) };
    session.respond_calls.fetch_add(1, Ordering::SeqCst);
    answer(&prompt)
}

unsafe extern "C" fn respond_structured(session: *mut c_void, prompt: *const c_char) -> *mut c_char {
    // SAFETY: valid handle and C string per the ABI contract.
    let (session, prompt) = unsafe { (fake_session(session), read(prompt)) };
    session.respond_calls.fetch_add(1, Ordering::SeqCst);
    let envelope = serde_json::json!({
        "content": format!("Structured response to: {prompt}"),
        "metadata": {"source": "fake"},
        "confidence": 0.9
    });
    to_malloced(&envelope.to_string())
}

unsafe extern "C" fn respond_with_tools(session: *mut c_void, prompt: *const c_char) -> *mut c_char {
    // SAFETY: valid handle and C string per the ABI contract.
    let (session, prompt) = unsafe { (fake_session(session), read(prompt)) };
    session.respond_calls.fetch_add(1, Ordering::SeqCst);

    let Some(call) = prompt.strip_prefix("call ") else {
        return answer(&prompt);
    };
    let (name, args) = call.split_once(' ').unwrap_or((call, "{}"));

    // Reenter the host while it is blocked in this very call.
    let Some(result) = invoke_registered_callback(name, args) else {
        return to_malloced("Error: tool callback returned nothing");
    };
    *session
        .last_tool_result
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(result.clone());
    to_malloced(&format!("Tool said: {result}"))
}

unsafe extern "C" fn respond_with_options(
    session: *mut c_void,
    prompt: *const c_char,
    max_tokens: c_int,
    temperature: c_float,
) -> *mut c_char {
    // SAFETY: valid handle and C string per the ABI contract.
    let (session, prompt) = unsafe { (fake_session(session), read(prompt)) };
    session.respond_calls.fetch_add(1, Ordering::SeqCst);
    *session
        .last_options
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some((max_tokens, temperature));
    answer(&prompt)
}

unsafe extern "C" fn model_info() -> *mut c_char {
    to_malloced("Fake on-device model (test shim)")
}

unsafe extern "C" fn register_tool(session: *mut c_void, definition: *const c_char) -> c_int {
    // SAFETY: valid handle and C string per the ABI contract.
    let (session, definition) = unsafe { (fake_session(session), read(definition)) };
    let Ok(definition) = serde_json::from_str::<ToolDefinition>(&definition) else {
        return 0;
    };
    if definition.name == REJECTED_TOOL {
        return 0;
    }
    session
        .tools
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(definition);
    SHIM_TRUE
}

unsafe extern "C" fn clear_tools(session: *mut c_void) -> c_int {
    // SAFETY: valid handle per the ABI contract.
    let session = unsafe { fake_session(session) };
    session
        .tools
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
    session.clears.fetch_add(1, Ordering::SeqCst);
    SHIM_TRUE
}

unsafe extern "C" fn set_tool_callback(callback: ToolCallbackFn) {
    *CALLBACK.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
}

unsafe extern "C" fn respond_streaming(
    session: *mut c_void,
    prompt: *const c_char,
    on_chunk: StreamChunkFn,
    user_data: *mut c_void,
) {
    // SAFETY: valid handle and C string per the ABI contract.
    let (session, prompt) = unsafe { (fake_session(session), read(prompt)) };
    session.respond_calls.fetch_add(1, Ordering::SeqCst);

    let reply = format!("Streamed reply to: {prompt}");
    for word in reply.split_inclusive(' ') {
        let Ok(chunk) = std::ffi::CString::new(word) else {
            continue;
        };
        // SAFETY: the chunk outlives the call; user_data is passed through.
        unsafe { on_chunk(chunk.as_ptr(), user_data) };
    }
    // SAFETY: as above, with the empty end-of-stream chunk.
    unsafe { on_chunk(c"".as_ptr(), user_data) };
}
