//! Model sessions.
//!
//! A [`Session`] wraps one native session handle together with the host-side
//! state that belongs to it: system instructions, the tools it registered and
//! an approximate count of the tokens it has consumed.
//!
//! # Lifecycle
//!
//! The native handle is released exactly once, either by
//! [`Session::release`] or when the session is dropped. After release the
//! handle field is empty and every operation returns
//! [`SessionError::Released`] instead of touching freed native memory.
//!
//! # Blocking
//!
//! The `respond*` methods block the calling thread until the shim returns.
//! Calls against one session must be issued one at a time; `&mut self`
//! enforces that. For cancellation or a deadline use
//! [`Session::respond_until`] or [`Session::respond_with_timeout`], which run
//! the call on a detached helper thread. Native computation cannot be
//! interrupted: an abandoned call keeps running in the background, its result
//! is discarded, and the native handle stays alive until it finishes. The
//! helper is not tied to the async runtime, so shutting the runtime down does
//! not wait for it. Repeated timeouts against one session still pile up
//! native work.

use std::{
    any::Any,
    collections::HashMap,
    ffi::{c_char, c_void},
    future::Future,
    panic::{AssertUnwindSafe, catch_unwind, resume_unwind},
    ptr::NonNull,
    sync::Arc,
    time::Duration,
};

use fmbridge_abi::{SHIM_TRUE, ShimVTable};
use tracing::{debug, info, warn};

use crate::{
    bridge::{Bridge, BridgeError},
    context::{ContextOverflow, ContextTracker, LONG_INSTRUCTIONS_TOKENS, MAX_CONTEXT_SIZE, estimate_tokens},
    marshal::{HostCString, MarshalError, NativeString, copy_borrowed},
    options::GenerationOptions,
    tool::{Tool, ToolDefinition},
};

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SessionError {
    /// The session was released; its native handle is gone.
    #[error("invalid session: already released")]
    Released,

    /// The shim could not be loaded, so no session can exist.
    #[error("shim not initialized: {0}")]
    BridgeUnavailable(Arc<BridgeError>),

    /// The shim returned a null session handle.
    #[error("failed to create native session")]
    CreateFailed,

    /// The prompt was rejected before reaching the shim.
    #[error(transparent)]
    ContextOverflow(#[from] ContextOverflow),

    /// The shim returned a null response.
    #[error("no response from the model")]
    NoResponse,

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error("failed to encode definition of tool '{name}': {source}")]
    ToolDefinition {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("shim rejected registration of tool '{name}'")]
    ToolRegistration { name: String },

    #[error("shim failed to clear tools")]
    ToolClear,

    /// The cancellation signal fired first; the native call keeps running.
    #[error("generation cancelled; the native call continues in the background")]
    Cancelled,

    /// The deadline passed first; the native call keeps running.
    #[error("generation timed out after {0:?}; the native call continues in the background")]
    TimedOut(Duration),

    /// The helper thread running the native call failed.
    #[error("generation worker failed: {0}")]
    Worker(String),
}

/// Which respond entry point a call goes to.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Plain generation, or parameterized generation when options are given.
    Respond {
        prompt: String,
        options: Option<GenerationOptions>,
    },
    /// Generation shaped as a `{content, metadata?, confidence?}` envelope.
    Structured { prompt: String },
    /// Generation during which the model may call registered tools.
    Tools { prompt: String },
}

impl Request {
    #[must_use]
    pub fn respond(prompt: impl Into<String>) -> Self {
        Self::Respond {
            prompt: prompt.into(),
            options: None,
        }
    }

    #[must_use]
    pub fn with_options(prompt: impl Into<String>, options: GenerationOptions) -> Self {
        Self::Respond {
            prompt: prompt.into(),
            options: Some(options),
        }
    }

    #[must_use]
    pub fn structured(prompt: impl Into<String>) -> Self {
        Self::Structured {
            prompt: prompt.into(),
        }
    }

    #[must_use]
    pub fn tools(prompt: impl Into<String>) -> Self {
        Self::Tools {
            prompt: prompt.into(),
        }
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        match self {
            Self::Respond { prompt, .. } | Self::Structured { prompt } | Self::Tools { prompt } => {
                prompt
            }
        }
    }
}

/// Owner of one native session handle.
///
/// Shared between a [`Session`] and any call still running on a worker; the
/// last owner to drop it performs the single native release.
struct NativeSession {
    ptr: NonNull<c_void>,
    vtable: ShimVTable,
}

// SAFETY: the handle is an opaque pointer the shim synchronises internally;
// the host never dereferences it and serialises calls per session.
unsafe impl Send for NativeSession {}
// SAFETY: see above.
unsafe impl Sync for NativeSession {}

impl NativeSession {
    fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    /// Runs one blocking respond call.
    fn execute(&self, request: &Request) -> Result<String, SessionError> {
        let prompt = HostCString::new(request.prompt())?;
        let vt = &self.vtable;
        let session = self.as_ptr();

        // SAFETY: `session` is live while `self` exists and `prompt` outlives
        // the call. The returned buffer is owned by us and released once, with
        // the shim's `free`, by `NativeString`.
        let response = unsafe {
            let raw = match request {
                Request::Respond { options: None, .. } => (vt.respond)(session, prompt.as_ptr()),
                Request::Respond {
                    options: Some(options),
                    ..
                } => (vt.respond_with_options)(
                    session,
                    prompt.as_ptr(),
                    options.native_max_tokens(),
                    options.native_temperature(),
                ),
                Request::Structured { .. } => (vt.respond_structured)(session, prompt.as_ptr()),
                Request::Tools { .. } => (vt.respond_with_tools)(session, prompt.as_ptr()),
            };
            NativeString::from_raw(raw, vt.free)
        };

        response
            .map(NativeString::into_string)
            .ok_or(SessionError::NoResponse)
    }
}

impl Drop for NativeSession {
    fn drop(&mut self) {
        // SAFETY: the handle came from the shim's create call and this is the
        // only release site.
        unsafe { (self.vtable.release_session)(self.as_ptr()) };
        debug!("Native session released");
    }
}

/// Tracks whether the shim's tool-enabled session reflects the current tool
/// set. Every tool mutation bumps the generation; a successful tool-enabled
/// call marks the current generation as built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ToolSessionCache {
    generation: u64,
    built: Option<u64>,
}

impl ToolSessionCache {
    fn invalidate(&mut self) {
        self.generation += 1;
    }

    fn mark_built(&mut self) {
        self.built = Some(self.generation);
    }

    fn is_stale(self) -> bool {
        self.built != Some(self.generation)
    }
}

/// A conversation with the on-device model.
pub struct Session {
    bridge: Arc<Bridge>,
    native: Option<Arc<NativeSession>>,
    instructions: Option<String>,
    tools: HashMap<String, Arc<dyn Tool>>,
    context: ContextTracker,
    tool_cache: ToolSessionCache,
}

impl Session {
    /// Creates a session through the process-wide bridge.
    ///
    /// Model availability is not checked; see [`crate::availability`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::BridgeUnavailable`] if the shim failed to load,
    /// or any error from [`Session::new`].
    pub fn create(instructions: Option<&str>) -> Result<Self, SessionError> {
        let bridge = Bridge::global().map_err(SessionError::BridgeUnavailable)?;
        Self::new(bridge, instructions)
    }

    /// Creates a session on `bridge`, with optional system instructions.
    ///
    /// Instructions count towards the context window from the start; empty
    /// instructions are the same as none.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CreateFailed`] if the shim returns a null
    /// handle, or [`SessionError::Marshal`] if the instructions contain a null
    /// byte.
    pub fn new(bridge: Arc<Bridge>, instructions: Option<&str>) -> Result<Self, SessionError> {
        let instructions = instructions
            .filter(|text| !text.is_empty())
            .map(str::to_string);
        let vtable = *bridge.vtable();

        let raw = match &instructions {
            Some(text) => {
                let tokens = estimate_tokens(text);
                if tokens > LONG_INSTRUCTIONS_TOKENS {
                    warn!(tokens, "System instructions are very long; consider shortening them");
                }
                let host = HostCString::new(text)?;
                // SAFETY: `host` outlives the call.
                unsafe { (vtable.create_session_with_instructions)(host.as_ptr()) }
            }
            // SAFETY: no arguments.
            None => unsafe { (vtable.create_session)() },
        };

        let ptr = NonNull::new(raw).ok_or(SessionError::CreateFailed)?;
        let context = instructions.as_deref().map_or_else(ContextTracker::default, |text| {
            ContextTracker::seeded(text, MAX_CONTEXT_SIZE)
        });

        debug!(
            instructions = instructions.is_some(),
            context = context.size(),
            "Native session created"
        );

        Ok(Self {
            bridge,
            native: Some(Arc::new(NativeSession { ptr, vtable })),
            instructions,
            tools: HashMap::new(),
            context,
            tool_cache: ToolSessionCache::default(),
        })
    }

    /// Releases the native session. Releasing twice is a no-op.
    ///
    /// If a timed-out or cancelled call is still running, the native release
    /// happens when it finishes.
    pub fn release(&mut self) {
        if let Some(native) = self.native.take() {
            let in_flight = Arc::strong_count(&native) > 1;
            drop(native);
            debug!(in_flight, "Session released");
        }
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.native.is_none()
    }

    /// The raw native handle, or `None` after release.
    #[must_use]
    pub fn native_handle(&self) -> Option<*mut c_void> {
        self.native.as_deref().map(NativeSession::as_ptr)
    }

    #[must_use]
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    #[must_use]
    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    #[must_use]
    pub fn context_size(&self) -> usize {
        self.context.size()
    }

    #[must_use]
    pub fn max_context_size(&self) -> usize {
        self.context.max()
    }

    #[must_use]
    pub fn context_usage_percent(&self) -> f64 {
        self.context.usage_percent()
    }

    /// Usage above 80%.
    #[must_use]
    pub fn is_context_near_limit(&self) -> bool {
        self.context.is_near_limit()
    }

    #[must_use]
    pub fn remaining_tokens(&self) -> usize {
        self.context.remaining()
    }

    /// Names of the tools this session registered, sorted.
    #[must_use]
    pub fn registered_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Whether the next tool-enabled call makes the shim rebuild its
    /// tool-enabled session.
    #[must_use]
    pub fn tool_session_is_stale(&self) -> bool {
        self.tool_cache.is_stale()
    }

    fn live(&self) -> Result<&Arc<NativeSession>, SessionError> {
        self.native.as_ref().ok_or(SessionError::Released)
    }

    /// Registers `tool` with this session and the shim.
    ///
    /// A tool already registered under the same name is replaced, both here
    /// and in the process-wide registry (which may belong to another session;
    /// see [`crate::ToolRegistry`]).
    ///
    /// # Errors
    ///
    /// Returns an error if the session was released, the definition cannot be
    /// encoded, or the shim rejects it. On error nothing is registered.
    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) -> Result<(), SessionError> {
        let native = Arc::clone(self.live()?);
        let name = tool.name().to_string();

        let definition = ToolDefinition::from_tool(tool.as_ref())
            .to_json()
            .map_err(|source| SessionError::ToolDefinition {
                name: name.clone(),
                source,
            })?;
        let definition = HostCString::new(&definition)?;

        // SAFETY: live handle; `definition` outlives the call.
        let status = unsafe { (native.vtable.register_tool)(native.as_ptr(), definition.as_ptr()) };
        if status != SHIM_TRUE {
            return Err(SessionError::ToolRegistration { name });
        }

        self.bridge.registry().register(Arc::clone(&tool));
        self.tools.insert(name.clone(), tool);
        self.tool_cache.invalidate();
        info!(tool = %name, "Tool registered");
        Ok(())
    }

    /// Removes every tool this session registered, here, in the process-wide
    /// registry and in the shim.
    ///
    /// Registry entries are removed by name, so a same-named tool registered
    /// later by another session is removed too.
    ///
    /// # Errors
    ///
    /// Returns an error if the session was released or the shim reports
    /// failure. Host-side registrations are removed either way.
    pub fn clear_tools(&mut self) -> Result<(), SessionError> {
        let native = Arc::clone(self.live()?);

        let registry = self.bridge.registry();
        for name in self.tools.drain().map(|(name, _)| name) {
            registry.unregister(&name);
        }
        self.tool_cache.invalidate();

        // SAFETY: live handle.
        let status = unsafe { (native.vtable.clear_tools)(native.as_ptr()) };
        if status != SHIM_TRUE {
            return Err(SessionError::ToolClear);
        }
        info!("Tools cleared");
        Ok(())
    }

    /// Generates a response, using the parameterized entry point when
    /// `options` are given.
    ///
    /// Text the shim returns is passed through as-is, including failures it
    /// folds into text (see [`crate::is_error_text`]).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ContextOverflow`] without calling the shim if
    /// the prompt does not fit, [`SessionError::NoResponse`] if the shim
    /// returns nothing, or [`SessionError::Released`].
    pub fn respond(
        &mut self,
        prompt: &str,
        options: Option<GenerationOptions>,
    ) -> Result<String, SessionError> {
        self.send(&Request::Respond {
            prompt: prompt.to_string(),
            options,
        })
    }

    /// Generates a response during which the model may call registered tools.
    ///
    /// Tool calls happen inside this call, on whatever thread the shim uses.
    ///
    /// # Errors
    ///
    /// Same as [`Session::respond`].
    pub fn respond_with_tools(&mut self, prompt: &str) -> Result<String, SessionError> {
        self.send(&Request::tools(prompt))
    }

    /// Generates a JSON envelope `{content, metadata?, confidence?}`.
    ///
    /// The JSON is returned unvalidated; [`crate::StructuredResponse::parse`]
    /// decodes it.
    ///
    /// # Errors
    ///
    /// Same as [`Session::respond`].
    pub fn respond_with_structured_output(&mut self, prompt: &str) -> Result<String, SessionError> {
        self.send(&Request::structured(prompt))
    }

    /// Runs `request` on the calling thread.
    ///
    /// # Errors
    ///
    /// Same as [`Session::respond`].
    pub fn send(&mut self, request: &Request) -> Result<String, SessionError> {
        let native = Arc::clone(self.live()?);
        self.preflight(request)?;
        let response = native.execute(request)?;
        self.finish(request, &response);
        Ok(response)
    }

    /// Runs `request` on a helper thread, giving up when `signal` completes
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Cancelled`] if `signal` wins, otherwise the
    /// same errors as [`Session::respond`].
    pub async fn respond_until<F>(&mut self, request: Request, signal: F) -> Result<String, SessionError>
    where
        F: Future<Output = ()>,
    {
        self.race(request, signal, SessionError::Cancelled).await
    }

    /// Runs `request` on a helper thread with a deadline.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TimedOut`] if the deadline passes first,
    /// otherwise the same errors as [`Session::respond`].
    pub async fn respond_with_timeout(
        &mut self,
        timeout: Duration,
        request: Request,
    ) -> Result<String, SessionError> {
        self.race(request, tokio::time::sleep(timeout), SessionError::TimedOut(timeout))
            .await
    }

    async fn race<F>(
        &mut self,
        request: Request,
        signal: F,
        abandoned: SessionError,
    ) -> Result<String, SessionError>
    where
        F: Future<Output = ()>,
    {
        let native = Arc::clone(self.live()?);
        self.preflight(&request)?;

        let sent = request.clone();
        let (tx, rx) = tokio::sync::oneshot::channel();
        std::thread::Builder::new()
            .name("fmbridge-call".to_string())
            .spawn(move || {
                if tx.send(native.execute(&request)).is_err() {
                    debug!("Caller gave up; discarding native result");
                }
            })
            .map_err(|e| SessionError::Worker(e.to_string()))?;

        tokio::select! {
            received = rx => {
                let response = received.map_err(|e| SessionError::Worker(e.to_string()))??;
                self.finish(&sent, &response);
                Ok(response)
            }
            () = signal => {
                warn!(error = %abandoned, "Abandoning in-flight native call; its result will be discarded");
                Err(abandoned)
            }
        }
    }

    /// Streams a response, calling `on_chunk(text, false)` per chunk and
    /// `on_chunk("", true)` once at the end. Returns the full text.
    ///
    /// Shims without a streaming entry point answer in one blocking call,
    /// delivered as a single chunk.
    ///
    /// # Errors
    ///
    /// Same as [`Session::respond`]. A panic in `on_chunk` is resumed after
    /// the native call returns.
    pub fn respond_streaming<F>(&mut self, prompt: &str, mut on_chunk: F) -> Result<String, SessionError>
    where
        F: FnMut(&str, bool),
    {
        let native = Arc::clone(self.live()?);
        let request = Request::respond(prompt);
        self.preflight(&request)?;

        let text = match native.vtable.respond_streaming {
            Some(respond_streaming) => {
                let host = HostCString::new(prompt)?;
                let mut state = StreamState {
                    on_chunk: &mut on_chunk,
                    text: String::new(),
                    finished: false,
                    panic: None,
                };
                // SAFETY: live handle; `host` and `state` outlive the call,
                // and the shim delivers every chunk before returning.
                unsafe {
                    respond_streaming(
                        native.as_ptr(),
                        host.as_ptr(),
                        stream_chunk,
                        (&raw mut state).cast::<c_void>(),
                    );
                }
                if let Some(panic) = state.panic {
                    resume_unwind(panic);
                }
                if !state.finished {
                    (state.on_chunk)("", true);
                }
                state.text
            }
            None => return self.deliver_whole(&native, &request, &mut on_chunk),
        };

        self.finish(&request, &text);
        Ok(text)
    }

    /// Streaming form of [`Session::respond_with_tools`].
    ///
    /// The shim has no incremental tool-enabled entry point, so the whole
    /// answer arrives as one chunk followed by the end marker. Tool callbacks
    /// run before the chunk is delivered.
    ///
    /// # Errors
    ///
    /// Same as [`Session::respond`].
    pub fn respond_with_tools_streaming<F>(
        &mut self,
        prompt: &str,
        mut on_chunk: F,
    ) -> Result<String, SessionError>
    where
        F: FnMut(&str, bool),
    {
        let native = Arc::clone(self.live()?);
        let request = Request::tools(prompt);
        self.preflight(&request)?;
        self.deliver_whole(&native, &request, &mut on_chunk)
    }

    fn deliver_whole<F>(
        &mut self,
        native: &NativeSession,
        request: &Request,
        on_chunk: &mut F,
    ) -> Result<String, SessionError>
    where
        F: FnMut(&str, bool),
    {
        let text = native.execute(request)?;
        on_chunk(&text, false);
        on_chunk("", true);
        self.finish(request, &text);
        Ok(text)
    }

    /// Creates a fresh session with the same instructions and tools.
    ///
    /// This session is left untouched and must still be released.
    ///
    /// # Errors
    ///
    /// Returns an error if the new session cannot be created or a tool cannot
    /// be registered on it.
    pub fn refresh(&self) -> Result<Self, SessionError> {
        let mut fresh = Self::new(Arc::clone(&self.bridge), self.instructions.as_deref())?;
        for tool in self.tools.values() {
            fresh.register_tool(Arc::clone(tool))?;
        }
        info!(tools = fresh.tools.len(), "Session refreshed");
        Ok(fresh)
    }

    fn preflight(&self, request: &Request) -> Result<(), SessionError> {
        self.context.check(request.prompt())?;
        if matches!(request, Request::Tools { .. }) && self.tool_cache.is_stale() {
            debug!(tools = self.tools.len(), "Tool set changed; shim rebuilds its tool session");
        }
        Ok(())
    }

    fn finish(&mut self, request: &Request, response: &str) {
        self.context.add(request.prompt());
        self.context.add(response);
        if matches!(request, Request::Tools { .. }) {
            self.tool_cache.mark_built();
        }
        if self.context.is_near_limit() {
            warn!(
                size = self.context.size(),
                max = self.context.max(),
                "Context window nearly full; consider refreshing the session"
            );
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("released", &self.is_released())
            .field("instructions", &self.instructions)
            .field("tools", &self.registered_tools())
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

struct StreamState<'a> {
    on_chunk: &'a mut dyn FnMut(&str, bool),
    text: String,
    finished: bool,
    panic: Option<Box<dyn Any + Send>>,
}

/// Per-chunk trampoline passed to the streaming entry point.
unsafe extern "C" fn stream_chunk(chunk: *const c_char, user_data: *mut c_void) {
    // SAFETY: `user_data` is the `StreamState` passed by `respond_streaming`,
    // which outlives the native call.
    let state = unsafe { &mut *user_data.cast::<StreamState<'_>>() };
    if state.finished || state.panic.is_some() {
        return;
    }
    // SAFETY: the shim passes a chunk valid for the duration of this call.
    let chunk = unsafe { copy_borrowed(chunk) }.unwrap_or_default();

    let delivered = catch_unwind(AssertUnwindSafe(|| {
        if chunk.is_empty() {
            (state.on_chunk)("", true);
        } else {
            (state.on_chunk)(&chunk, false);
        }
    }));

    match delivered {
        Ok(()) if chunk.is_empty() => state.finished = true,
        Ok(()) => state.text.push_str(&chunk),
        Err(panic) => state.panic = Some(panic),
    }
}
