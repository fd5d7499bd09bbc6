//! C ABI of the Foundation Models shim library.
//!
//! This crate defines the FFI boundary between the host and the compiled shim
//! (`libFMShim`) that fronts the on-device language model. The shim exports a
//! fixed set of `extern "C"` entry points; nothing here calls them. The
//! `fmbridge-core` crate resolves them into a [`ShimVTable`] and owns every
//! call.
//!
//! # Ownership Conventions
//!
//! Every string crossing the boundary is a null-terminated byte buffer.
//!
//! - **Host to native** (`*const c_char` parameters): allocated by the host,
//!   valid only for the duration of the call. The shim copies what it needs.
//! - **Native to host** (`*mut c_char` returns): allocated by the shim with
//!   the C allocator. The host copies the bytes and releases the buffer with
//!   [`ShimVTable::free`], never with its own allocator.
//! - **Tool callback results** (returned from [`ToolCallbackFn`]): allocated
//!   by the host with the C allocator and released by the shim with `free`.
//!
//! # Safety
//!
//! All function pointers are `unsafe extern "C"`. Callers must pass pointers
//! obtained from the shim (session handles) or valid null-terminated strings.

use std::ffi::{c_char, c_float, c_int, c_void};

/// Base name of the shim library, without platform prefix or suffix.
pub const SHIM_BASE_NAME: &str = "FMShim";

/// Token limit value meaning "no limit" for [`RespondWithOptionsFn`].
pub const NO_TOKEN_LIMIT: c_int = -1;

/// Temperature used when the caller supplies options without one.
pub const DEFAULT_TEMPERATURE: c_float = 0.7;

/// Success value returned by the tool registration entry points.
pub const SHIM_TRUE: c_int = 1;

/// Exported symbol names.
///
/// These must match the `@_cdecl` names in the shim byte for byte.
pub mod symbols {
    pub const CREATE_SESSION: &str = "CreateSession";
    pub const CREATE_SESSION_WITH_INSTRUCTIONS: &str = "CreateSessionWithInstructions";
    pub const RELEASE_SESSION: &str = "ReleaseSession";
    pub const CHECK_MODEL_AVAILABILITY: &str = "CheckModelAvailability";
    pub const RESPOND_SYNC: &str = "RespondSync";
    pub const RESPOND_WITH_STRUCTURED_OUTPUT: &str = "RespondWithStructuredOutput";
    pub const RESPOND_WITH_TOOLS: &str = "RespondWithTools";
    pub const RESPOND_WITH_OPTIONS: &str = "RespondWithOptions";
    pub const GET_MODEL_INFO: &str = "GetModelInfo";
    pub const REGISTER_TOOL: &str = "RegisterTool";
    pub const CLEAR_TOOLS: &str = "ClearTools";
    pub const SET_TOOL_CALLBACK: &str = "SetToolCallback";
    /// The C allocator's `free`, reached through the shim's dependencies.
    pub const FREE: &str = "free";
    /// Optional: only newer shims export a streaming entry point.
    pub const RESPOND_STREAMING: &str = "RespondStreaming";

    /// Every symbol a shim must export for the bridge to be usable.
    pub const REQUIRED: &[&str] = &[
        CREATE_SESSION,
        CREATE_SESSION_WITH_INSTRUCTIONS,
        RELEASE_SESSION,
        CHECK_MODEL_AVAILABILITY,
        RESPOND_SYNC,
        RESPOND_WITH_STRUCTURED_OUTPUT,
        RESPOND_WITH_TOOLS,
        RESPOND_WITH_OPTIONS,
        GET_MODEL_INFO,
        REGISTER_TOOL,
        CLEAR_TOOLS,
        SET_TOOL_CALLBACK,
        FREE,
    ];
}

/// `void* CreateSession(void)`
pub type CreateSessionFn = unsafe extern "C" fn() -> *mut c_void;

/// `void* CreateSessionWithInstructions(const char* instructions)`
pub type CreateSessionWithInstructionsFn =
    unsafe extern "C" fn(instructions: *const c_char) -> *mut c_void;

/// `void ReleaseSession(void* session)`
pub type ReleaseSessionFn = unsafe extern "C" fn(session: *mut c_void);

/// `int CheckModelAvailability(void)`; see [`Availability::from_code`].
pub type CheckAvailabilityFn = unsafe extern "C" fn() -> c_int;

/// Shared shape of `RespondSync`, `RespondWithStructuredOutput` and
/// `RespondWithTools`: `char* F(void* session, const char* prompt)`.
pub type RespondFn = unsafe extern "C" fn(session: *mut c_void, prompt: *const c_char) -> *mut c_char;

/// `char* RespondWithOptions(void* session, const char* prompt, int maxTokens, float temperature)`
pub type RespondWithOptionsFn = unsafe extern "C" fn(
    session: *mut c_void,
    prompt: *const c_char,
    max_tokens: c_int,
    temperature: c_float,
) -> *mut c_char;

/// `char* GetModelInfo(void)`
pub type ModelInfoFn = unsafe extern "C" fn() -> *mut c_char;

/// `int RegisterTool(void* session, const char* toolDefinitionJSON)`; 1 on success.
pub type RegisterToolFn =
    unsafe extern "C" fn(session: *mut c_void, definition: *const c_char) -> c_int;

/// `int ClearTools(void* session)`; 1 on success.
pub type ClearToolsFn = unsafe extern "C" fn(session: *mut c_void) -> c_int;

/// Host function the shim calls to run a tool:
/// `char* callback(const char* name, const char* argsJSON)`.
///
/// The returned buffer is a JSON-encoded tool result allocated with the C
/// allocator; the shim frees it.
pub type ToolCallbackFn =
    unsafe extern "C" fn(name: *const c_char, args_json: *const c_char) -> *mut c_char;

/// `void SetToolCallback(callback)`; called once per process.
pub type SetToolCallbackFn = unsafe extern "C" fn(callback: ToolCallbackFn);

/// `void free(void*)` from the allocator the shim returns buffers with.
pub type FreeFn = unsafe extern "C" fn(ptr: *mut c_void);

/// Per-chunk streaming callback: `void onChunk(const char* chunk, void* userData)`.
///
/// An empty chunk marks the end of the stream.
pub type StreamChunkFn = unsafe extern "C" fn(chunk: *const c_char, user_data: *mut c_void);

/// `void RespondStreaming(void* session, const char* prompt, onChunk, void* userData)`
pub type RespondStreamingFn = unsafe extern "C" fn(
    session: *mut c_void,
    prompt: *const c_char,
    on_chunk: StreamChunkFn,
    user_data: *mut c_void,
);

/// Fully resolved table of shim entry points.
///
/// A table is either complete or does not exist: the loader never hands out a
/// partially resolved one. Only `respond_streaming` is optional because older
/// shims predate it.
#[derive(Debug, Clone, Copy)]
pub struct ShimVTable {
    pub create_session: CreateSessionFn,
    pub create_session_with_instructions: CreateSessionWithInstructionsFn,
    pub release_session: ReleaseSessionFn,
    pub check_availability: CheckAvailabilityFn,
    pub respond: RespondFn,
    pub respond_structured: RespondFn,
    pub respond_with_tools: RespondFn,
    pub respond_with_options: RespondWithOptionsFn,
    pub model_info: ModelInfoFn,
    pub register_tool: RegisterToolFn,
    pub clear_tools: ClearToolsFn,
    pub set_tool_callback: SetToolCallbackFn,
    pub free: FreeFn,
    pub respond_streaming: Option<RespondStreamingFn>,
}

/// Whether the on-device model can currently be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Code 0.
    Available,
    /// Code 1: the platform AI feature is switched off.
    FeatureDisabled,
    /// Code 2: the model is still downloading or warming up.
    NotReady,
    /// Code 3: this device cannot run the model.
    DeviceIneligible,
    /// Any other code.
    Unknown(i32),
}

impl Availability {
    /// Maps a raw `CheckModelAvailability` code.
    #[must_use]
    pub const fn from_code(code: c_int) -> Self {
        match code {
            0 => Self::Available,
            1 => Self::FeatureDisabled,
            2 => Self::NotReady,
            3 => Self::DeviceIneligible,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub const fn code(self) -> c_int {
        match self {
            Self::Available => 0,
            Self::FeatureDisabled => 1,
            Self::NotReady => 2,
            Self::DeviceIneligible => 3,
            Self::Unknown(code) => code,
        }
    }

    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Available)
    }

    /// Human-readable reason, suitable for error messages.
    #[must_use]
    pub fn describe(self) -> String {
        match self {
            Self::Available => "available".to_string(),
            Self::FeatureDisabled => "Apple Intelligence not enabled".to_string(),
            Self::NotReady => "model not ready".to_string(),
            Self::DeviceIneligible => "device not eligible".to_string(),
            Self::Unknown(code) => format!("unknown availability status: {code}"),
        }
    }
}
