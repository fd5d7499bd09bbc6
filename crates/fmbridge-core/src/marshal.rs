//! String marshaling across the shim boundary.
//!
//! Every buffer type here encodes who allocated it and therefore who frees it:
//!
//! | Type             | Allocated by        | Freed by                      |
//! |------------------|---------------------|-------------------------------|
//! | [`HostCString`]  | host (Rust)         | host, on drop                 |
//! | [`NativeString`] | shim (C allocator)  | host, with the shim's `free`  |
//! | [`CallbackBuffer`]| host (C allocator) | shim, after `into_raw`        |
//!
//! Each type has exactly one release site, so mixing allocators requires
//! going out of one's way with raw pointers.

use std::{
    ffi::{CStr, CString, c_char, c_void},
    ptr::NonNull,
};

use fmbridge_abi::FreeFn;

/// Errors that can occur when converting host strings for the shim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarshalError {
    /// C strings cannot carry embedded null bytes; truncating silently would
    /// change the prompt.
    #[error("string contains an interior null byte at position {position}")]
    InteriorNul { position: usize },

    /// The C allocator returned null.
    #[error("failed to allocate {size} bytes for a native buffer")]
    OutOfMemory { size: usize },
}

/// A host-allocated, null-terminated copy of a string, lent to the shim for
/// the duration of one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCString(CString);

impl HostCString {
    /// Copies `text` into a new null-terminated buffer.
    ///
    /// # Errors
    ///
    /// Returns [`MarshalError::InteriorNul`] if `text` contains a null byte.
    pub fn new(text: &str) -> Result<Self, MarshalError> {
        CString::new(text)
            .map(Self)
            .map_err(|err| MarshalError::InteriorNul {
                position: err.nul_position(),
            })
    }

    /// Pointer valid for as long as `self` is alive.
    #[must_use]
    pub fn as_ptr(&self) -> *const c_char {
        self.0.as_ptr()
    }

    #[cfg(test)]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// A null-terminated buffer returned by the shim.
///
/// The bytes are released with the shim's `free` when this value is dropped,
/// exactly once.
pub struct NativeString {
    ptr: NonNull<c_char>,
    free: FreeFn,
}

impl NativeString {
    /// Takes ownership of a buffer returned by the shim.
    ///
    /// Returns `None` for a null pointer, which the shim uses to signal "no
    /// response".
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to a null-terminated buffer allocated by
    /// the allocator that `free` belongs to, and nothing else may free it.
    pub unsafe fn from_raw(ptr: *mut c_char, free: FreeFn) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr, free })
    }

    /// Bytes up to (not including) the terminating null.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `from_raw` guarantees a live, null-terminated buffer.
        unsafe { CStr::from_ptr(self.ptr.as_ptr()) }.to_bytes()
    }

    /// Copies the contents into a host string and releases the native buffer.
    ///
    /// Invalid UTF-8 is replaced rather than rejected; the shim only ever
    /// produces UTF-8, so replacement indicates a shim bug worth seeing.
    #[must_use]
    pub fn into_string(self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}

impl Drop for NativeString {
    fn drop(&mut self) {
        // SAFETY: the buffer came from the allocator `free` belongs to and
        // this is the only release site.
        unsafe { (self.free)(self.ptr.as_ptr().cast::<c_void>()) };
    }
}

impl std::fmt::Debug for NativeString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeString")
            .field("contents", &String::from_utf8_lossy(self.as_bytes()))
            .finish_non_exhaustive()
    }
}

/// A host-produced result buffer handed to the shim from the tool callback.
///
/// Allocated with the C allocator because the shim releases it with `free`.
/// Until [`CallbackBuffer::into_raw`] transfers it, the host still owns it
/// and frees it on drop.
#[derive(Debug)]
pub struct CallbackBuffer(NonNull<c_char>);

impl CallbackBuffer {
    /// Copies `text` into a C-allocated, null-terminated buffer.
    ///
    /// # Errors
    ///
    /// Returns [`MarshalError::InteriorNul`] if `text` contains a null byte, or
    /// [`MarshalError::OutOfMemory`] if allocation fails.
    pub fn new(text: &str) -> Result<Self, MarshalError> {
        if let Some(position) = text.bytes().position(|b| b == 0) {
            return Err(MarshalError::InteriorNul { position });
        }

        let size = text.len() + 1;
        // SAFETY: malloc has no preconditions; the result is checked below.
        let raw = unsafe { libc::malloc(size) }.cast::<c_char>();
        let ptr = NonNull::new(raw).ok_or(MarshalError::OutOfMemory { size })?;

        // SAFETY: `ptr` points to `size` writable bytes that do not overlap
        // `text`.
        unsafe {
            std::ptr::copy_nonoverlapping(text.as_ptr().cast::<c_char>(), ptr.as_ptr(), text.len());
            ptr.as_ptr().add(text.len()).write(0);
        }

        Ok(Self(ptr))
    }

    /// Hands the buffer to the shim, which becomes responsible for freeing it.
    #[must_use]
    pub fn into_raw(self) -> *mut c_char {
        let ptr = self.0.as_ptr();
        std::mem::forget(self);
        ptr
    }

    #[cfg(test)]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `new` wrote a terminating null.
        unsafe { CStr::from_ptr(self.0.as_ptr()) }.to_bytes()
    }
}

impl Drop for CallbackBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated with `libc::malloc` in `new` and not yet handed
        // over, otherwise `into_raw` would have forgotten `self`.
        unsafe { libc::free(self.0.as_ptr().cast::<c_void>()) };
    }
}

/// Copies a string the shim lends to the host (callback arguments).
///
/// The host never frees these; the shim keeps ownership. Null maps to `None`.
///
/// # Safety
///
/// `ptr` must be null or point to a null-terminated buffer that stays valid
/// for the duration of this call.
#[must_use]
pub unsafe fn copy_borrowed(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null and null-terminated per the caller's contract.
    let bytes = unsafe { CStr::from_ptr(ptr) }.to_bytes();
    Some(String::from_utf8_lossy(bytes).into_owned())
}
