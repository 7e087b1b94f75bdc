//! Safe wrappers over the raw ABI for extension authors.

use std::ffi::{c_char, CStr, CString};

use crate::abi::{QuasarHost, QuasarReturn};

/// Errors raised by the SDK helpers.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error("Null pointer")]
    NullPointer,

    #[error("String contains an interior NUL byte")]
    InteriorNul(#[from] std::ffi::NulError),
}

/// Borrowed view of the output slot passed to `get_data`.
pub struct ReturnSink<'a> {
    raw: &'a QuasarReturn,
}

impl<'a> ReturnSink<'a> {
    /// Wrap the raw pointer received by `get_data`.
    ///
    /// # Safety
    /// `raw` must be null or the pointer the host passed to the current
    /// `get_data` call; the returned sink must not outlive that call.
    pub unsafe fn from_raw(raw: *const QuasarReturn) -> Option<Self> {
        raw.as_ref().map(|raw| Self { raw })
    }

    /// Hand a value to the host.
    pub fn set_value(&self, value: &serde_json::Value) -> Result<(), SdkError> {
        let text = CString::new(value.to_string())?;
        (self.raw.set_value)(self.raw.sink, text.as_ptr());
        Ok(())
    }

    /// Report an explicit null, which is different from reporting nothing.
    pub fn set_null(&self) {
        (self.raw.set_value)(self.raw.sink, c"null".as_ptr());
    }

    /// Attach a diagnostic message to the current response.
    pub fn push_error(&self, message: &str) {
        let text = CString::new(message.replace('\0', " "))
            .unwrap_or_else(|_| CString::from(c"invalid error message"));
        (self.raw.push_error)(self.raw.sink, text.as_ptr());
    }
}

/// Handle to the host, valid from `init` until `shutdown` returns.
#[derive(Debug, Clone, Copy)]
pub struct HostRef {
    raw: *const QuasarHost,
}

// The host keeps the handle alive and callable from any thread until the
// extension's shutdown hook has returned.
unsafe impl Send for HostRef {}
unsafe impl Sync for HostRef {}

impl HostRef {
    /// Wrap the pointer received by `init`.
    ///
    /// # Safety
    /// `raw` must be the pointer the host passed to `init` or `shutdown`.
    pub unsafe fn from_raw(raw: *const QuasarHost) -> Result<Self, SdkError> {
        if raw.is_null() {
            return Err(SdkError::NullPointer);
        }
        Ok(Self { raw })
    }

    /// Announce new data on an event-signaled source.
    ///
    /// Blocks until the host has pushed the data to its subscribers.
    /// Returns `false` if the host rejected the signal or timed out.
    pub fn signal_data_ready(&self, uid: u64) -> bool {
        // SAFETY: validity guaranteed by the contract of `from_raw`.
        let host = unsafe { &*self.raw };
        (host.signal_data_ready)(host.ctx, uid)
    }
}

/// Convert the optional `args` string passed to `get_data`.
///
/// # Safety
/// `args` must be null or point to a null-terminated string.
pub unsafe fn args_from_raw(args: *const c_char) -> Option<String> {
    if args.is_null() {
        return None;
    }
    Some(CStr::from_ptr(args).to_string_lossy().into_owned())
}
