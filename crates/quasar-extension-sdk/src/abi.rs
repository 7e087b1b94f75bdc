//! C ABI shared by the host and native extensions.
//!
//! Every type here is `#[repr(C)]` and must only change together with
//! [`QUASAR_API_VERSION`].

use std::ffi::{c_char, c_void};

/// API version the host is compiled against.
/// Extensions declaring any other version are rejected at load time.
pub const QUASAR_API_VERSION: u32 = 3;

/// Symbol name of the descriptor constructor.
pub const LOAD_SYMBOL: &[u8] = b"quasar_ext_load\0";

/// Symbol name of the descriptor destructor.
pub const DESTROY_SYMBOL: &[u8] = b"quasar_ext_destroy\0";

/// Source is polled by clients on demand, optionally cached for `ttl_ms`.
pub const QUASAR_SOURCE_POLLED: u32 = 0;

/// Source is pushed whenever the extension signals new data.
pub const QUASAR_SOURCE_SIGNALED: u32 = 1;

/// Source is pushed by the host every `interval_ms`.
pub const QUASAR_SOURCE_INTERVAL: u32 = 2;

/// Identity of an extension. All strings are null-terminated UTF-8.
///
/// `name` and `fullname` are required and must be non-empty.
#[repr(C)]
pub struct QuasarExtFields {
    /// Short identifier, used as the topic prefix
    pub name: *const c_char,
    /// Display name
    pub fullname: *const c_char,
    pub author: *const c_char,
    pub description: *const c_char,
    pub version: *const c_char,
    pub url: *const c_char,
}

/// Declaration of one data source.
#[repr(C)]
pub struct QuasarDataSource {
    /// Source name, unique within the extension
    pub name: *const c_char,
    /// One of the `QUASAR_SOURCE_*` constants
    pub kind: u32,
    /// Push period for `QUASAR_SOURCE_INTERVAL`, must be non-zero
    pub interval_ms: u64,
    /// Cache validity for `QUASAR_SOURCE_POLLED`, zero disables caching
    pub ttl_ms: u64,
    /// Written by the host during load
    pub uid: u64,
}

/// Output slot handed to `get_data`.
///
/// `set_value` takes the value as JSON text; passing `"null"` is an explicit
/// null, which differs from never calling `set_value` ("no data yet").
#[repr(C)]
pub struct QuasarReturn {
    pub sink: *mut c_void,
    pub set_value: extern "C" fn(sink: *mut c_void, json: *const c_char),
    pub push_error: extern "C" fn(sink: *mut c_void, message: *const c_char),
}

/// Host callbacks available to an extension between `init` and `shutdown`.
#[repr(C)]
pub struct QuasarHost {
    pub ctx: *const c_void,
    /// Signals new data on an event-signaled source and blocks until the host
    /// has published it. Returns `false` on timeout or unknown source.
    pub signal_data_ready: extern "C" fn(ctx: *const c_void, uid: u64) -> bool,
}

pub type InitFn = unsafe extern "C" fn(host: *const QuasarHost) -> bool;
/// Always called before destroy; `host` is null if init never ran.
pub type ShutdownFn = unsafe extern "C" fn(host: *const QuasarHost);
pub type GetDataFn =
    unsafe extern "C" fn(uid: u64, out: *const QuasarReturn, args: *const c_char) -> bool;

/// Descriptor returned by `quasar_ext_load`.
///
/// The extension owns this memory until `quasar_ext_destroy` is called on it.
#[repr(C)]
pub struct QuasarExtInfo {
    pub api_version: u32,
    pub fields: *const QuasarExtFields,
    pub data_sources: *mut QuasarDataSource,
    pub num_data_sources: usize,
    pub init: Option<InitFn>,
    pub shutdown: Option<ShutdownFn>,
    pub get_data: Option<GetDataFn>,
}

pub type LoadFn = unsafe extern "C" fn() -> *mut QuasarExtInfo;
pub type DestroyFn = unsafe extern "C" fn(info: *mut QuasarExtInfo);
