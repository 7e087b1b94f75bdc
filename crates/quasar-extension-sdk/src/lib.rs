//! SDK for writing Quasar native extensions.
//!
//! A native extension is a shared library (.so/.dylib/.dll) exporting two
//! symbols:
//! - `quasar_ext_load()` -> `*mut QuasarExtInfo`
//! - `quasar_ext_destroy(*mut QuasarExtInfo)`
//!
//! The descriptor returned by `quasar_ext_load` declares the extension's
//! identity, its data sources and three lifecycle hooks (`init`, `shutdown`,
//! `get_data`). The host writes a process-wide unique id into every
//! [`QuasarDataSource::uid`] before `init` runs; the extension uses that id to
//! tell its sources apart in `get_data` and when signalling new data.
//!
//! # Usage
//!
//! ```rust,ignore
//! use quasar_extension_sdk::{ReturnSink, HostRef};
//!
//! unsafe extern "C" fn get_data(uid: u64, out: *const QuasarReturn, _args: *const c_char) -> bool {
//!     let Some(sink) = ReturnSink::from_raw(out) else { return false };
//!     sink.set_value(&serde_json::json!({ "uid": uid }));
//!     true
//! }
//! ```

pub mod abi;
pub mod helpers;

pub use abi::{
    DestroyFn, GetDataFn, InitFn, LoadFn, QuasarDataSource, QuasarExtFields, QuasarExtInfo,
    QuasarHost, QuasarReturn, ShutdownFn, DESTROY_SYMBOL, LOAD_SYMBOL, QUASAR_API_VERSION,
    QUASAR_SOURCE_INTERVAL, QUASAR_SOURCE_POLLED, QUASAR_SOURCE_SIGNALED,
};
pub use helpers::{args_from_raw, HostRef, ReturnSink, SdkError};
