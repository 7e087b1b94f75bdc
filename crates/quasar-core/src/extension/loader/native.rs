//! [`ExtensionModule`] adapter over a native shared library.

use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use libloading::{Library, Symbol};
use parking_lot::Mutex;
use quasar_extension_sdk::{
    DestroyFn, GetDataFn, InitFn, LoadFn, QuasarExtInfo, QuasarHost, QuasarReturn, ShutdownFn,
    DESTROY_SYMBOL, LOAD_SYMBOL, QUASAR_SOURCE_INTERVAL, QUASAR_SOURCE_POLLED,
    QUASAR_SOURCE_SIGNALED,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ExtensionError, Result};
use crate::extension::host::HostHandle;
use crate::extension::module::{
    DataReply, ExtensionFields, ExtensionModule, ModuleDescriptor, ReplyOutcome,
    SourceDeclaration,
};
use crate::extension::source::DeliveryClass;
use crate::extension::uid::SourceUid;

/// Host callback table handed to the library, boxed so its address is stable.
struct NativeHost {
    raw: QuasarHost,
    handle: HostHandle,
}

/// A loaded extension library.
pub struct NativeModule {
    info: *mut QuasarExtInfo,
    init_fn: InitFn,
    shutdown_fn: ShutdownFn,
    get_data_fn: GetDataFn,
    destroy_fn: DestroyFn,
    host: Mutex<Option<Box<NativeHost>>>,
    destroyed: AtomicBool,
    // Dropped last: every pointer above lives inside the library. `None` for
    // extensions linked into the host binary.
    library: Option<Library>,
}

// The descriptor is only written during registration (`assign_uid`) and the
// library's entry points are required to be thread-safe.
unsafe impl Send for NativeModule {}
unsafe impl Sync for NativeModule {}

impl NativeModule {
    /// Open `path` and call its load entry point.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ExtensionError::NotFound(path.display().to_string()));
        }
        if !super::is_native_extension(path) {
            return Err(ExtensionError::InvalidFormat(format!(
                "{} is not a shared library",
                path.display()
            )));
        }

        let library = unsafe {
            Library::new(path).map_err(|e| {
                ExtensionError::LoadFailed(format!("Failed to load library: {}", e))
            })?
        };

        let (load_fn, destroy_fn) = unsafe {
            let load: Symbol<LoadFn> = library.get(LOAD_SYMBOL).map_err(|e| {
                ExtensionError::SymbolNotFound(format!("quasar_ext_load: {}", e))
            })?;
            let destroy: Symbol<DestroyFn> = library.get(DESTROY_SYMBOL).map_err(|e| {
                ExtensionError::SymbolNotFound(format!("quasar_ext_destroy: {}", e))
            })?;
            (*load, *destroy)
        };

        let module = unsafe { Self::open(load_fn, destroy_fn, Some(library))? };
        debug!(path = %path.display(), "Extension library opened");
        Ok(module)
    }

    /// Wrap an extension whose entry points are linked into this binary.
    ///
    /// # Safety
    /// `load` and `destroy` must follow the extension ABI: `load` returns a
    /// descriptor that stays valid until it is passed to `destroy`.
    pub unsafe fn linked(load: LoadFn, destroy: DestroyFn) -> Result<Self> {
        Self::open(load, destroy, None)
    }

    unsafe fn open(load_fn: LoadFn, destroy_fn: DestroyFn, library: Option<Library>) -> Result<Self> {
        let info = load_fn();
        if info.is_null() {
            return Err(ExtensionError::NullPointer);
        }

        let (Some(init_fn), Some(shutdown_fn), Some(get_data_fn)) =
            ((*info).init, (*info).shutdown, (*info).get_data)
        else {
            destroy_fn(info);
            return Err(ExtensionError::MissingField(
                "init, shutdown and get_data hooks are required".to_string(),
            ));
        };

        Ok(Self {
            info,
            init_fn,
            shutdown_fn,
            get_data_fn,
            destroy_fn,
            host: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            library,
        })
    }

    /// Descriptor handed out by the library; valid until the module is destroyed.
    pub fn info_ptr(&self) -> *const QuasarExtInfo {
        self.info
    }

    fn host_ptr(&self) -> *const QuasarHost {
        self.host
            .lock()
            .as_ref()
            .map_or(std::ptr::null(), |host| &host.raw as *const QuasarHost)
    }
}

impl ExtensionModule for NativeModule {
    fn descriptor(&self) -> Result<ModuleDescriptor> {
        unsafe { read_descriptor(&*self.info) }
    }

    fn assign_uid(&self, index: usize, uid: SourceUid) {
        unsafe { write_uid(self.info, index, uid) }
    }

    fn init(&self, host: &HostHandle) -> bool {
        let mut boxed = Box::new(NativeHost {
            raw: QuasarHost {
                ctx: std::ptr::null(),
                signal_data_ready: signal_trampoline,
            },
            handle: host.clone(),
        });
        boxed.raw.ctx = &*boxed as *const NativeHost as *const c_void;

        let raw = {
            let mut slot = self.host.lock();
            &slot.insert(boxed).raw as *const QuasarHost
        };

        unsafe { (self.init_fn)(raw) }
    }

    fn get_data(&self, uid: SourceUid, args: Option<&str>) -> DataReply {
        let mut builder = ReplyBuilder::default();
        let out = QuasarReturn {
            sink: &mut builder as *mut ReplyBuilder as *mut c_void,
            set_value: set_value_trampoline,
            push_error: push_error_trampoline,
        };

        let args = match args.map(CString::new).transpose() {
            Ok(args) => args,
            Err(_) => {
                return DataReply::failed().with_error("arguments contain a NUL byte");
            }
        };
        let args_ptr = args.as_ref().map_or(std::ptr::null(), |a| a.as_ptr());

        let ok = unsafe { (self.get_data_fn)(uid.get(), &out, args_ptr) };
        builder.finish(ok)
    }

    fn shutdown(&self, _host: &HostHandle) {
        let raw = self.host_ptr();
        unsafe { (self.shutdown_fn)(raw) };
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        unsafe { (self.destroy_fn)(self.info) };
        self.host.lock().take();
    }
}

impl Drop for NativeModule {
    fn drop(&mut self) {
        // Rejected during registration: never initialized, still owns its info.
        self.destroy();
    }
}

/// Translate a library descriptor.
///
/// A null source array is reported as missing even when the count is zero.
unsafe fn read_descriptor(info: &QuasarExtInfo) -> Result<ModuleDescriptor> {
    let fields = info.fields.as_ref().map(|f| ExtensionFields {
        name: c_string(f.name),
        full_name: c_string(f.fullname),
        author: c_string(f.author),
        description: c_string(f.description),
        version: c_string(f.version),
        url: c_string(f.url),
    });

    let sources = if info.data_sources.is_null() {
        None
    } else {
        let raw = std::slice::from_raw_parts(info.data_sources, info.num_data_sources);
        let mut declared = Vec::with_capacity(raw.len());
        for source in raw {
            let name = c_string(source.name);
            let class = match source.kind {
                QUASAR_SOURCE_POLLED => DeliveryClass::PollOnDemand {
                    ttl: (source.ttl_ms > 0).then(|| Duration::from_millis(source.ttl_ms)),
                },
                QUASAR_SOURCE_SIGNALED => DeliveryClass::EventSignaled,
                QUASAR_SOURCE_INTERVAL if source.interval_ms > 0 => {
                    DeliveryClass::interval(Duration::from_millis(source.interval_ms))
                }
                QUASAR_SOURCE_INTERVAL => {
                    return Err(ExtensionError::InvalidField {
                        field: name,
                        reason: "interval source needs a positive interval".to_string(),
                    })
                }
                other => {
                    return Err(ExtensionError::InvalidField {
                        field: name,
                        reason: format!("unknown source kind {}", other),
                    })
                }
            };
            declared.push(SourceDeclaration::new(name, class));
        }
        Some(declared)
    };

    Ok(ModuleDescriptor {
        api_version: info.api_version,
        fields,
        sources,
    })
}

/// Write `uid` back into the library's declaration at `index`.
unsafe fn write_uid(info: *mut QuasarExtInfo, index: usize, uid: SourceUid) {
    let info = &mut *info;
    if index < info.num_data_sources && !info.data_sources.is_null() {
        (*info.data_sources.add(index)).uid = uid.get();
    }
}

#[derive(Default)]
struct ReplyBuilder {
    value: Option<Value>,
    invalid: bool,
    errors: Vec<String>,
}

impl ReplyBuilder {
    fn finish(self, ok: bool) -> DataReply {
        let outcome = match (ok, self.value) {
            (false, _) => ReplyOutcome::Failed,
            (true, _) if self.invalid => ReplyOutcome::Failed,
            (true, Some(value)) => ReplyOutcome::Value(value),
            (true, None) => ReplyOutcome::NoData,
        };
        DataReply {
            outcome,
            errors: self.errors,
        }
    }
}

unsafe fn c_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

extern "C" fn set_value_trampoline(sink: *mut c_void, json: *const c_char) {
    let Some(builder) = (unsafe { (sink as *mut ReplyBuilder).as_mut() }) else {
        return;
    };
    if json.is_null() {
        builder.value = Some(Value::Null);
        return;
    }
    let text = unsafe { CStr::from_ptr(json) }.to_string_lossy();
    match serde_json::from_str(&text) {
        Ok(value) => builder.value = Some(value),
        Err(e) => {
            builder.invalid = true;
            builder.errors.push(format!("Extension returned invalid JSON: {}", e));
        }
    }
}

extern "C" fn push_error_trampoline(sink: *mut c_void, message: *const c_char) {
    let Some(builder) = (unsafe { (sink as *mut ReplyBuilder).as_mut() }) else {
        return;
    };
    if !message.is_null() {
        let text = unsafe { CStr::from_ptr(message) };
        builder.errors.push(text.to_string_lossy().into_owned());
    }
}

extern "C" fn signal_trampoline(ctx: *const c_void, uid: u64) -> bool {
    let Some(host) = (unsafe { (ctx as *const NativeHost).as_ref() }) else {
        return false;
    };

    // Unwinding across the C boundary is undefined; contain it here.
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        host.handle.signal_data_ready(SourceUid::from_raw(uid))
    }));

    match result {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(uid, error = %e, "Signal rejected");
            false
        }
        Err(_) => {
            warn!(uid, "Panic while handling signal");
            false
        }
    }
}
