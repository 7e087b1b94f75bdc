//! Sample native extension.
//!
//! Declares one source of each delivery class:
//! - `time`: polled, cached for one second
//! - `uptime`: pushed by the host every second
//! - `ticks`: pushed whenever the producer thread signals (every two seconds)

use std::ffi::c_char;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use quasar_extension_sdk::{
    args_from_raw, HostRef, QuasarDataSource, QuasarExtFields, QuasarExtInfo, QuasarHost,
    QuasarReturn, ReturnSink, QUASAR_API_VERSION, QUASAR_SOURCE_INTERVAL, QUASAR_SOURCE_POLLED,
    QUASAR_SOURCE_SIGNALED,
};
use serde_json::json;

const TIME: usize = 0;
const UPTIME: usize = 1;
const TICKS: usize = 2;

const TICK_PERIOD: Duration = Duration::from_secs(2);

static INSTANCE: AtomicPtr<Sample> = AtomicPtr::new(ptr::null_mut());

struct Producer {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Extension state. `info` must stay the first field: the host hands the
/// descriptor pointer back to `quasar_ext_destroy`.
#[repr(C)]
struct Sample {
    info: QuasarExtInfo,
    fields: QuasarExtFields,
    sources: [QuasarDataSource; 3],
    started: Instant,
    ticks: AtomicU64,
    producer: Mutex<Option<Producer>>,
}

fn source(name: &'static std::ffi::CStr, kind: u32, interval_ms: u64, ttl_ms: u64) -> QuasarDataSource {
    QuasarDataSource {
        name: name.as_ptr(),
        kind,
        interval_ms,
        ttl_ms,
        uid: 0,
    }
}

fn instance() -> Option<&'static Sample> {
    // SAFETY: set by `quasar_ext_load`, cleared before the box is freed.
    unsafe { INSTANCE.load(Ordering::Acquire).as_ref() }
}

impl Sample {
    fn uid(&self, index: usize) -> u64 {
        self.sources[index].uid
    }

    fn index_of(&self, uid: u64) -> Option<usize> {
        self.sources.iter().position(|s| s.uid == uid)
    }
}

#[no_mangle]
pub extern "C" fn quasar_ext_load() -> *mut QuasarExtInfo {
    let mut sample = Box::new(Sample {
        info: QuasarExtInfo {
            api_version: QUASAR_API_VERSION,
            fields: ptr::null(),
            data_sources: ptr::null_mut(),
            num_data_sources: 3,
            init: Some(sample_init),
            shutdown: Some(sample_shutdown),
            get_data: Some(sample_get_data),
        },
        fields: QuasarExtFields {
            name: c"sample".as_ptr(),
            fullname: c"Sample Extension".as_ptr(),
            author: c"Quasar Contributors".as_ptr(),
            description: c"Clock, uptime and tick counter".as_ptr(),
            version: c"1.0.0".as_ptr(),
            url: c"https://github.com/r52/quasar".as_ptr(),
        },
        sources: [
            source(c"time", QUASAR_SOURCE_POLLED, 0, 1_000),
            source(c"uptime", QUASAR_SOURCE_INTERVAL, 1_000, 0),
            source(c"ticks", QUASAR_SOURCE_SIGNALED, 0, 0),
        ],
        started: Instant::now(),
        ticks: AtomicU64::new(0),
        producer: Mutex::new(None),
    });

    sample.info.fields = &sample.fields;
    sample.info.data_sources = sample.sources.as_mut_ptr();

    let raw = Box::into_raw(sample);
    INSTANCE.store(raw, Ordering::Release);
    raw.cast()
}

/// # Safety
/// `info` must be the pointer returned by [`quasar_ext_load`].
#[no_mangle]
pub unsafe extern "C" fn quasar_ext_destroy(info: *mut QuasarExtInfo) {
    if info.is_null() {
        return;
    }
    let sample = info.cast::<Sample>();
    let _ = INSTANCE.compare_exchange(sample, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire);
    drop(Box::from_raw(sample));
}

unsafe extern "C" fn sample_init(host: *const QuasarHost) -> bool {
    let Ok(host) = HostRef::from_raw(host) else {
        return false;
    };
    let Some(sample) = instance() else {
        return false;
    };

    let uid = sample.uid(TICKS);
    let (stop, stopped) = mpsc::channel::<()>();

    let spawned = thread::Builder::new()
        .name("sample-ticks".to_string())
        .spawn(move || {
            while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(TICK_PERIOD) {
                if let Some(sample) = instance() {
                    sample.ticks.fetch_add(1, Ordering::Relaxed);
                }
                host.signal_data_ready(uid);
            }
        });

    match spawned {
        Ok(handle) => {
            *sample.producer.lock() = Some(Producer { stop, handle });
            true
        }
        Err(_) => false,
    }
}

unsafe extern "C" fn sample_shutdown(_host: *const QuasarHost) {
    let Some(sample) = instance() else {
        return;
    };
    let producer = sample.producer.lock().take();
    if let Some(producer) = producer {
        drop(producer.stop);
        let _ = producer.handle.join();
    }
}

unsafe extern "C" fn sample_get_data(uid: u64, out: *const QuasarReturn, args: *const c_char) -> bool {
    let Some(sink) = ReturnSink::from_raw(out) else {
        return false;
    };
    let Some(sample) = instance() else {
        return false;
    };

    let value = match sample.index_of(uid) {
        Some(TIME) => json!({
            "time": chrono::Local::now().to_rfc3339(),
            "args": args_from_raw(args),
        }),
        Some(UPTIME) => json!({ "seconds": sample.started.elapsed().as_secs() }),
        Some(TICKS) => json!({ "ticks": sample.ticks.load(Ordering::Relaxed) }),
        _ => {
            sink.push_error(&format!("sample: unknown source uid {}", uid));
            return false;
        }
    };

    match sink.set_value(&value) {
        Ok(()) => true,
        Err(e) => {
            sink.push_error(&e.to_string());
            false
        }
    }
}
