//! Shared fixtures: a scripted in-process module and a recording broker.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use quasar_core::error::Result;
use quasar_core::extension::QUASAR_API_VERSION;
use quasar_core::prelude::*;

/// What the module has seen, observable after it moved into an extension.
#[derive(Default)]
pub struct Recorder {
    replies: Mutex<HashMap<String, DataReply>>,
    delays: Mutex<HashMap<String, Duration>>,
    uids: Mutex<HashMap<SourceUid, String>>,
    calls: Mutex<HashMap<String, usize>>,
    last_args: Mutex<Option<Option<String>>>,
    log: Mutex<Vec<&'static str>>,
    host: Mutex<Option<HostHandle>>,
    shut_down: AtomicBool,
    in_get_data: AtomicUsize,
    called_after_shutdown: AtomicBool,
}

impl Recorder {
    pub fn calls(&self, source: &str) -> usize {
        self.calls.lock().get(source).copied().unwrap_or(0)
    }

    pub fn uid(&self, source: &str) -> Option<SourceUid> {
        self.uids
            .lock()
            .iter()
            .find(|(_, name)| name.as_str() == source)
            .map(|(uid, _)| *uid)
    }

    pub fn uid_count(&self) -> usize {
        self.uids.lock().len()
    }

    pub fn set_reply(&self, source: &str, reply: DataReply) {
        self.replies.lock().insert(source.to_string(), reply);
    }

    pub fn set_delay(&self, source: &str, delay: Duration) {
        self.delays.lock().insert(source.to_string(), delay);
    }

    pub fn last_args(&self) -> Option<Option<String>> {
        self.last_args.lock().clone()
    }

    pub fn log(&self) -> Vec<&'static str> {
        self.log.lock().clone()
    }

    pub fn host(&self) -> Option<HostHandle> {
        self.host.lock().clone()
    }

    /// `get_data` ran after `shutdown` started or was still running then.
    pub fn called_after_shutdown(&self) -> bool {
        self.called_after_shutdown.load(Ordering::SeqCst)
    }
}

/// Builder for a scripted module.
pub struct FakeModule {
    api_version: u32,
    fields: Option<ExtensionFields>,
    sources: Option<Vec<SourceDeclaration>>,
    init_ok: bool,
    panic_on_descriptor: bool,
    recorder: Arc<Recorder>,
}

impl FakeModule {
    pub fn new(name: &str) -> Self {
        Self {
            api_version: QUASAR_API_VERSION,
            fields: Some(ExtensionFields {
                name: name.to_string(),
                full_name: format!("{} extension", name),
                author: "tests".to_string(),
                description: "scripted module".to_string(),
                version: "1.0".to_string(),
                url: String::new(),
            }),
            sources: Some(Vec::new()),
            init_ok: true,
            panic_on_descriptor: false,
            recorder: Arc::new(Recorder::default()),
        }
    }

    pub fn source(mut self, name: &str, class: DeliveryClass) -> Self {
        self.sources
            .get_or_insert_with(Vec::new)
            .push(SourceDeclaration::new(name, class));
        self
    }

    pub fn reply(self, source: &str, reply: DataReply) -> Self {
        self.recorder.set_reply(source, reply);
        self
    }

    pub fn api_version(mut self, version: u32) -> Self {
        self.api_version = version;
        self
    }

    pub fn without_fields(mut self) -> Self {
        self.fields = None;
        self
    }

    pub fn without_sources(mut self) -> Self {
        self.sources = None;
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.init_ok = false;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_on_descriptor = true;
        self
    }

    pub fn recorder(&self) -> Arc<Recorder> {
        self.recorder.clone()
    }
}

impl ExtensionModule for FakeModule {
    fn descriptor(&self) -> Result<ModuleDescriptor> {
        if self.panic_on_descriptor {
            panic!("descriptor exploded");
        }
        Ok(ModuleDescriptor {
            api_version: self.api_version,
            fields: self.fields.clone(),
            sources: self.sources.clone(),
        })
    }

    fn assign_uid(&self, index: usize, uid: SourceUid) {
        if let Some(source) = self.sources.as_ref().and_then(|s| s.get(index)) {
            self.recorder.uids.lock().insert(uid, source.name.clone());
        }
    }

    fn init(&self, host: &HostHandle) -> bool {
        self.recorder.log.lock().push("init");
        *self.recorder.host.lock() = Some(host.clone());
        self.init_ok
    }

    fn get_data(&self, uid: SourceUid, args: Option<&str>) -> DataReply {
        if self.recorder.shut_down.load(Ordering::SeqCst) {
            self.recorder.called_after_shutdown.store(true, Ordering::SeqCst);
        }
        self.recorder.in_get_data.fetch_add(1, Ordering::SeqCst);
        let reply = self.reply_for(uid, args);
        self.recorder.in_get_data.fetch_sub(1, Ordering::SeqCst);
        reply
    }

    fn shutdown(&self, _host: &HostHandle) {
        self.recorder.shut_down.store(true, Ordering::SeqCst);
        if self.recorder.in_get_data.load(Ordering::SeqCst) > 0 {
            self.recorder.called_after_shutdown.store(true, Ordering::SeqCst);
        }
        self.recorder.log.lock().push("shutdown");
    }

    fn destroy(&self) {
        self.recorder.log.lock().push("destroy");
    }
}

impl FakeModule {
    fn reply_for(&self, uid: SourceUid, args: Option<&str>) -> DataReply {
        let Some(name) = self.recorder.uids.lock().get(&uid).cloned() else {
            return DataReply::failed().with_error("unknown uid");
        };

        *self.recorder.calls.lock().entry(name.clone()).or_default() += 1;
        *self.recorder.last_args.lock() = Some(args.map(str::to_string));

        let delay = self.recorder.delays.lock().get(&name).copied();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        self.recorder
            .replies
            .lock()
            .get(&name)
            .cloned()
            .unwrap_or_else(DataReply::no_data)
    }
}

/// Broker that records everything published to it.
#[derive(Default)]
pub struct RecordingBroker {
    published: Mutex<Vec<(String, String)>>,
}

impl RecordingBroker {
    pub fn count(&self, topic: &str) -> usize {
        self.published.lock().iter().filter(|(t, _)| t == topic).count()
    }

    pub fn payloads(&self, topic: &str) -> Vec<serde_json::Value> {
        self.published
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| serde_json::from_str(p).unwrap())
            .collect()
    }
}

impl TopicBroker for RecordingBroker {
    fn publish_data(&self, topic: &str, payload: &str) {
        self.published
            .lock()
            .push((topic.to_string(), payload.to_string()));
    }

    fn find_extension(&self, _name: &str) -> bool {
        false
    }
}

pub struct Harness {
    pub extension: Extension,
    pub recorder: Arc<Recorder>,
    pub broker: Arc<RecordingBroker>,
}

pub fn build_with(module: FakeModule, config: HostConfig) -> Result<Harness> {
    let recorder = module.recorder();
    let broker = Arc::new(RecordingBroker::default());
    let weak: Weak<dyn TopicBroker> = Arc::downgrade(&broker) as Weak<dyn TopicBroker>;
    let extension = Extension::from_module(Box::new(module), None, weak, Arc::new(config))?;
    Ok(Harness {
        extension,
        recorder,
        broker,
    })
}

/// Construct and initialize an extension around `module`.
pub fn build(module: FakeModule) -> Harness {
    let harness = build_with(module, HostConfig::default()).unwrap();
    harness.extension.initialize().unwrap();
    harness
}

/// Poll `check` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}
