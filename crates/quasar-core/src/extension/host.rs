//! Extension host: one loaded module and its data sources.
//!
//! ```text
//!   clients ──subscribe/poll──▶ Extension ──get_data──▶ ExtensionModule
//!                                  │
//!                 push workers ────┤ (one per subscribed push source)
//!                                  ▼
//!                            TopicBroker ──▶ remote clients
//! ```
//!
//! Lifecycle: `Loaded → Initialized → (dropped)`. An init failure moves the
//! extension to `Failed`, after which it must be discarded.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::envelope::Envelope;
use super::loader::NativeModule;
use super::module::{ExtensionFields, ExtensionModule};
use super::rendezvous::{Rendezvous, Ticket};
use super::scheduler::{Scheduler, Trigger};
use super::source::{DataSource, DeliveryClass, Retrieval, SourceSummary};
use super::uid::SourceUid;
use super::QUASAR_API_VERSION;
use crate::broker::{ClientId, TopicBroker};
use crate::config::HostConfig;
use crate::error::{ExtensionError, RendezvousError, Result, SignalError};

/// Identity of a loaded extension.
#[derive(Debug, Clone, Serialize)]
pub struct ExtensionInfo {
    pub name: String,
    pub full_name: String,
    pub author: String,
    pub description: String,
    pub version: String,
    pub url: String,
    /// Library the extension was loaded from, if any
    pub path: Option<PathBuf>,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionState {
    Loaded,
    Initialized,
    Failed,
}

impl fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loaded => write!(f, "Loaded"),
            Self::Initialized => write!(f, "Initialized"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Result of one push cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Envelope handed to the broker
    Published,
    /// Nobody subscribed; retrieval skipped
    NoSubscribers,
    /// The broker has been torn down; envelope dropped
    BrokerUnavailable,
    /// The extension is unloading; the module was not called
    Closed,
}

/// Handle given to a module so its producer threads can reach the host.
///
/// Holds no strong reference: once the extension is gone every call fails
/// with [`SignalError::ExtensionGone`].
#[derive(Clone)]
pub struct HostHandle {
    inner: Weak<ExtensionInner>,
}

impl HostHandle {
    pub fn extension_name(&self) -> Option<String> {
        self.inner.upgrade().map(|inner| inner.info.name.clone())
    }

    /// Announce new data on an event-signaled source.
    ///
    /// Blocks until the host has pushed the value to the source's subscribers
    /// (or skipped the push because there are none), bounded by the configured
    /// rendezvous timeout.
    pub fn signal_data_ready(&self, uid: SourceUid) -> std::result::Result<(), SignalError> {
        let (rendezvous, ticket, timeout, name) = {
            let inner = self.inner.upgrade().ok_or(SignalError::ExtensionGone)?;
            let (rendezvous, ticket) = inner.dispatch_signal(uid)?;
            (rendezvous, ticket, inner.config.rendezvous_timeout(), inner.info.name.clone())
        };

        rendezvous.wait(ticket, timeout).map_err(|e| {
            warn!(extension = %name, uid = %uid, error = %e, "Signaled data was not consumed");
            SignalError::from(e)
        })
    }
}

impl fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostHandle")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

/// A loaded extension.
///
/// Dropping it stops every push worker, closes every rendezvous, runs the
/// module's shutdown hook and finally its destroy hook.
pub struct Extension {
    inner: Arc<ExtensionInner>,
}

struct ExtensionInner {
    info: ExtensionInfo,
    module: Box<dyn ExtensionModule>,
    sources: HashMap<String, Arc<DataSource>>,
    by_uid: HashMap<SourceUid, Arc<DataSource>>,
    broker: Weak<dyn TopicBroker>,
    config: Arc<HostConfig>,
    state: Mutex<ExtensionState>,
    torn_down: AtomicBool,
    self_ref: Weak<ExtensionInner>,
}

impl Extension {
    /// Load a native extension library.
    pub fn load(
        path: impl AsRef<Path>,
        broker: Weak<dyn TopicBroker>,
        config: Arc<HostConfig>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let module = NativeModule::load(path).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to load extension library");
            e
        })?;

        Self::from_module(Box::new(module), Some(path.to_path_buf()), broker, config)
    }

    /// Build an extension around an already loaded module.
    ///
    /// Validates the module's declaration and registers its data sources.
    /// Any failure, including a panic inside the module, yields an error and
    /// drops the module.
    pub fn from_module(
        module: Box<dyn ExtensionModule>,
        path: Option<PathBuf>,
        broker: Weak<dyn TopicBroker>,
        config: Arc<HostConfig>,
    ) -> Result<Self> {
        let label = path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<in-process>".to_string());

        let built = panic::catch_unwind(AssertUnwindSafe(move || {
            ExtensionInner::build(module, path, broker, config)
        }));

        match built {
            Ok(Ok(inner)) => Ok(Self { inner }),
            Ok(Err(e)) => {
                warn!(extension = %label, error = %e, "Extension rejected");
                Err(e)
            }
            Err(_) => {
                error!(extension = %label, "Panic while constructing extension");
                Err(ExtensionError::LoadFailed(format!(
                    "panic while constructing {}",
                    label
                )))
            }
        }
    }

    /// Run the module's init hook. Idempotent once it has succeeded.
    pub fn initialize(&self) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        match *state {
            ExtensionState::Initialized => return Ok(()),
            ExtensionState::Failed => {
                return Err(ExtensionError::InitFailed(format!(
                    "{} previously failed to initialize",
                    inner.info.name
                )))
            }
            ExtensionState::Loaded => {}
        }

        if !inner.module.init(&inner.handle()) {
            *state = ExtensionState::Failed;
            error!(extension = %inner.info.name, "Extension init() failed");
            return Err(ExtensionError::InitFailed(inner.info.name.clone()));
        }

        *state = ExtensionState::Initialized;
        info!("Extension {} initialized.", inner.info.name);
        Ok(())
    }

    pub fn info(&self) -> &ExtensionInfo {
        &self.inner.info
    }

    pub fn name(&self) -> &str {
        &self.inner.info.name
    }

    pub fn state(&self) -> ExtensionState {
        *self.inner.state.lock()
    }

    pub fn is_initialized(&self) -> bool {
        self.state() == ExtensionState::Initialized
    }

    pub fn source_exists(&self, source: &str) -> bool {
        self.inner.sources.contains_key(source)
    }

    /// Snapshot of every data source, in registration order.
    pub fn sources(&self) -> Vec<SourceSummary> {
        let mut summaries: Vec<_> = self.inner.sources.values().map(|s| s.summary()).collect();
        summaries.sort_by_key(|s| s.uid);
        summaries
    }

    pub fn source_uid(&self, source: &str) -> Option<SourceUid> {
        self.inner.sources.get(source).map(|s| s.uid())
    }

    pub fn subscribers(&self, source: &str) -> Option<Vec<ClientId>> {
        let source = self.inner.sources.get(source)?;
        let state = source.lock();
        Some(state.subscribers.iter().copied().collect())
    }

    pub fn pending_polls(&self, source: &str) -> Option<Vec<ClientId>> {
        let source = self.inner.sources.get(source)?;
        let state = source.lock();
        Some(state.pending_polls.iter().copied().collect())
    }

    /// Drain the clients waiting on a delayed poll of `source`.
    pub fn take_pending_polls(&self, source: &str) -> Vec<ClientId> {
        let Some(source) = self.inner.sources.get(source) else {
            return Vec::new();
        };
        let mut state = source.lock();
        state.pending_polls.drain().collect()
    }

    /// Number of push workers currently running.
    pub fn active_schedulers(&self) -> usize {
        self.inner
            .sources
            .values()
            .filter(|s| s.lock().scheduler.is_some())
            .count()
    }

    /// Subscribe `client` to a push source, starting its worker if needed.
    ///
    /// Returns `false` for unknown and poll-on-demand sources.
    pub fn add_subscriber(&self, client: ClientId, source: &str) -> bool {
        self.inner.add_subscriber(client, source)
    }

    /// Remove `client` from every source; sources left without subscribers
    /// have their worker stopped before this returns.
    pub fn remove_subscriber(&self, client: ClientId) {
        self.inner.remove_subscriber(client)
    }

    /// Poll several sources for one client.
    pub fn poll_data_for_sending<S: AsRef<str>>(
        &self,
        sources: &[S],
        args: Option<&str>,
        client: ClientId,
    ) -> Envelope {
        self.inner.poll_data_for_sending(sources, args, client)
    }

    /// Run one push cycle for `source`. `None` if the source is unknown.
    pub fn send_to_subscribers(&self, source: &str) -> Option<PushOutcome> {
        let source = self.inner.sources.get(source)?;
        Some(self.inner.push(source))
    }

    /// Enable or disable a source at runtime. Returns `false` if unknown.
    pub fn set_source_enabled(&self, source: &str, enabled: bool) -> bool {
        self.inner.set_source_enabled(source, enabled)
    }
}

impl Drop for Extension {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extension")
            .field("name", &self.inner.info.name)
            .field("state", &self.state())
            .field("sources", &self.inner.sources.len())
            .finish()
    }
}

impl ExtensionInner {
    fn build(
        module: Box<dyn ExtensionModule>,
        path: Option<PathBuf>,
        broker: Weak<dyn TopicBroker>,
        config: Arc<HostConfig>,
    ) -> Result<Arc<Self>> {
        let descriptor = module.descriptor()?;

        if descriptor.api_version != QUASAR_API_VERSION {
            return Err(ExtensionError::IncompatibleVersion {
                expected: QUASAR_API_VERSION,
                got: descriptor.api_version,
            });
        }

        let fields: ExtensionFields = descriptor
            .fields
            .ok_or_else(|| ExtensionError::MissingField("fields".to_string()))?;

        if fields.name.is_empty() || fields.full_name.is_empty() {
            return Err(ExtensionError::InvalidField {
                field: "name".to_string(),
                reason: "extension identifier and name must be non-empty".to_string(),
            });
        }

        let declarations = descriptor
            .sources
            .ok_or_else(|| ExtensionError::MissingField("data_sources".to_string()))?;

        let mut sources: HashMap<String, Arc<DataSource>> = HashMap::new();
        let mut by_uid = HashMap::new();

        for (index, declaration) in declarations.into_iter().enumerate() {
            if sources.contains_key(&declaration.name) {
                warn!(
                    "Extension {} tried to register more than one data source '{}'",
                    fields.name, declaration.name
                );
                continue;
            }

            info!("Extension {} registering data source '{}'", fields.name, declaration.name);

            let uid = SourceUid::next();
            module.assign_uid(index, uid);

            let enabled = !config.is_source_disabled(&fields.name, &declaration.name);
            if !enabled {
                info!(extension = %fields.name, source = %declaration.name, "Data source disabled by config");
            }

            let source = Arc::new(DataSource::new(
                declaration.name.clone(),
                uid,
                declaration.class,
                enabled,
            ));
            by_uid.insert(uid, source.clone());
            sources.insert(declaration.name, source);
        }

        let info = ExtensionInfo {
            name: fields.name,
            full_name: fields.full_name,
            author: fields.author,
            description: fields.description,
            version: fields.version,
            url: fields.url,
            path,
            loaded_at: chrono::Utc::now(),
        };

        Ok(Arc::new_cyclic(|self_ref| Self {
            info,
            module,
            sources,
            by_uid,
            broker,
            config,
            state: Mutex::new(ExtensionState::Loaded),
            torn_down: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        }))
    }

    fn handle(&self) -> HostHandle {
        HostHandle {
            inner: self.self_ref.clone(),
        }
    }

    fn trigger_for(&self, class: DeliveryClass) -> Option<Trigger> {
        match class {
            DeliveryClass::PollOnDemand { .. } => None,
            DeliveryClass::EventSignaled => Some(Trigger::Signal),
            DeliveryClass::FixedInterval { period } => Some(Trigger::Interval(
                period.max(self.config.scheduler_min_interval()),
            )),
        }
    }

    fn start_scheduler(&self, source: &Arc<DataSource>, trigger: Trigger) -> std::io::Result<Scheduler> {
        let extension = self.self_ref.clone();
        let target = Arc::downgrade(source);

        Scheduler::start(
            format!("{}/{}", self.info.name, source.name()),
            trigger,
            move || {
                if let (Some(extension), Some(source)) = (extension.upgrade(), target.upgrade()) {
                    extension.push(&source);
                }
            },
        )
    }

    fn add_subscriber(&self, client: ClientId, source_name: &str) -> bool {
        let Some(source) = self.sources.get(source_name) else {
            warn!(
                "Unknown data source {} requested in extension {}",
                source_name, self.info.name
            );
            return false;
        };

        let Some(trigger) = self.trigger_for(source.class()) else {
            warn!(
                "Data source '{}' in extension {} does not accept subscribers",
                source_name, self.info.name
            );
            return false;
        };

        let mut state = source.lock();
        state.subscribers.insert(client);

        if state.enabled && state.scheduler.is_none() {
            match self.start_scheduler(source, trigger) {
                Ok(scheduler) => state.scheduler = Some(scheduler),
                Err(e) => {
                    error!(extension = %self.info.name, source = %source_name, error = %e, "Failed to start push worker");
                    state.subscribers.remove(&client);
                    return false;
                }
            }
        }

        info!(client = %client, "Client subscribed to topic {}/{}", self.info.name, source_name);
        true
    }

    fn remove_subscriber(&self, client: ClientId) {
        for (name, source) in &self.sources {
            let retired = {
                let mut state = source.lock();
                if state.subscribers.remove(&client) {
                    info!(client = %client, "Client unsubscribed from topic {}/{}", self.info.name, name);
                }
                state.pending_polls.remove(&client);

                if state.subscribers.is_empty() {
                    state.scheduler.take()
                } else {
                    None
                }
            };

            // Joined outside the lock: the worker takes the same lock.
            if let Some(scheduler) = retired {
                scheduler.cancel();
                if let Some(rendezvous) = source.rendezvous() {
                    rendezvous.release_pending();
                }
                debug!(extension = %self.info.name, source = %name, "Push worker stopped");
            }
        }
    }

    fn poll_data_for_sending<S: AsRef<str>>(
        &self,
        sources: &[S],
        args: Option<&str>,
        client: ClientId,
    ) -> Envelope {
        let extension = &self.info.name;
        let args = args.filter(|a| !a.is_empty());
        let mut envelope = Envelope::new(extension);

        for source_name in sources {
            let source_name = source_name.as_ref();

            let Some(source) = self.sources.get(source_name) else {
                let message = format!(
                    "Unknown data source {} requested in extension {}",
                    source_name, extension
                );
                warn!("{}", message);
                envelope.push_error(message);
                continue;
            };

            let mut state = source.lock();
            match source.retrieve(&mut state, self.module.as_ref(), args, envelope.errors_mut()) {
                Retrieval::Success(value) => envelope.insert(extension, source_name, value),
                Retrieval::Delayed => {
                    state.pending_polls.insert(client);
                }
                Retrieval::Failed => {
                    let message = format!(
                        "Failed to retrieve data source {} in extension {}",
                        source_name, extension
                    );
                    warn!("{}", message);
                    envelope.push_error(message);
                }
            }
        }

        envelope
    }

    fn push(&self, source: &DataSource) -> PushOutcome {
        let extension = &self.info.name;
        let mut state = source.lock();
        let served = source.rendezvous().map(|r| (r, r.issued()));

        let outcome = if state.closed {
            PushOutcome::Closed
        } else if state.subscribers.is_empty() {
            PushOutcome::NoSubscribers
        } else {
            let mut envelope = Envelope::new(extension);
            match source.retrieve(&mut state, self.module.as_ref(), None, envelope.errors_mut()) {
                Retrieval::Success(value) => envelope.insert(extension, source.name(), value),
                Retrieval::Delayed | Retrieval::Failed => envelope.push_error(format!(
                    "Failed to retrieve data source {} in extension {}",
                    source.name(),
                    extension
                )),
            }

            let topic = format!("{}/{}", extension, source.name());
            match self.broker.upgrade() {
                Some(broker) => {
                    broker.publish_data(&topic, &envelope.to_json());
                    PushOutcome::Published
                }
                None => {
                    warn!(topic = %topic, "Topic broker is gone, dropping push");
                    PushOutcome::BrokerUnavailable
                }
            }
        };

        if let Some((rendezvous, ticket)) = served {
            rendezvous.resolve(ticket);
        }

        outcome
    }

    fn dispatch_signal(
        &self,
        uid: SourceUid,
    ) -> std::result::Result<(Arc<Rendezvous>, Ticket), SignalError> {
        let source = self
            .by_uid
            .get(&uid)
            .ok_or(SignalError::UnknownSource(uid.get()))?;
        let rendezvous = source
            .rendezvous()
            .ok_or_else(|| SignalError::NotSignaled(source.name().to_string()))?
            .clone();

        let ticket = rendezvous.arm()?;

        let queued = {
            let state = source.lock();
            if state.closed {
                return Err(RendezvousError::Closed.into());
            }
            match &state.scheduler {
                Some(scheduler) => {
                    scheduler.notify();
                    true
                }
                None => false,
            }
        };

        // Without a worker there is nobody to publish to; run the (skipped)
        // push here so the rendezvous still resolves.
        if !queued {
            self.push(source);
        }

        Ok((rendezvous, ticket))
    }

    fn set_source_enabled(&self, source_name: &str, enabled: bool) -> bool {
        let Some(source) = self.sources.get(source_name) else {
            return false;
        };

        let retired = {
            let mut state = source.lock();
            state.enabled = enabled;

            if !enabled {
                state.scheduler.take()
            } else {
                if state.scheduler.is_none() && !state.subscribers.is_empty() {
                    if let Some(trigger) = self.trigger_for(source.class()) {
                        match self.start_scheduler(source, trigger) {
                            Ok(scheduler) => state.scheduler = Some(scheduler),
                            Err(e) => {
                                error!(extension = %self.info.name, source = %source_name, error = %e, "Failed to start push worker")
                            }
                        }
                    }
                }
                None
            }
        };

        if let Some(scheduler) = retired {
            scheduler.cancel();
            if let Some(rendezvous) = source.rendezvous() {
                rendezvous.release_pending();
            }
        }

        info!(extension = %self.info.name, source = %source_name, enabled, "Data source toggled");
        true
    }

    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        // No push may reach the module once shutdown begins. Taking the lock
        // also waits out a push already inside get_data.
        for source in self.sources.values() {
            let retired = {
                let mut state = source.lock();
                state.closed = true;
                state.scheduler.take()
            };
            if let Some(scheduler) = retired {
                scheduler.cancel();
            }
            if let Some(rendezvous) = source.rendezvous() {
                rendezvous.close();
            }
        }

        self.module.shutdown(&self.handle());

        for source in self.sources.values() {
            let mut state = source.lock();
            state.subscribers.clear();
            state.pending_polls.clear();
        }

        self.module.destroy();
        info!("Extension {} unloaded.", self.info.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_state_display() {
        assert_eq!(ExtensionState::Loaded.to_string(), "Loaded");
        assert_eq!(ExtensionState::Initialized.to_string(), "Initialized");
        assert_eq!(ExtensionState::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_dead_handle_reports_gone() {
        let handle = HostHandle { inner: Weak::new() };
        assert!(handle.extension_name().is_none());
        assert!(matches!(
            handle.signal_data_ready(SourceUid::from_raw(1)),
            Err(SignalError::ExtensionGone)
        ));
    }
}
