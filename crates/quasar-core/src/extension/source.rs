//! Data source state and the retrieval algorithm.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use super::module::{ExtensionModule, ReplyOutcome};
use super::rendezvous::Rendezvous;
use super::scheduler::Scheduler;
use super::uid::SourceUid;
use crate::broker::ClientId;

/// How a data source delivers its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryClass {
    /// Retrieved when a client asks, optionally cached for `ttl`.
    PollOnDemand { ttl: Option<Duration> },
    /// Pushed whenever the extension signals new data.
    EventSignaled,
    /// Pushed by the host every `period`.
    FixedInterval { period: Duration },
}

impl DeliveryClass {
    pub fn poll_on_demand() -> Self {
        Self::PollOnDemand { ttl: None }
    }

    pub fn cached(ttl: Duration) -> Self {
        Self::PollOnDemand { ttl: Some(ttl) }
    }

    pub fn interval(period: Duration) -> Self {
        Self::FixedInterval { period }
    }

    /// Push classes accept subscribers; poll classes accept cache entries.
    pub fn is_push(&self) -> bool {
        !matches!(self, Self::PollOnDemand { .. })
    }

    /// Cache validity, only for poll sources with a non-zero TTL.
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            Self::PollOnDemand { ttl: Some(ttl) } if !ttl.is_zero() => Some(*ttl),
            _ => None,
        }
    }
}

impl fmt::Display for DeliveryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PollOnDemand { ttl: None } => write!(f, "poll"),
            Self::PollOnDemand { ttl: Some(ttl) } => write!(f, "poll (ttl {}ms)", ttl.as_millis()),
            Self::EventSignaled => write!(f, "signaled"),
            Self::FixedInterval { period } => write!(f, "interval {}ms", period.as_millis()),
        }
    }
}

/// Outcome of retrieving a source once.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    Success(Value),
    /// Poll source with no value yet; the caller is answered later.
    Delayed,
    Failed,
}

#[derive(Debug)]
struct CachedValue {
    value: Value,
    expires_at: Instant,
}

/// Mutable part of a data source, only reachable through its lock.
#[derive(Debug)]
pub(crate) struct SourceState {
    pub(crate) enabled: bool,
    cache: Option<CachedValue>,
    pub(crate) subscribers: HashSet<ClientId>,
    pub(crate) pending_polls: HashSet<ClientId>,
    pub(crate) scheduler: Option<Scheduler>,
    /// Set once teardown has started; the module must not be called again.
    pub(crate) closed: bool,
}

/// Introspection snapshot of a data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub name: String,
    pub uid: SourceUid,
    pub class: String,
    pub enabled: bool,
    pub subscribers: usize,
    pub pending_polls: usize,
    pub scheduled: bool,
}

/// One named feed of an extension.
#[derive(Debug)]
pub struct DataSource {
    name: String,
    uid: SourceUid,
    class: DeliveryClass,
    rendezvous: Option<Arc<Rendezvous>>,
    state: Mutex<SourceState>,
}

impl DataSource {
    pub(crate) fn new(name: String, uid: SourceUid, class: DeliveryClass, enabled: bool) -> Self {
        let rendezvous = matches!(class, DeliveryClass::EventSignaled).then(|| Arc::new(Rendezvous::new()));

        Self {
            name,
            uid,
            class,
            rendezvous,
            state: Mutex::new(SourceState {
                enabled,
                cache: None,
                subscribers: HashSet::new(),
                pending_polls: HashSet::new(),
                scheduler: None,
                closed: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> SourceUid {
        self.uid
    }

    pub fn class(&self) -> DeliveryClass {
        self.class
    }

    pub(crate) fn rendezvous(&self) -> Option<&Arc<Rendezvous>> {
        self.rendezvous.as_ref()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock()
    }

    pub fn summary(&self) -> SourceSummary {
        let state = self.lock();
        SourceSummary {
            name: self.name.clone(),
            uid: self.uid,
            class: self.class.to_string(),
            enabled: state.enabled,
            subscribers: state.subscribers.len(),
            pending_polls: state.pending_polls.len(),
            scheduled: state.scheduler.is_some(),
        }
    }

    /// Retrieve the current value. The caller must hold this source's lock
    /// and pass the guarded state in.
    ///
    /// Diagnostics reported by the module are appended to `errors` whatever
    /// the outcome.
    pub(crate) fn retrieve(
        &self,
        state: &mut SourceState,
        module: &dyn ExtensionModule,
        args: Option<&str>,
        errors: &mut Vec<String>,
    ) -> Retrieval {
        if !state.enabled {
            warn!(source = %self.name, "Data source is disabled");
            return Retrieval::Failed;
        }

        let ttl = self.class.ttl();

        if ttl.is_some() {
            if let Some(cached) = &state.cache {
                if cached.expires_at >= Instant::now() {
                    return Retrieval::Success(cached.value.clone());
                }
            }
        }

        let reply = module.get_data(self.uid, args);
        errors.extend(reply.errors);

        let value = match reply.outcome {
            ReplyOutcome::Failed => {
                warn!(source = %self.name, uid = %self.uid, "get_data failed");
                return Retrieval::Failed;
            }
            ReplyOutcome::NoData if self.class.is_push() => {
                warn!(source = %self.name, "Push source returned no data");
                return Retrieval::Failed;
            }
            ReplyOutcome::NoData => return Retrieval::Delayed,
            ReplyOutcome::Value(Value::Null) => return Retrieval::Success(Value::Null),
            ReplyOutcome::Value(value) => value,
        };

        if let Some(ttl) = ttl {
            state.cache = Some(CachedValue {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
            });
        }

        Retrieval::Success(value)
    }
}
