//! Per-source push worker.
//!
//! A scheduler owns one named thread that runs a push task either every
//! fixed period or after signals. Signals raised while a run is already
//! queued collapse into that run. Cancelling a scheduler stops the
//! thread and joins it, so when [`Scheduler::cancel`] returns no invocation of
//! the task is in flight and none will start.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

/// What drives the push task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Run every `period`, first run one period after start.
    Interval(Duration),
    /// Run after [`Scheduler::notify`]; notifies that arrive before the
    /// queued run starts share it.
    Signal,
}

#[derive(Debug, Default)]
struct WorkerState {
    stopped: bool,
    signaled: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<WorkerState>,
    wake: Condvar,
}

/// Handle to a running push worker.
pub struct Scheduler {
    name: String,
    trigger: Trigger,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the worker thread.
    pub fn start<F>(name: impl Into<String>, trigger: Trigger, mut task: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let shared = Arc::new(Shared::default());

        let handle = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(format!("quasar-push-{}", name))
                .spawn(move || {
                    while wait_for_turn(&shared, trigger) {
                        task();
                    }
                })?
        };

        debug!(scheduler = %name, ?trigger, "Scheduler started");

        Ok(Self {
            name,
            trigger,
            shared,
            handle: Some(handle),
        })
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    /// Queue a run of a [`Trigger::Signal`] worker, unless one is queued.
    pub fn notify(&self) {
        {
            let mut state = self.shared.state.lock();
            state.signaled = true;
        }
        self.shared.wake.notify_one();
    }

    /// Stop the worker and wait for any in-flight run to finish.
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stopped = true;
        }
        self.shared.wake.notify_all();

        let Some(handle) = self.handle.take() else {
            return;
        };

        // A task cancelling its own scheduler cannot join itself.
        if handle.thread().id() == thread::current().id() {
            return;
        }

        if handle.join().is_err() {
            warn!(scheduler = %self.name, "Scheduler worker panicked");
        } else {
            debug!(scheduler = %self.name, "Scheduler stopped");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .finish()
    }
}

/// Block until the task should run again. Returns `false` once stopped.
fn wait_for_turn(shared: &Shared, trigger: Trigger) -> bool {
    let mut state = shared.state.lock();

    match trigger {
        Trigger::Interval(period) => {
            let deadline = Instant::now() + period;
            while !state.stopped {
                if shared.wake.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
        }
        Trigger::Signal => {
            while !state.stopped && !state.signaled {
                shared.wake.wait(&mut state);
            }
            state.signaled = false;
        }
    }

    !state.stopped
}
