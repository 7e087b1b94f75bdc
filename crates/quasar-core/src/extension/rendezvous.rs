//! Handshake between an extension's producer thread and the host's push path.
//!
//! Each producer arms the rendezvous and receives a ticket, hands the push to
//! the host and waits for that ticket. The host notes the newest ticket when
//! a push starts and resolves through it once the value has been published
//! (or the publish was skipped). A late push can therefore only acknowledge
//! the producers whose values it actually carried. Every wait is bounded by a
//! timeout, and closing the rendezvous releases any waiter immediately.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::RendezvousError;

/// Handshake ticket; later arms get larger tickets.
pub type Ticket = u64;

#[derive(Debug, Default)]
struct HandshakeState {
    issued: Ticket,
    resolved: Ticket,
    closed: bool,
}

/// Producer/consumer handshake for event-signaled data sources.
#[derive(Debug, Default)]
pub struct Rendezvous {
    state: Mutex<HandshakeState>,
    processed: Condvar,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer side: announce a value that the host has not consumed yet.
    pub fn arm(&self) -> Result<Ticket, RendezvousError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RendezvousError::Closed);
        }
        state.issued += 1;
        Ok(state.issued)
    }

    /// Producer side: block until the host resolves `ticket`.
    pub fn wait(&self, ticket: Ticket, timeout: Duration) -> Result<(), RendezvousError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        while state.resolved < ticket {
            if state.closed {
                return Err(RendezvousError::Closed);
            }
            if self
                .processed
                .wait_until(&mut state, deadline)
                .timed_out()
                && state.resolved < ticket
            {
                return Err(RendezvousError::Timeout(timeout));
            }
        }

        Ok(())
    }

    /// Consumer side: newest ticket handed out so far.
    ///
    /// A push reads this before retrieving, so the value it publishes covers
    /// every ticket up to here.
    pub fn issued(&self) -> Ticket {
        self.state.lock().issued
    }

    /// Consumer side: mark every ticket up to `through` as processed.
    pub fn resolve(&self, through: Ticket) {
        {
            let mut state = self.state.lock();
            state.resolved = state.resolved.max(through);
        }
        self.processed.notify_all();
    }

    /// Resolve every outstanding ticket.
    ///
    /// Used when the push path that would have resolved them is torn down.
    /// Returns whether anything was outstanding.
    pub fn release_pending(&self) -> bool {
        let released = {
            let mut state = self.state.lock();
            let pending = state.resolved < state.issued;
            state.resolved = state.issued;
            pending
        };
        if released {
            self.processed.notify_all();
        }
        released
    }

    /// Permanently close the handshake, failing current and future waits.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
        }
        self.processed.notify_all();
    }

    /// Whether some ticket is still waiting for a push.
    pub fn is_armed(&self) -> bool {
        let state = self.state.lock();
        state.resolved < state.issued
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
