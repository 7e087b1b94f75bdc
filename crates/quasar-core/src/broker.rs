//! Client identities and the topic broker seam.
//!
//! Extensions never hold clients directly. They publish envelopes to a
//! [`TopicBroker`] under `"<extension>/<source>"` and the broker fans them out.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

static LAST_CLIENT: AtomicU64 = AtomicU64::new(0);

/// Identity of a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClientId(u64);

impl ClientId {
    /// Mint a fresh, never reused id.
    pub fn next() -> Self {
        Self(LAST_CLIENT.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Publish/subscribe hub that extensions push into.
///
/// Extensions hold it weakly; a push finding the broker gone is dropped.
pub trait TopicBroker: Send + Sync {
    /// Deliver `payload` to every client subscribed to `topic`.
    fn publish_data(&self, topic: &str, payload: &str);

    /// Whether an extension named `name` is loaded.
    fn find_extension(&self, name: &str) -> bool;
}
