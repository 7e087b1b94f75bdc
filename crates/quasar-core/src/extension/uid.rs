//! Process-wide data source identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static LAST_UID: AtomicU64 = AtomicU64::new(0);

/// Identifier of a registered data source.
///
/// Minted once per registration from a process-wide sequence; values are
/// never reused and increase in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceUid(u64);

impl SourceUid {
    pub(crate) fn next() -> Self {
        Self(LAST_UID.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Rebuild a uid received back from an extension.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
