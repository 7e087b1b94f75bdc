//! The contract between the host and a loaded extension module.
//!
//! The engine only talks to modules through [`ExtensionModule`]. The native
//! adapter in `loader::native` implements it on top of a shared library; tests
//! implement it directly.

use serde::Serialize;

use super::host::HostHandle;
use super::source::DeliveryClass;
use super::uid::SourceUid;
use crate::error::Result;

/// Identity fields declared by a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtensionFields {
    /// Short identifier, used as the topic prefix
    pub name: String,
    /// Display name
    pub full_name: String,
    pub author: String,
    pub description: String,
    pub version: String,
    pub url: String,
}

/// Declaration of one data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDeclaration {
    pub name: String,
    pub class: DeliveryClass,
}

impl SourceDeclaration {
    pub fn new(name: impl Into<String>, class: DeliveryClass) -> Self {
        Self {
            name: name.into(),
            class,
        }
    }
}

/// Everything a module declares when it is loaded.
///
/// `fields` and `sources` are optional here so that a module omitting them is
/// rejected by the host rather than by the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub api_version: u32,
    pub fields: Option<ExtensionFields>,
    pub sources: Option<Vec<SourceDeclaration>>,
}

/// What a `get_data` call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    /// A value, possibly an explicit JSON null
    Value(serde_json::Value),
    /// Success without a value: "not ready yet"
    NoData,
    /// Hard failure
    Failed,
}

/// Result of one `get_data` call, with diagnostics reported alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct DataReply {
    pub outcome: ReplyOutcome,
    pub errors: Vec<String>,
}

impl DataReply {
    pub fn value(value: serde_json::Value) -> Self {
        Self {
            outcome: ReplyOutcome::Value(value),
            errors: Vec::new(),
        }
    }

    pub fn no_data() -> Self {
        Self {
            outcome: ReplyOutcome::NoData,
            errors: Vec::new(),
        }
    }

    pub fn failed() -> Self {
        Self {
            outcome: ReplyOutcome::Failed,
            errors: Vec::new(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }
}

/// A loaded extension module.
///
/// Calls arrive from arbitrary threads: `get_data` from request threads and
/// push workers, `init`/`shutdown`/`destroy` from whoever owns the
/// [`Extension`](super::Extension). The host guarantees that no `get_data` call
/// is in flight or started once `shutdown` begins, and that `destroy` is the
/// last call.
pub trait ExtensionModule: Send + Sync {
    /// Declare API version, identity and data sources.
    fn descriptor(&self) -> Result<ModuleDescriptor>;

    /// Record the uid the host minted for the source at `index` in the
    /// declared source list.
    fn assign_uid(&self, index: usize, uid: SourceUid);

    /// Lifecycle init. Returning `false` makes the extension unusable.
    fn init(&self, host: &HostHandle) -> bool;

    /// Produce data for the source identified by `uid`.
    fn get_data(&self, uid: SourceUid, args: Option<&str>) -> DataReply;

    /// Lifecycle shutdown; the host handle stops working after this returns.
    fn shutdown(&self, host: &HostHandle);

    /// Release the module's descriptor and resources.
    fn destroy(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_builders() {
        let reply = DataReply::value(serde_json::json!(1)).with_error("slow sensor");
        assert_eq!(reply.outcome, ReplyOutcome::Value(serde_json::json!(1)));
        assert_eq!(reply.errors, vec!["slow sensor"]);

        assert_eq!(DataReply::no_data().outcome, ReplyOutcome::NoData);
        assert_eq!(DataReply::failed().outcome, ReplyOutcome::Failed);
    }
}
