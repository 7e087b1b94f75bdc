//! Extension hosting.
//!
//! - [`Extension`]: one loaded module with its data sources
//! - [`DataSource`] / [`DeliveryClass`]: per-source state and delivery mode
//! - [`ExtensionModule`]: the boundary to module code (native or in-process)
//! - [`Envelope`]: the JSON document clients receive

pub mod envelope;
pub mod host;
pub mod loader;
pub mod module;
pub mod rendezvous;
pub mod scheduler;
pub mod source;
pub mod uid;

pub use envelope::Envelope;
pub use host::{Extension, ExtensionInfo, ExtensionState, HostHandle, PushOutcome};
pub use module::{
    DataReply, ExtensionFields, ExtensionModule, ModuleDescriptor, ReplyOutcome,
    SourceDeclaration,
};
pub use quasar_extension_sdk::QUASAR_API_VERSION;
pub use rendezvous::{Rendezvous, Ticket};
pub use scheduler::{Scheduler, Trigger};
pub use source::{DataSource, DeliveryClass, Retrieval, SourceSummary};
pub use uid::SourceUid;
