//! Quasar extension data-source engine.
//!
//! Loads extension modules, registers their data sources, answers client
//! polls and pushes subscribed data through a topic broker.
//!
//! ## Modules
//!
//! - `extension`: extension host, data sources, push scheduling, native loader
//! - `hub`: the extension/client registry acting as topic broker
//! - `broker`: client ids and the broker trait extensions publish into
//! - `config`: host configuration
//! - `error`: error types

pub mod broker;
pub mod config;
pub mod error;
pub mod extension;
pub mod hub;

pub use broker::{ClientId, TopicBroker};
pub use config::HostConfig;
pub use error::{ConfigError, ExtensionError, RendezvousError, Result, SignalError};
pub use extension::{
    DataReply, DataSource, DeliveryClass, Envelope, Extension, ExtensionFields, ExtensionInfo,
    ExtensionModule, ExtensionState, HostHandle, ModuleDescriptor, PushOutcome, ReplyOutcome,
    SourceDeclaration, SourceSummary, SourceUid,
};
pub use hub::ExtensionHub;

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod prelude {
    pub use crate::broker::{ClientId, TopicBroker};
    pub use crate::config::HostConfig;
    pub use crate::error::{ExtensionError, Result};
    pub use crate::extension::{
        DataReply, DeliveryClass, Envelope, Extension, ExtensionFields, ExtensionModule,
        HostHandle, ModuleDescriptor, SourceDeclaration, SourceUid,
    };
    pub use crate::hub::ExtensionHub;
}
