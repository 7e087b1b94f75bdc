//! Error types for the extension engine.

use std::time::Duration;

/// Errors raised while loading, validating or initializing an extension.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Load failed: {0}")]
    LoadFailed(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Incompatible API version: expected {expected}, got {got}")]
    IncompatibleVersion { expected: u32, got: u32 },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Null pointer")]
    NullPointer,

    #[error("Extension init failed: {0}")]
    InitFailed(String),

    #[error("Already registered: {0}")]
    AlreadyRegistered(String),
}

/// Result type for extension operations
pub type Result<T> = std::result::Result<T, ExtensionError>;

/// Failure of a producer/consumer handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RendezvousError {
    #[error("Timed out after {0:?} waiting for the host to publish")]
    Timeout(Duration),

    #[error("Rendezvous closed")]
    Closed,
}

/// Errors returned to an extension signalling new data.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("Unknown data source uid {0}")]
    UnknownSource(u64),

    #[error("Data source '{0}' is not event-signaled")]
    NotSignaled(String),

    #[error("Extension has been unloaded")]
    ExtensionGone,

    #[error(transparent)]
    Rendezvous(#[from] RendezvousError),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
