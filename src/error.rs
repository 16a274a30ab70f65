//! Error types for session operations.

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Session-specific errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No driver registered under the requested name
    #[error("session driver [{0}] is not registered")]
    DriverNotFound(String),

    /// No driver name given and no "default" driver registered
    #[error("no session driver specified and no default driver is registered")]
    DriverNotSpecified,

    /// A driver is already registered under this name
    #[error("session driver [{0}] is already registered")]
    DriverAlreadyRegistered(String),

    /// Payload could not be encoded, or failed authentication on decode
    #[error("codec error: {0}")]
    Codec(String),

    /// Storage backend read failure
    #[error("backend read error: {0}")]
    BackendRead(String),

    /// Storage backend write failure
    #[error("backend write error: {0}")]
    BackendWrite(String),

    /// Best-effort sweep failure; logged by the manager, never propagated
    #[error("sweep error: {0}")]
    Sweep(String),

    /// Attribute value could not be serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
