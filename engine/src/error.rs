//! Error types for the Tandem engine.

use crate::Version;
use thiserror::Error;

/// All possible errors from the Tandem engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Structural validation
    #[error("malformed operation: {0}")]
    MalformedOperation(String),

    // Type registry
    #[error("unknown OT type: {0}")]
    TypeNotFound(String),

    #[error("OT type already registered: {0}")]
    TypeAlreadyRegistered(String),

    #[error("invalid OT type name")]
    InvalidTypeName,

    #[error("OT type {type_name} does not support {capability}")]
    MissingCapability {
        type_name: String,
        capability: &'static str,
    },

    // Apply/transform
    #[error("document already exists")]
    DocAlreadyExists,

    #[error("document does not exist")]
    DocDoesNotExist,

    #[error("document was deleted")]
    DocWasDeleted,

    #[error("invalid delta: {0}")]
    InvalidDelta(String),

    // Protocol inconsistency
    #[error("acknowledgment version mismatch: expected {expected}, got {actual}")]
    AckVersionMismatch { expected: Version, actual: Version },

    #[error("operation stream gap: expected version {expected}, got {got}")]
    StreamGap { expected: Version, got: Version },

    // Connection state machine
    #[error("invalid connection state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: &'static str,
        to: &'static str,
    },

    // Server-side rejection relayed to a pending operation
    #[error("operation rejected: {0}")]
    Rejected(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
