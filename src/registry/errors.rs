use serde::Serialize;

use crate::transport::TransportError;

/// Coarse classification of a registry failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Conflict,
    NotFound,
    InvalidArgument,
    Lock,
    Integrity,
    Transport,
    Io,
    Serialization,
    Materializer,
}

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The key already holds a record and the conflict policy forbids writing.
    #[error("object {name}@{version} already exists")]
    Conflict { name: String, version: String },

    /// The key (or, for "latest", the name) has no record.
    #[error("object {name}@{version} not found")]
    NotFound { name: String, version: String },

    /// Malformed input detected before any storage call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The advisory lock could not be acquired in time.
    #[error("could not acquire lock {key}: {reason}")]
    Lock { key: String, reason: String },

    /// Downloaded payload does not match the published hash.
    #[error("hash mismatch for {key}: expected {expected}, computed {computed}")]
    Integrity {
        key: String,
        expected: String,
        computed: String,
    },

    /// Failure reported by the object store.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A materializer failed or is not registered.
    #[error("materializer {id}: {source}")]
    Materializer {
        id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl RegistryError {
    pub fn conflict(name: &str, version: &str) -> Self {
        RegistryError::Conflict {
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    pub fn not_found(name: &str, version: &str) -> Self {
        RegistryError::NotFound {
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    /// Classification used in per-item results
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Conflict { .. } => ErrorKind::Conflict,
            RegistryError::NotFound { .. } => ErrorKind::NotFound,
            RegistryError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            RegistryError::Lock { .. } => ErrorKind::Lock,
            RegistryError::Integrity { .. } => ErrorKind::Integrity,
            RegistryError::Transport(_) => ErrorKind::Transport,
            RegistryError::Io(_) => ErrorKind::Io,
            RegistryError::Serialization(_) => ErrorKind::Serialization,
            RegistryError::Materializer { .. } => ErrorKind::Materializer,
        }
    }
}

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
