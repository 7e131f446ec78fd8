//! Versioned artifact registry on S3-compatible object storage
//!
//! Objects are addressed by `(name, version)`, written copy-on-write under
//! fresh storage identifiers, and read through a local cache that is
//! checked against the remote content hash.

pub mod cache;
pub mod config;
pub mod materializer;
pub mod registry;
pub mod transport;

pub use cache::{CachedRegistry, SaveRequest};
pub use config::{ConfigError, RegistryConfig};
pub use materializer::{Artifact, Materializer, MaterializerSet};
pub use registry::{
    BatchResult, ConflictPolicy, ErrorKind, ItemResult, ObjectKey, ObjectMetadata, Outcome, PullOptions,
    PushOptions, RegistryBackend, RegistryError, RegistryResult,
};
