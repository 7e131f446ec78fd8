//! Registry Module
//!
//! Versioned object registry over any [`ObjectTransport`](crate::transport::ObjectTransport):
//! - Keys, name validation and version ordering
//! - Metadata documents and registry settings
//! - Content hashing, advisory locks and per-item results
//! - The backend implementing push, pull, delete and discovery

pub mod backend;
pub mod errors;
pub mod hash;
pub mod key;
pub mod lock;
pub mod metadata;
pub mod results;

pub use backend::{BackendOptions, ConflictPolicy, PullOptions, PushOptions, RegistryBackend};
pub use errors::{ErrorKind, RegistryError, RegistryResult};
pub use key::{next_version, ObjectKey, LATEST};
pub use lock::{LockGuard, LockManager};
pub use metadata::{ObjectMetadata, RegistrySettings, StorageRecord};
pub use results::{BatchResult, ItemResult, Outcome};
