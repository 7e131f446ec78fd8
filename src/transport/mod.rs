//! Object storage transports
//!
//! The registry only talks to storage through [`ObjectTransport`]. Three
//! implementations ship with the crate: an S3-compatible HTTP client, a
//! local filesystem root (used by the cache), and an in-memory map.

pub mod errors;
pub mod local;
pub mod memory;
pub mod s3;
pub mod sigv4;
pub mod types;

use std::fs;
use std::path::Path;

pub use errors::{TransportError, TransportResult};
pub use local::LocalTransport;
pub use memory::InMemoryTransport;
pub use s3::{S3Client, S3Transport};

/// Blocking key/value access to an object store.
///
/// Keys are `/`-separated strings relative to the store root. Every call
/// blocks the calling thread until the store answers.
pub trait ObjectTransport: Send + Sync {
    /// Write `data` under `key`, replacing any existing object.
    fn put(&self, key: &str, data: &[u8]) -> TransportResult<()>;

    /// Write `data` under `key` only if nothing is stored there yet.
    ///
    /// Returns `Ok(false)` when the key already existed. Concurrent callers
    /// racing on the same absent key see exactly one `Ok(true)`.
    fn put_if_absent(&self, key: &str, data: &[u8]) -> TransportResult<bool>;

    /// Read the object stored under `key`.
    ///
    /// A missing key is reported as [`TransportError::NotFound`].
    fn get(&self, key: &str) -> TransportResult<Vec<u8>>;

    /// Check whether `key` exists.
    fn exists(&self, key: &str) -> TransportResult<bool>;

    /// Delete `key`. Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> TransportResult<()>;

    /// List every key starting with `prefix`.
    fn list(&self, prefix: &str) -> TransportResult<Vec<String>>;

    /// Stable identifier of the underlying store (endpoint, bucket, root).
    fn identity(&self) -> String;

    /// Whether `put_if_absent` is atomic on this store.
    fn supports_conditional_writes(&self) -> bool {
        true
    }

    /// Upload a local file to `key`.
    fn upload_file(&self, key: &str, path: &Path) -> TransportResult<()> {
        let data = fs::read(path)?;
        self.put(key, &data)
    }

    /// Download `key` into a local file, creating parent directories.
    fn download_file(&self, key: &str, path: &Path) -> TransportResult<()> {
        let data = self.get(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }
}
