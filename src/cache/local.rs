//! Local Cache Backend
//!
//! A registry backend rooted in a local directory. It carries the same
//! operations as the remote one and never takes part in remote locking.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::registry::key::lock_prefix;
use crate::registry::{BackendOptions, RegistryBackend, RegistryResult};
use crate::transport::sigv4::sha256_hex;
use crate::transport::{LocalTransport, ObjectTransport};

/// Directory under the platform cache dir holding every registry cache
pub const CACHE_DIR_NAME: &str = "artifact-registry";

/// Hex characters of the identity digest used as directory name
const ROOT_DIGEST_LEN: usize = 16;

/// Cache root for a remote store.
///
/// Derived only from the remote identity, so every session against the same
/// remote reuses one directory.
pub fn default_cache_root(remote_identity: &str) -> PathBuf {
    let digest = sha256_hex(remote_identity.as_bytes());
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(CACHE_DIR_NAME)
        .join(&digest[..ROOT_DIGEST_LEN])
}

/// Open the cache backend at `root`.
///
/// The cache is always mutable: refreshing a stale entry overwrites it.
/// Lock records left by a previous process are removed.
pub fn open_cache_backend(root: &Path, lock_timeout: Duration) -> RegistryResult<RegistryBackend> {
    let transport = Arc::new(LocalTransport::open(root)?);

    let stale = transport.list(lock_prefix())?;
    for key in &stale {
        transport.delete(key)?;
    }
    if !stale.is_empty() {
        warn!(cache_dir = %root.display(), count = stale.len(), "Removed stale cache locks");
    }

    let backend = RegistryBackend::open(
        transport,
        BackendOptions {
            mutable: true,
            versioned: true,
            lock_timeout,
        },
    )?;

    let mut settings = backend.fetch_registry_metadata()?;
    if !settings.mutable {
        warn!(cache_dir = %root.display(), "Cache settings were immutable, resetting");
        settings.mutable = true;
        backend.save_registry_metadata(&settings)?;
    }

    info!(cache_dir = %root.display(), "Local cache initialized");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ObjectKey, RegistrySettings};
    use tempfile::TempDir;

    #[test]
    fn test_cache_root_is_deterministic() {
        let a = default_cache_root("s3://host/bucket");
        let b = default_cache_root("s3://host/bucket");
        let c = default_cache_root("s3://host/other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.ends_with(&sha256_hex(b"s3://host/bucket")[..16]));
        assert!(a.parent().unwrap().ends_with(CACHE_DIR_NAME));
    }

    #[test]
    fn test_cache_backend_is_mutable() {
        let dir = TempDir::new().unwrap();
        let backend = open_cache_backend(dir.path(), Duration::from_secs(1)).unwrap();
        assert!(backend.settings().unwrap().mutable);
        assert!(dir.path().join("registry_metadata.json").is_file());

        // An immutable leftover is reset on open
        backend
            .save_registry_metadata(&RegistrySettings::new(false, true))
            .unwrap();
        let reopened = open_cache_backend(dir.path(), Duration::from_secs(1)).unwrap();
        assert!(reopened.fetch_registry_metadata().unwrap().mutable);
    }

    #[test]
    fn test_stale_locks_cleared_on_open() {
        let dir = TempDir::new().unwrap();
        let key = ObjectKey::new("n:x", "1");
        {
            let backend = open_cache_backend(dir.path(), Duration::from_secs(1)).unwrap();
            // Simulate a crash while holding the lock
            std::mem::forget(backend.locks().lock(&key, Duration::from_secs(1)).unwrap());
            assert!(backend.locks().holder(&key).unwrap().is_some());
        }

        let reopened = open_cache_backend(dir.path(), Duration::from_millis(200)).unwrap();
        assert!(reopened.locks().holder(&key).unwrap().is_none());
        reopened.locks().lock(&key, Duration::from_millis(200)).unwrap();
    }
}
