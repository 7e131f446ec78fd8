//! Local Filesystem Transport
//!
//! Stores objects as plain files below a root directory. Used as the storage
//! behind the local cache backend.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use super::errors::{TransportError, TransportResult};
use super::ObjectTransport;

/// Prefix tempfile uses for in-flight writes
const TEMP_PREFIX: &str = ".tmp";

/// Filesystem-backed object transport
pub struct LocalTransport {
    /// Root directory for stored objects
    root: PathBuf,
}

impl LocalTransport {
    /// Open (and create if needed) a transport rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> TransportResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let transport = Self { root };

        // Clean up any stale temp files from previous runs
        transport.cleanup();

        info!(root = %transport.root.display(), "Local transport initialized");
        Ok(transport)
    }

    /// Get the root directory path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove temp files left behind by interrupted writes
    pub fn cleanup(&self) {
        for entry in WalkDir::new(&self.root).into_iter().flatten() {
            if entry.file_type().is_file() && is_temp_file(entry.path()) {
                debug!(path = %entry.path().display(), "Removing stale temp file");
                let _ = fs::remove_file(entry.path());
            }
        }
    }

    /// Convert an object key to a local path below the root
    fn path_to_local(&self, key: &str) -> TransportResult<PathBuf> {
        // Replace any problematic characters for the filesystem
        let safe_key = key.replace(':', "_");
        let relative = Path::new(&safe_key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(TransportError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Write `data` to a temp file next to `path`, ready to persist
    fn stage(&self, path: &Path, data: &[u8]) -> TransportResult<tempfile::NamedTempFile> {
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_data()?;
        Ok(tmp)
    }

    /// Remove empty directories between `path` and the root
    fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            // Fails (and stops) on the first non-empty directory
            if fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(TEMP_PREFIX))
        .unwrap_or(false)
}

fn not_found(key: &str, err: std::io::Error) -> TransportError {
    if err.kind() == ErrorKind::NotFound {
        TransportError::NotFound(key.to_string())
    } else {
        TransportError::Io(err)
    }
}

impl ObjectTransport for LocalTransport {
    fn put(&self, key: &str, data: &[u8]) -> TransportResult<()> {
        let path = self.path_to_local(key)?;
        let tmp = self.stage(&path, data)?;
        tmp.persist(&path).map_err(|e| TransportError::Io(e.error))?;
        debug!(key = key, size = data.len(), "Stored object locally");
        Ok(())
    }

    fn put_if_absent(&self, key: &str, data: &[u8]) -> TransportResult<bool> {
        let path = self.path_to_local(key)?;
        let tmp = self.stage(&path, data)?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(TransportError::Io(e.error)),
        }
    }

    fn get(&self, key: &str) -> TransportResult<Vec<u8>> {
        fs::read(self.path_to_local(key)?).map_err(|e| not_found(key, e))
    }

    fn exists(&self, key: &str) -> TransportResult<bool> {
        Ok(self.path_to_local(key)?.is_file())
    }

    fn delete(&self, key: &str) -> TransportResult<()> {
        let path = self.path_to_local(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                self.prune_empty_parents(&path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn list(&self, prefix: &str) -> TransportResult<Vec<String>> {
        let local_prefix = prefix.replace(':', "_");
        let walk_root = match local_prefix.rfind('/') {
            Some(idx) => self.path_to_local(&prefix[..idx])?,
            None => self.root.clone(),
        };
        if !walk_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&walk_root).sort_by_file_name() {
            let entry = entry.map_err(|e| match e.into_io_error() {
                Some(io) => TransportError::Io(io),
                None => TransportError::Request("filesystem loop while listing".to_string()),
            })?;
            if !entry.file_type().is_file() || is_temp_file(entry.path()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(&local_prefix) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn identity(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn upload_file(&self, key: &str, path: &Path) -> TransportResult<()> {
        let target = self.path_to_local(key)?;
        let parent = target.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;

        let tmp = tempfile::NamedTempFile::new_in(parent)?;
        fs::copy(path, tmp.path())?;
        tmp.persist(&target).map_err(|e| TransportError::Io(e.error))?;
        Ok(())
    }

    fn download_file(&self, key: &str, path: &Path) -> TransportResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(self.path_to_local(key)?, path).map_err(|e| not_found(key, e))?;
        Ok(())
    }
}
