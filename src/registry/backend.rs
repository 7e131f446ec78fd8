//! Registry Backend
//!
//! Implements every registry operation over an [`ObjectTransport`]. The same
//! code serves the remote store and the local cache; only the transport
//! differs.
//!
//! Writes follow a write-then-publish protocol: the payload is uploaded under
//! a freshly generated storage identifier, and only then is the metadata
//! document (which names that identifier) published. Publishing is the single
//! commit point, so readers see either the previous complete record or the
//! new one.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::slice;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use moka::sync::Cache;
use rayon::prelude::*;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::errors::{RegistryError, RegistryResult};
use super::hash::{compute_manifest, hash_files};
use super::key::{
    meta_prefix, meta_prefix_for, parse_meta_key, sort_versions, validate_name, validate_version,
    ObjectKey, REGISTRY_METADATA_KEY,
};
use super::lock::{LockGuard, LockManager, DEFAULT_LOCK_TIMEOUT};
use super::metadata::{ObjectMetadata, RegistrySettings, StorageRecord};
use super::results::{BatchResult, ItemResult};
use crate::transport::{ObjectTransport, TransportError};

/// How long registry settings are reused before being re-read
const SETTINGS_TTL: Duration = Duration::from_secs(30);

const SETTINGS_CACHE_KEY: &str = "settings";

/// What to do when pushing to a key that already has a record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Fail with a conflict error
    #[default]
    Error,
    /// Leave the existing record and mark the item skipped
    Skip,
    /// Replace the existing record; requires the advisory lock
    Overwrite,
}

impl FromStr for ConflictPolicy {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(ConflictPolicy::Error),
            "skip" => Ok(ConflictPolicy::Skip),
            "overwrite" => Ok(ConflictPolicy::Overwrite),
            other => Err(RegistryError::InvalidArgument(format!(
                "unknown conflict policy '{}' (expected error, skip or overwrite)",
                other
            ))),
        }
    }
}

/// Options for push calls
#[derive(Debug, Clone, Copy, Default)]
pub struct PushOptions {
    pub on_conflict: ConflictPolicy,
    pub acquire_lock: bool,
}

impl PushOptions {
    pub fn skip() -> Self {
        Self {
            on_conflict: ConflictPolicy::Skip,
            acquire_lock: false,
        }
    }

    pub fn overwrite() -> Self {
        Self {
            on_conflict: ConflictPolicy::Overwrite,
            acquire_lock: true,
        }
    }
}

/// Options for pull calls
#[derive(Debug, Clone, Copy, Default)]
pub struct PullOptions {
    /// Hold the advisory lock while downloading
    pub acquire_lock: bool,
    /// Recompute the content hash after download
    pub verify_hash: bool,
}

/// Options for opening a backend
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Requested mutability for a new registry
    pub mutable: bool,
    /// Requested versioning for a new registry
    pub versioned: bool,
    /// Bound on advisory lock acquisition
    pub lock_timeout: Duration,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            mutable: false,
            versioned: true,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// Result of committing one push item
enum Committed {
    Written(ObjectMetadata),
    Overwritten(ObjectMetadata),
    Skipped,
}

/// Versioned object registry over one transport
pub struct RegistryBackend {
    transport: Arc<dyn ObjectTransport>,
    locks: LockManager,
    lock_timeout: Duration,
    settings_cache: Cache<&'static str, RegistrySettings>,
    emulation_warned: AtomicBool,
}

impl RegistryBackend {
    /// Open a registry on `transport`, writing default settings if none exist.
    ///
    /// When the store already holds settings that disagree with `options`,
    /// the stored settings win.
    pub fn open(transport: Arc<dyn ObjectTransport>, options: BackendOptions) -> RegistryResult<Self> {
        let backend = Self {
            locks: LockManager::new(transport.clone()),
            transport,
            lock_timeout: options.lock_timeout,
            settings_cache: Cache::builder()
                .time_to_live(SETTINGS_TTL)
                .name("registry_settings")
                .build(),
            emulation_warned: AtomicBool::new(false),
        };

        let requested = RegistrySettings::new(options.mutable, options.versioned);
        let created = backend
            .transport
            .put_if_absent(REGISTRY_METADATA_KEY, &requested.to_json()?)?;
        if created {
            info!(store = %backend.identity(), mutable = requested.mutable, versioned = requested.versioned, "Initialized registry");
        } else {
            let stored = backend.fetch_registry_metadata()?;
            if stored.mutable != requested.mutable || stored.versioned != requested.versioned {
                warn!(
                    store = %backend.identity(),
                    stored_mutable = stored.mutable,
                    stored_versioned = stored.versioned,
                    requested_mutable = requested.mutable,
                    requested_versioned = requested.versioned,
                    "Registry already exists with different settings, using stored settings"
                );
            }
            debug!(store = %backend.identity(), "Opened existing registry");
        }

        Ok(backend)
    }

    /// Identity of the underlying store
    pub fn identity(&self) -> String {
        self.transport.identity()
    }

    pub fn transport(&self) -> &Arc<dyn ObjectTransport> {
        &self.transport
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    // ----------------------------------------------------------------------
    // Registry-wide metadata
    // ----------------------------------------------------------------------

    /// Read registry settings from the store; defaults when never saved
    pub fn fetch_registry_metadata(&self) -> RegistryResult<RegistrySettings> {
        let settings = match self.transport.get(REGISTRY_METADATA_KEY) {
            Ok(data) => RegistrySettings::from_json(&data)?,
            Err(TransportError::NotFound(_)) => RegistrySettings::default(),
            Err(e) => return Err(e.into()),
        };
        self.settings_cache.insert(SETTINGS_CACHE_KEY, settings.clone());
        Ok(settings)
    }

    /// Persist registry settings
    pub fn save_registry_metadata(&self, settings: &RegistrySettings) -> RegistryResult<()> {
        self.transport.put(REGISTRY_METADATA_KEY, &settings.to_json()?)?;
        self.settings_cache.invalidate(SETTINGS_CACHE_KEY);
        info!(store = %self.identity(), mutable = settings.mutable, versioned = settings.versioned, "Saved registry settings");
        Ok(())
    }

    /// Registry settings, reusing a recent read
    pub fn settings(&self) -> RegistryResult<RegistrySettings> {
        match self.settings_cache.get(SETTINGS_CACHE_KEY) {
            Some(settings) => Ok(settings),
            None => self.fetch_registry_metadata(),
        }
    }

    /// Associate an object class with a materializer id
    pub fn register_materializer(&self, class: &str, materializer: &str) -> RegistryResult<()> {
        self.register_materializers(&[(class.to_string(), materializer.to_string())])
    }

    /// Associate several classes with materializer ids in one settings write
    pub fn register_materializers(&self, entries: &[(String, String)]) -> RegistryResult<()> {
        if let Some((class, _)) = entries.iter().find(|(c, m)| c.is_empty() || m.is_empty()) {
            return Err(RegistryError::InvalidArgument(format!(
                "materializer registration for class '{}' is incomplete",
                class
            )));
        }

        // Serialize read-modify-write of the settings document
        let settings_key = ObjectKey::new("_registry", "settings");
        let _guard = self.locks.lock(&settings_key, self.lock_timeout)?;

        let mut settings = self.fetch_registry_metadata()?;
        for (class, materializer) in entries {
            settings
                .materializers
                .insert(class.clone(), materializer.clone());
            debug!(class = %class, materializer = %materializer, "Registered materializer");
        }
        self.save_registry_metadata(&settings)
    }

    // ----------------------------------------------------------------------
    // Discovery
    // ----------------------------------------------------------------------

    /// Distinct object names, sorted
    pub fn list_objects(&self) -> RegistryResult<Vec<String>> {
        let names: BTreeSet<String> = self
            .transport
            .list(meta_prefix())?
            .iter()
            .filter_map(|k| parse_meta_key(k))
            .map(|k| k.name)
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Every published version of `name`, oldest first
    pub fn list_versions(&self, name: &str) -> RegistryResult<Vec<String>> {
        validate_name(name)?;
        let mut versions: Vec<String> = self
            .transport
            .list(&meta_prefix_for(name))?
            .iter()
            .filter_map(|k| parse_meta_key(k))
            .filter(|k| k.name == name)
            .map(|k| k.version)
            .collect();
        sort_versions(&mut versions);
        Ok(versions)
    }

    /// Replace `latest` with the newest published version
    pub fn resolve_version(&self, key: &ObjectKey) -> RegistryResult<ObjectKey> {
        if !key.is_latest() {
            return Ok(key.clone());
        }
        self.list_versions(&key.name)?
            .pop()
            .map(|version| ObjectKey::new(key.name.clone(), version))
            .ok_or_else(|| RegistryError::not_found(&key.name, &key.version))
    }

    /// Resolve many keys, listing each distinct name at most once
    ///
    /// A failed listing is not memoized, so every affected item carries the
    /// typed transport error.
    pub fn resolve_versions(&self, keys: &[ObjectKey]) -> Vec<RegistryResult<ObjectKey>> {
        let mut latest: HashMap<&str, Option<String>> = HashMap::new();

        keys.iter()
            .map(|key| -> RegistryResult<ObjectKey> {
                if !key.is_latest() {
                    return Ok(key.clone());
                }
                let newest = match latest.get(key.name.as_str()) {
                    Some(newest) => newest.clone(),
                    None => {
                        let newest = self.list_versions(&key.name)?.pop();
                        latest.insert(&key.name, newest.clone());
                        newest
                    }
                };
                newest
                    .map(|version| ObjectKey::new(key.name.clone(), version))
                    .ok_or_else(|| RegistryError::not_found(&key.name, &key.version))
            })
            .collect()
    }

    /// Whether `key` has a published record
    pub fn has_object(&self, key: &ObjectKey) -> RegistryResult<bool> {
        Ok(self
            .has_objects(slice::from_ref(key))?
            .into_values()
            .next()
            .unwrap_or(false))
    }

    /// Existence of every requested key
    pub fn has_objects(&self, keys: &[ObjectKey]) -> RegistryResult<BTreeMap<ObjectKey, bool>> {
        validate_keys(keys, true)?;
        keys.par_iter()
            .map(|key| -> RegistryResult<(ObjectKey, bool)> {
                let exists = if key.is_latest() {
                    !self.list_versions(&key.name)?.is_empty()
                } else {
                    self.transport.exists(&key.meta_key())?
                };
                Ok((key.clone(), exists))
            })
            .collect()
    }

    // ----------------------------------------------------------------------
    // Per-object metadata
    // ----------------------------------------------------------------------

    fn read_metadata(&self, key: &ObjectKey) -> RegistryResult<Option<ObjectMetadata>> {
        match self.transport.get(&key.meta_key()) {
            Ok(data) => Ok(Some(ObjectMetadata::from_json(&data)?)),
            Err(TransportError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Metadata of one object
    pub fn fetch_metadata(&self, key: &ObjectKey) -> RegistryResult<ObjectMetadata> {
        self.fetch_metadata_batch(slice::from_ref(key))?
            .into_single()?
            .into_result()
    }

    /// Metadata of many objects; items carry the resolved key
    pub fn fetch_metadata_batch(&self, keys: &[ObjectKey]) -> RegistryResult<BatchResult<ObjectMetadata>> {
        validate_keys(keys, true)?;
        let resolved = self.resolve_versions(keys);
        Ok(keys
            .par_iter()
            .zip(resolved.into_par_iter())
            .map(|(requested, resolved)| match resolved {
                Err(e) => ItemResult::failed(requested.clone(), e),
                Ok(key) => match self.read_metadata(&key) {
                    Ok(Some(meta)) => ItemResult::ok(key, meta),
                    Ok(None) => ItemResult::not_found(key),
                    Err(e) => ItemResult::failed(key, e),
                },
            })
            .collect::<Vec<_>>()
            .into())
    }

    /// Replace the metadata document of one object
    pub fn save_metadata(&self, key: &ObjectKey, metadata: &ObjectMetadata) -> RegistryResult<()> {
        self.save_metadata_batch(slice::from_ref(key), slice::from_ref(metadata))?
            .into_single()?
            .into_result()
    }

    pub fn save_metadata_batch(
        &self,
        keys: &[ObjectKey],
        metadata: &[ObjectMetadata],
    ) -> RegistryResult<BatchResult<()>> {
        validate_keys(keys, false)?;
        check_lengths("metadata", keys.len(), metadata.len())?;
        Ok(keys
            .par_iter()
            .zip(metadata.par_iter())
            .map(|(key, meta)| {
                let result = meta
                    .to_json()
                    .map_err(RegistryError::from)
                    .and_then(|json| Ok(self.transport.put(&key.meta_key(), &json)?));
                ItemResult::from_result(key.clone(), result)
            })
            .collect::<Vec<_>>()
            .into())
    }

    /// Remove the metadata document of one object (payload untouched)
    pub fn delete_metadata(&self, key: &ObjectKey) -> RegistryResult<()> {
        self.delete_metadata_batch(slice::from_ref(key))?
            .into_single()?
            .into_result()
    }

    pub fn delete_metadata_batch(&self, keys: &[ObjectKey]) -> RegistryResult<BatchResult<()>> {
        validate_keys(keys, false)?;
        Ok(keys
            .par_iter()
            .map(|key| {
                let result = self.transport.delete(&key.meta_key()).map_err(RegistryError::from);
                ItemResult::from_result(key.clone(), result)
            })
            .collect::<Vec<_>>()
            .into())
    }

    // ----------------------------------------------------------------------
    // Push
    // ----------------------------------------------------------------------

    /// Push one directory as `key`.
    ///
    /// Any outcome other than a committed write is raised, including a skip.
    pub fn push(
        &self,
        key: &ObjectKey,
        source: &Path,
        metadata: &ObjectMetadata,
        options: &PushOptions,
    ) -> RegistryResult<ObjectMetadata> {
        self.push_batch(
            slice::from_ref(key),
            &[source.to_path_buf()],
            slice::from_ref(metadata),
            options,
        )?
        .into_single()?
        .into_result()
    }

    /// Push many directories; each item succeeds or fails on its own.
    ///
    /// Raises only for malformed input detected before any storage call.
    pub fn push_batch(
        &self,
        keys: &[ObjectKey],
        sources: &[PathBuf],
        metadata: &[ObjectMetadata],
        options: &PushOptions,
    ) -> RegistryResult<BatchResult<ObjectMetadata>> {
        check_lengths("sources", keys.len(), sources.len())?;
        check_lengths("metadata", keys.len(), metadata.len())?;
        validate_keys(keys, false)?;
        if options.on_conflict == ConflictPolicy::Overwrite && !options.acquire_lock {
            return Err(RegistryError::InvalidArgument(
                "overwrite requires acquire_lock".to_string(),
            ));
        }

        Ok(keys
            .par_iter()
            .zip(sources.par_iter())
            .zip(metadata.par_iter())
            .map(|((key, source), draft)| {
                match self.commit_one(key, source, draft, options) {
                    Ok(Committed::Written(meta)) => ItemResult::ok(key.clone(), meta),
                    Ok(Committed::Overwritten(meta)) => ItemResult::overwritten(key.clone(), meta),
                    Ok(Committed::Skipped) => ItemResult::skipped(key.clone()),
                    Err(e) => {
                        debug!(object = %key, error = %e, "Push failed");
                        ItemResult::failed(key.clone(), e)
                    }
                }
            })
            .collect::<Vec<_>>()
            .into())
    }

    fn commit_one(
        &self,
        key: &ObjectKey,
        source: &Path,
        draft: &ObjectMetadata,
        options: &PushOptions,
    ) -> RegistryResult<Committed> {
        if options.on_conflict == ConflictPolicy::Overwrite && !self.settings()?.mutable {
            return Err(RegistryError::InvalidArgument(format!(
                "cannot overwrite {}: registry is immutable",
                key
            )));
        }
        if !source.is_dir() {
            return Err(RegistryError::InvalidArgument(format!(
                "push source {} is not a directory",
                source.display()
            )));
        }

        let emulate = !options.acquire_lock && !self.transport.supports_conditional_writes();
        if emulate && !self.emulation_warned.swap(true, Ordering::Relaxed) {
            warn!(
                store = %self.identity(),
                "Store has no conditional writes; first-write-wins is enforced with advisory locks"
            );
        }
        let guard: Option<LockGuard<'_>> = if options.acquire_lock || emulate {
            Some(self.locks.lock(key, self.lock_timeout)?)
        } else {
            None
        };

        // Under the lock the existing record is authoritative; without it this
        // is only a shortcut and the conditional publish decides.
        let previous = if guard.is_some() {
            self.read_metadata(key)?
        } else if self.transport.exists(&key.meta_key())? {
            return self.on_existing(key, options.on_conflict);
        } else {
            None
        };
        if previous.is_some() && options.on_conflict != ConflictPolicy::Overwrite {
            return self.on_existing(key, options.on_conflict);
        }

        let manifest = compute_manifest(source)?;
        let uuid = Uuid::new_v4().to_string();
        if let Err(e) = self.upload_payload(key, &uuid, source, &manifest.files) {
            self.discard_storage(key, &uuid);
            return Err(e);
        }

        let mut metadata = draft.clone();
        metadata.hash = manifest.hash;
        metadata.files = manifest.files;
        metadata.storage = StorageRecord {
            uuid: uuid.clone(),
            created_at: Some(Utc::now()),
        };
        let document = metadata.to_json()?;

        // Commit point
        let published = match &previous {
            Some(_) => {
                self.transport.put(&key.meta_key(), &document)?;
                true
            }
            None if emulate => {
                self.transport.put(&key.meta_key(), &document)?;
                true
            }
            None => self.transport.put_if_absent(&key.meta_key(), &document)?,
        };
        drop(guard);

        if !published {
            debug!(object = %key, "Lost first-write race, discarding uploaded payload");
            self.discard_storage(key, &uuid);
            return self.on_existing(key, options.on_conflict);
        }

        match previous {
            Some(old) => {
                if !old.storage.uuid.is_empty() && old.storage.uuid != uuid {
                    self.discard_storage(key, &old.storage.uuid);
                }
                info!(object = %key, uuid = %uuid, files = metadata.files.len(), "Overwrote object");
                Ok(Committed::Overwritten(metadata))
            }
            None => {
                info!(object = %key, uuid = %uuid, files = metadata.files.len(), "Pushed object");
                Ok(Committed::Written(metadata))
            }
        }
    }

    fn on_existing(&self, key: &ObjectKey, policy: ConflictPolicy) -> RegistryResult<Committed> {
        match policy {
            ConflictPolicy::Skip => {
                debug!(object = %key, "Object exists, skipping");
                Ok(Committed::Skipped)
            }
            _ => Err(RegistryError::conflict(&key.name, &key.version)),
        }
    }

    fn upload_payload(&self, key: &ObjectKey, uuid: &str, source: &Path, files: &[String]) -> RegistryResult<()> {
        for relative in files {
            self.transport
                .upload_file(&key.payload_key(uuid, relative), &source.join(relative))?;
        }
        Ok(())
    }

    /// Best-effort removal of one storage record
    fn discard_storage(&self, key: &ObjectKey, uuid: &str) {
        let prefix = format!("{}{}/", key.payload_prefix(), uuid);
        let result = self.transport.list(&prefix).and_then(|objects| {
            objects
                .iter()
                .try_for_each(|object| self.transport.delete(object))
        });
        if let Err(e) = result {
            warn!(object = %key, uuid = uuid, error = %e, "Failed to remove storage record");
        }
    }

    // ----------------------------------------------------------------------
    // Pull
    // ----------------------------------------------------------------------

    /// Download one object into `destination`
    ///
    /// Passing previously fetched `metadata` skips the metadata read.
    pub fn pull(
        &self,
        key: &ObjectKey,
        destination: &Path,
        metadata: Option<&ObjectMetadata>,
        options: &PullOptions,
    ) -> RegistryResult<ObjectMetadata> {
        let metadata = metadata.map(|m| slice::from_ref(m));
        self.pull_batch(
            slice::from_ref(key),
            &[destination.to_path_buf()],
            metadata,
            options,
        )?
        .into_single()?
        .into_result()
    }

    /// Download many objects; missing keys are marked, not raised
    pub fn pull_batch(
        &self,
        keys: &[ObjectKey],
        destinations: &[PathBuf],
        metadata: Option<&[ObjectMetadata]>,
        options: &PullOptions,
    ) -> RegistryResult<BatchResult<ObjectMetadata>> {
        check_lengths("destinations", keys.len(), destinations.len())?;
        if let Some(metadata) = metadata {
            check_lengths("metadata", keys.len(), metadata.len())?;
        }
        validate_keys(keys, true)?;

        let resolved = self.resolve_versions(keys);
        Ok(keys
            .par_iter()
            .zip(resolved.into_par_iter())
            .enumerate()
            .map(|(index, (requested, resolved))| {
                let key = match resolved {
                    Ok(key) => key,
                    Err(e) => return ItemResult::failed(requested.clone(), e),
                };
                let known = metadata.map(|m| &m[index]);
                let result = self.pull_one(&key, &destinations[index], known, options);
                ItemResult::from_result(key, result)
            })
            .collect::<Vec<_>>()
            .into())
    }

    fn pull_one(
        &self,
        key: &ObjectKey,
        destination: &Path,
        known: Option<&ObjectMetadata>,
        options: &PullOptions,
    ) -> RegistryResult<ObjectMetadata> {
        let _guard = if options.acquire_lock {
            Some(self.locks.lock(key, self.lock_timeout)?)
        } else {
            None
        };

        let metadata = match known {
            Some(meta) => meta.clone(),
            None => self
                .read_metadata(key)?
                .ok_or_else(|| RegistryError::not_found(&key.name, &key.version))?,
        };
        if metadata.storage.uuid.is_empty() {
            return Err(RegistryError::InvalidArgument(format!(
                "metadata for {} has no storage record",
                key
            )));
        }

        fs::create_dir_all(destination)?;
        for relative in &metadata.files {
            check_relative(relative)?;
            self.transport.download_file(
                &key.payload_key(&metadata.storage.uuid, relative),
                &destination.join(relative),
            )?;
        }

        if options.verify_hash {
            let computed = hash_files(destination, &metadata.files)?;
            if computed != metadata.hash {
                return Err(RegistryError::Integrity {
                    key: key.to_string(),
                    expected: metadata.hash.clone(),
                    computed,
                });
            }
        }

        debug!(object = %key, files = metadata.files.len(), dest = %destination.display(), "Pulled object");
        Ok(metadata)
    }

    // ----------------------------------------------------------------------
    // Delete
    // ----------------------------------------------------------------------

    /// Delete one object; a missing key is a no-op
    pub fn delete(&self, key: &ObjectKey, acquire_lock: bool) -> RegistryResult<()> {
        self.delete_batch(slice::from_ref(key), acquire_lock)?
            .into_single()?
            .into_result()
    }

    pub fn delete_batch(&self, keys: &[ObjectKey], acquire_lock: bool) -> RegistryResult<BatchResult<()>> {
        validate_keys(keys, true)?;
        let resolved = self.resolve_versions(keys);
        Ok(keys
            .par_iter()
            .zip(resolved.into_par_iter())
            .map(|(requested, resolved)| match resolved {
                Ok(key) => {
                    let result = self.delete_one(&key, acquire_lock);
                    ItemResult::from_result(key, result)
                }
                // Nothing published under this name
                Err(RegistryError::NotFound { .. }) => ItemResult::ok(requested.clone(), ()),
                Err(e) => ItemResult::failed(requested.clone(), e),
            })
            .collect::<Vec<_>>()
            .into())
    }

    /// Delete every version of `name`
    pub fn delete_all(&self, name: &str, acquire_lock: bool) -> RegistryResult<BatchResult<()>> {
        let keys: Vec<ObjectKey> = self
            .list_versions(name)?
            .into_iter()
            .map(|version| ObjectKey::new(name, version))
            .collect();
        self.delete_batch(&keys, acquire_lock)
    }

    fn delete_one(&self, key: &ObjectKey, acquire_lock: bool) -> RegistryResult<()> {
        let _guard = if acquire_lock {
            Some(self.locks.lock(key, self.lock_timeout)?)
        } else {
            None
        };

        // Unpublish first so new readers stop finding the record
        self.transport.delete(&key.meta_key())?;
        let objects = self.transport.list(&key.payload_prefix())?;
        for object in &objects {
            self.transport.delete(object)?;
        }

        info!(object = %key, removed = objects.len(), "Deleted object");
        Ok(())
    }
}

impl std::fmt::Debug for RegistryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBackend")
            .field("store", &self.identity())
            .field("lock_timeout", &self.lock_timeout)
            .finish()
    }
}

fn check_lengths(what: &str, expected: usize, actual: usize) -> RegistryResult<()> {
    if expected != actual {
        return Err(RegistryError::InvalidArgument(format!(
            "got {} keys but {} {}",
            expected, actual, what
        )));
    }
    Ok(())
}

fn validate_keys(keys: &[ObjectKey], allow_latest: bool) -> RegistryResult<()> {
    for key in keys {
        validate_name(&key.name)?;
        validate_version(&key.version)?;
        if !allow_latest && key.is_latest() {
            return Err(RegistryError::InvalidArgument(format!(
                "'{}' is reserved and cannot be written; pass a concrete version for {}",
                key.version, key.name
            )));
        }
    }
    Ok(())
}

/// Reject manifest entries that would escape the destination
fn check_relative(relative: &str) -> RegistryResult<()> {
    let path = Path::new(relative);
    let escapes = relative.is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(RegistryError::InvalidArgument(format!(
            "manifest entry '{}' is not a plain relative path",
            relative
        )));
    }
    Ok(())
}
