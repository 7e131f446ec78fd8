//! Cached Registry
//!
//! Pairs the authoritative remote backend with a local cache backend.
//! Loads consult the cache first and check its content hash against the
//! remote; saves and deletes go to the remote first and are mirrored into
//! the cache on a best-effort basis. Cache failures are logged and never
//! fail an operation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::local::{default_cache_root, open_cache_backend};
use crate::materializer::{Artifact, Materializer, MaterializerSet};
use crate::registry::key::{validate_name, validate_version};
use crate::registry::{
    next_version, BackendOptions, BatchResult, ConflictPolicy, ItemResult, ObjectKey, ObjectMetadata,
    Outcome, PullOptions, PushOptions, RegistryBackend, RegistryError, RegistryResult, LATEST,
};
use crate::transport::ObjectTransport;

/// One object to save
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub name: String,
    pub artifact: Artifact,
    /// Explicit version; the next version is assigned when unset
    pub version: Option<String>,
    /// Caller-defined metadata fields
    pub fields: Map<String, Value>,
}

impl SaveRequest {
    pub fn new(name: impl Into<String>, artifact: impl Into<Artifact>) -> Self {
        Self {
            name: name.into(),
            artifact: artifact.into(),
            version: None,
            fields: Map::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Cache effectiveness counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Loads served from the cache
    pub hits: u64,
    /// Loads read from the remote
    pub misses: u64,
    /// Cache entries found outdated by the hash check
    pub stale: u64,
}

impl CacheStats {
    /// Percentage of loads served from the cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            (self.hits as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Remote registry with a read-through local cache
pub struct CachedRegistry {
    remote: RegistryBackend,
    cache: RegistryBackend,
    materializers: MaterializerSet,
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
}

impl CachedRegistry {
    pub fn new(remote: RegistryBackend, cache: RegistryBackend, materializers: MaterializerSet) -> Self {
        Self {
            remote,
            cache,
            materializers,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale: AtomicU64::new(0),
        }
    }

    /// Open the remote registry on `transport` and its cache.
    ///
    /// Without an explicit `cache_root` the cache lives in a directory
    /// derived from the remote identity.
    pub fn open(
        transport: Arc<dyn ObjectTransport>,
        options: BackendOptions,
        cache_root: Option<PathBuf>,
        materializers: MaterializerSet,
    ) -> RegistryResult<Self> {
        let lock_timeout = options.lock_timeout;
        let remote = RegistryBackend::open(transport, options)?;
        let root = cache_root.unwrap_or_else(|| default_cache_root(&remote.identity()));
        let cache = open_cache_backend(&root, lock_timeout)?;

        info!(remote = %remote.identity(), cache = %cache.identity(), "Cached registry ready");
        Ok(Self::new(remote, cache, materializers))
    }

    pub fn remote(&self) -> &RegistryBackend {
        &self.remote
    }

    pub fn cache(&self) -> &RegistryBackend {
        &self.cache
    }

    pub fn materializers(&self) -> &MaterializerSet {
        &self.materializers
    }

    /// Make `materializer` available and use it for objects of `class`
    pub fn register_materializer(
        &mut self,
        class: &str,
        materializer: Arc<dyn Materializer>,
    ) -> RegistryResult<()> {
        self.remote.register_materializer(class, materializer.id())?;
        self.materializers.register(materializer);
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Load
    // ----------------------------------------------------------------------

    /// Load one object, preferring a verified cached copy
    pub fn load(&self, key: &ObjectKey, verify_hash: bool) -> RegistryResult<Artifact> {
        self.load_batch(std::slice::from_ref(key), verify_hash)?
            .into_single()?
            .into_result()
    }

    /// Load many objects; results follow the order of `keys`.
    ///
    /// With `verify_hash`, "latest" is resolved on the remote and every
    /// cache hit is checked against the remote content hash. Without it the
    /// remote is only contacted for objects the cache does not hold.
    pub fn load_batch(&self, keys: &[ObjectKey], verify_hash: bool) -> RegistryResult<BatchResult<Artifact>> {
        for key in keys {
            validate_name(&key.name)?;
            validate_version(&key.version)?;
        }

        let mut outcomes: Vec<Option<ItemResult<Artifact>>> = keys.iter().map(|_| None).collect();
        let mut concrete: Vec<(usize, ObjectKey)> = Vec::new();
        for (index, resolved) in self.resolve_for_load(keys, verify_hash).into_iter().enumerate() {
            match resolved {
                Ok(key) => concrete.push((index, key)),
                Err(e) => outcomes[index] = Some(ItemResult::failed(keys[index].clone(), e)),
            }
        }
        let concrete_keys: Vec<ObjectKey> = concrete.iter().map(|(_, k)| k.clone()).collect();

        let cached_meta = self.cached_metadata(&concrete_keys);
        let (serve, remote_meta) = if verify_hash {
            self.check_staleness(&concrete_keys, &cached_meta)
        } else {
            (
                cached_meta.iter().map(Option::is_some).collect(),
                vec![None; concrete_keys.len()],
            )
        };

        // Cache reads
        let served: Vec<usize> = (0..concrete_keys.len()).filter(|&j| serve[j]).collect();
        for (j, artifact) in self.read_cached(&served, &concrete_keys, &cached_meta) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            outcomes[concrete[j].0] = Some(ItemResult::ok(concrete_keys[j].clone(), artifact));
        }

        // Remote reads for everything else
        let missed: Vec<usize> = (0..concrete_keys.len())
            .filter(|&j| outcomes[concrete[j].0].is_none())
            .collect();
        for (j, item) in self.read_remote(&missed, &concrete_keys, &remote_meta)? {
            outcomes[concrete[j].0] = Some(item);
        }

        Ok(outcomes
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| outcome.unwrap_or_else(|| ItemResult::not_found(keys[index].clone())))
            .collect())
    }

    fn resolve_for_load(&self, keys: &[ObjectKey], verify_hash: bool) -> Vec<RegistryResult<ObjectKey>> {
        if verify_hash {
            return self.remote.resolve_versions(keys);
        }

        let mut resolved = self.cache.resolve_versions(keys);
        let unresolved: Vec<usize> = (0..keys.len()).filter(|&i| resolved[i].is_err()).collect();
        if !unresolved.is_empty() {
            let remote_keys: Vec<ObjectKey> = unresolved.iter().map(|&i| keys[i].clone()).collect();
            for (i, result) in unresolved.into_iter().zip(self.remote.resolve_versions(&remote_keys)) {
                resolved[i] = result;
            }
        }
        resolved
    }

    /// Cache metadata per key; `None` for misses and unreadable entries
    fn cached_metadata(&self, keys: &[ObjectKey]) -> Vec<Option<ObjectMetadata>> {
        if keys.is_empty() {
            return Vec::new();
        }
        match self.cache.fetch_metadata_batch(keys) {
            Ok(batch) => batch
                .into_iter()
                .map(|item| match item.outcome {
                    Outcome::Ok(meta) | Outcome::Overwritten(meta) => Some(meta),
                    Outcome::Error(e) => {
                        warn!(object = %item.key, error = %e, "Failed to read cache metadata");
                        None
                    }
                    Outcome::NotFound | Outcome::Skipped => None,
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "Failed to read cache metadata");
                vec![None; keys.len()]
            }
        }
    }

    /// Compare cached hashes with the remote.
    ///
    /// Returns which entries may be served from the cache, plus the remote
    /// metadata fetched along the way.
    fn check_staleness(
        &self,
        keys: &[ObjectKey],
        cached_meta: &[Option<ObjectMetadata>],
    ) -> (Vec<bool>, Vec<Option<ObjectMetadata>>) {
        let mut serve = vec![false; keys.len()];
        let mut remote_meta: Vec<Option<ObjectMetadata>> = vec![None; keys.len()];

        let hits: Vec<usize> = (0..keys.len()).filter(|&j| cached_meta[j].is_some()).collect();
        if hits.is_empty() {
            return (serve, remote_meta);
        }
        let hit_keys: Vec<ObjectKey> = hits.iter().map(|&j| keys[j].clone()).collect();

        let batch = match self.remote.fetch_metadata_batch(&hit_keys) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "Staleness check failed, serving cached copies");
                for j in hits {
                    serve[j] = true;
                }
                return (serve, remote_meta);
            }
        };

        let mut gone = Vec::new();
        for (j, item) in hits.into_iter().zip(batch) {
            match item.outcome {
                Outcome::Ok(meta) | Outcome::Overwritten(meta) => {
                    let cached_hash = cached_meta[j].as_ref().map(|m| m.hash.as_str());
                    if cached_hash == Some(meta.hash.as_str()) {
                        serve[j] = true;
                    } else {
                        self.stale.fetch_add(1, Ordering::Relaxed);
                        debug!(object = %keys[j], "Cached copy is stale");
                    }
                    remote_meta[j] = Some(meta);
                }
                Outcome::NotFound => gone.push(keys[j].clone()),
                Outcome::Error(e) => {
                    warn!(object = %keys[j], error = %e, "Staleness check failed, serving cached copy");
                    serve[j] = true;
                }
                Outcome::Skipped => {}
            }
        }

        // Deleted on the remote since it was cached
        if !gone.is_empty() {
            self.evict(&gone);
        }
        (serve, remote_meta)
    }

    /// Materialize cached entries; entries that fail are left for the remote
    fn read_cached(
        &self,
        indices: &[usize],
        keys: &[ObjectKey],
        cached_meta: &[Option<ObjectMetadata>],
    ) -> Vec<(usize, Artifact)> {
        let mut staged = Vec::with_capacity(indices.len());
        for &j in indices {
            let Some(meta) = cached_meta[j].clone() else {
                continue;
            };
            match TempDir::new() {
                Ok(dir) => staged.push((j, dir, meta)),
                Err(e) => warn!(error = %e, "Failed to create staging directory"),
            }
        }
        if staged.is_empty() {
            return Vec::new();
        }

        let pull_keys: Vec<ObjectKey> = staged.iter().map(|(j, _, _)| keys[*j].clone()).collect();
        let dests: Vec<PathBuf> = staged.iter().map(|(_, d, _)| d.path().to_path_buf()).collect();
        let metas: Vec<ObjectMetadata> = staged.iter().map(|(_, _, m)| m.clone()).collect();

        let batch = match self.cache.pull_batch(&pull_keys, &dests, Some(metas.as_slice()), &PullOptions::default()) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "Cache read failed, falling back to remote");
                return Vec::new();
            }
        };

        let mut loaded = Vec::new();
        for ((j, dir, _), item) in staged.into_iter().zip(batch) {
            let key = item.key.clone();
            match item.into_result().and_then(|meta| self.load_artifact(&meta, dir.path())) {
                Ok(artifact) => {
                    debug!(object = %key, "Cache hit");
                    loaded.push((j, artifact));
                }
                Err(e) => warn!(object = %key, error = %e, "Cache read failed, falling back to remote"),
            }
        }
        loaded
    }

    /// Pull from the remote with verification and refresh the cache
    fn read_remote(
        &self,
        indices: &[usize],
        keys: &[ObjectKey],
        remote_meta: &[Option<ObjectMetadata>],
    ) -> RegistryResult<Vec<(usize, ItemResult<Artifact>)>> {
        if indices.is_empty() {
            return Ok(Vec::new());
        }
        self.misses.fetch_add(indices.len() as u64, Ordering::Relaxed);

        let acquire_lock = match self.remote.settings() {
            Ok(settings) => settings.mutable,
            Err(e) => {
                warn!(error = %e, "Failed to read registry settings, pulling without lock");
                false
            }
        };

        let mut dirs = Vec::with_capacity(indices.len());
        for _ in indices {
            dirs.push(TempDir::new()?);
        }
        let pull_keys: Vec<ObjectKey> = indices.iter().map(|&j| keys[j].clone()).collect();
        let dests: Vec<PathBuf> = dirs.iter().map(|d| d.path().to_path_buf()).collect();
        let known: Option<Vec<ObjectMetadata>> = indices.iter().map(|&j| remote_meta[j].clone()).collect();

        let batch = self.remote.pull_batch(
            &pull_keys,
            &dests,
            known.as_deref(),
            &PullOptions {
                acquire_lock,
                verify_hash: true,
            },
        )?;

        let mut results = Vec::with_capacity(indices.len());
        let mut mirror_keys = Vec::new();
        let mut mirror_sources = Vec::new();
        let mut mirror_meta = Vec::new();
        for ((&j, dir), item) in indices.iter().zip(&dirs).zip(batch) {
            let key = item.key.clone();
            let result = item.into_result().and_then(|meta| {
                let artifact = self.load_artifact(&meta, dir.path())?;
                Ok((meta, artifact))
            });
            match result {
                Ok((meta, artifact)) => {
                    debug!(object = %key, "Loaded from remote");
                    mirror_keys.push(key.clone());
                    mirror_sources.push(dir.path().to_path_buf());
                    mirror_meta.push(meta);
                    results.push((j, ItemResult::ok(key, artifact)));
                }
                Err(e) => results.push((j, ItemResult::failed(key, e))),
            }
        }

        self.mirror(&mirror_keys, &mirror_sources, &mirror_meta);
        Ok(results)
    }

    fn load_artifact(&self, meta: &ObjectMetadata, dir: &Path) -> RegistryResult<Artifact> {
        let materializer = self.materializers.get(&meta.materializer)?;
        materializer
            .load(dir, &meta.files)
            .map_err(|source| RegistryError::Materializer {
                id: meta.materializer.clone(),
                source,
            })
    }

    /// Best-effort copy of remote-confirmed payloads into the cache
    fn mirror(&self, keys: &[ObjectKey], sources: &[PathBuf], metadata: &[ObjectMetadata]) {
        if keys.is_empty() {
            return;
        }
        match self
            .cache
            .push_batch(keys, sources, metadata, &PushOptions::overwrite())
        {
            Ok(batch) => {
                for item in batch.failures() {
                    warn!(object = %item.key, status = item.status(), error = ?item.error(), "Failed to update cache");
                }
            }
            Err(e) => warn!(error = %e, "Failed to update cache"),
        }
    }

    /// Best-effort removal from the cache
    fn evict(&self, keys: &[ObjectKey]) {
        match self.cache.delete_batch(keys, false) {
            Ok(batch) => {
                for item in batch.failures() {
                    warn!(object = %item.key, error = ?item.error(), "Failed to evict cache entry");
                }
            }
            Err(e) => warn!(error = %e, "Failed to evict cache entries"),
        }
    }

    // ----------------------------------------------------------------------
    // Save
    // ----------------------------------------------------------------------

    /// Save one object and return the key it was stored under
    pub fn save(&self, request: SaveRequest, on_conflict: ConflictPolicy) -> RegistryResult<ObjectKey> {
        let item = self.save_batch(&[request], on_conflict)?.into_single()?;
        let key = item.key.clone();
        item.into_result().map(|_| key)
    }

    /// Save many objects to the remote, then mirror accepted ones into the cache
    pub fn save_batch(
        &self,
        requests: &[SaveRequest],
        on_conflict: ConflictPolicy,
    ) -> RegistryResult<BatchResult<ObjectMetadata>> {
        for request in requests {
            validate_name(&request.name)?;
            if let Some(version) = &request.version {
                validate_version(version)?;
                if version == LATEST {
                    return Err(RegistryError::InvalidArgument(format!(
                        "'{}' cannot be used as the version of a save",
                        LATEST
                    )));
                }
            }
        }

        let settings = self.remote.settings()?;
        let keys = self.assign_versions(requests, settings.versioned)?;

        let mut outcomes: Vec<Option<ItemResult<ObjectMetadata>>> = requests.iter().map(|_| None).collect();
        let mut staged = Vec::new();
        for (index, (request, key)) in requests.iter().zip(keys).enumerate() {
            match self.stage(request, &settings.materializers) {
                Ok((dir, draft)) => staged.push((index, key, dir, draft)),
                Err(e) => outcomes[index] = Some(ItemResult::failed(key, e)),
            }
        }

        let push_keys: Vec<ObjectKey> = staged.iter().map(|(_, k, _, _)| k.clone()).collect();
        let sources: Vec<PathBuf> = staged.iter().map(|(_, _, d, _)| d.path().to_path_buf()).collect();
        let drafts: Vec<ObjectMetadata> = staged.iter().map(|(_, _, _, m)| m.clone()).collect();
        let options = PushOptions {
            on_conflict,
            acquire_lock: on_conflict == ConflictPolicy::Overwrite,
        };
        let pushed = self.remote.push_batch(&push_keys, &sources, &drafts, &options)?;

        let mut mirror_keys = Vec::new();
        let mut mirror_sources = Vec::new();
        let mut mirror_meta = Vec::new();
        for (item, source) in pushed.iter().zip(&sources) {
            if let Some(meta) = item.value() {
                mirror_keys.push(item.key.clone());
                mirror_sources.push(source.clone());
                mirror_meta.push(meta.clone());
            }
        }
        self.mirror(&mirror_keys, &mirror_sources, &mirror_meta);

        for ((index, _, _dir, _), item) in staged.into_iter().zip(pushed) {
            outcomes[index] = Some(item);
        }
        Ok(outcomes
            .into_iter()
            .zip(requests)
            .map(|(outcome, request)| {
                outcome.unwrap_or_else(|| ItemResult::not_found(ObjectKey::latest(request.name.clone())))
            })
            .collect())
    }

    /// Concrete key for every request, continuing numbering within the batch
    fn assign_versions(&self, requests: &[SaveRequest], versioned: bool) -> RegistryResult<Vec<ObjectKey>> {
        let mut latest: HashMap<&str, Option<String>> = HashMap::new();
        let mut keys = Vec::with_capacity(requests.len());
        for request in requests {
            let version = match &request.version {
                Some(version) => version.clone(),
                None if !versioned => "1".to_string(),
                None => {
                    let current = match latest.get(request.name.as_str()) {
                        Some(current) => current.clone(),
                        None => self.remote.list_versions(&request.name)?.pop(),
                    };
                    let next = next_version(current.as_deref())?;
                    latest.insert(&request.name, Some(next.clone()));
                    next
                }
            };
            keys.push(ObjectKey::new(request.name.clone(), version));
        }
        Ok(keys)
    }

    /// Write an artifact into a staging directory with its draft metadata
    fn stage(
        &self,
        request: &SaveRequest,
        classes: &std::collections::BTreeMap<String, String>,
    ) -> RegistryResult<(TempDir, ObjectMetadata)> {
        let class = request.artifact.class();
        let id = classes.get(class).ok_or_else(|| RegistryError::Materializer {
            id: class.to_string(),
            source: anyhow::anyhow!("no materializer registered for class '{}'", class),
        })?;
        let materializer = self.materializers.get(id)?;

        let dir = TempDir::new()?;
        materializer
            .materialize(&request.artifact, dir.path())
            .map_err(|source| RegistryError::Materializer {
                id: id.clone(),
                source,
            })?;

        let mut draft = ObjectMetadata::new(class, id.clone());
        draft.extra = request.fields.clone();
        Ok((dir, draft))
    }

    // ----------------------------------------------------------------------
    // Delete
    // ----------------------------------------------------------------------

    /// Delete one version, or every version of `name` when `version` is `None`
    pub fn delete(&self, name: &str, version: Option<&str>) -> RegistryResult<()> {
        let batch = match version {
            None => {
                let batch = self.remote.delete_all(name, true)?;
                let deleted: Vec<ObjectKey> = batch.iter().filter(|i| i.is_ok()).map(|i| i.key.clone()).collect();
                self.evict(&deleted);
                // Versions only the cache still holds
                match self.cache.delete_all(name, false) {
                    Ok(swept) => {
                        for item in swept.failures() {
                            warn!(object = %item.key, error = ?item.error(), "Failed to evict cache entry");
                        }
                    }
                    Err(e) => warn!(name = name, error = %e, "Failed to sweep cache"),
                }
                batch
            }
            Some(version) => self.delete_batch(&[ObjectKey::new(name, version)])?,
        };
        for item in batch {
            item.into_result()?;
        }
        Ok(())
    }

    /// Delete many keys from the remote, then from the cache
    pub fn delete_batch(&self, keys: &[ObjectKey]) -> RegistryResult<BatchResult<()>> {
        let batch = self.remote.delete_batch(keys, true)?;
        let deleted: Vec<ObjectKey> = batch
            .iter()
            .filter(|i| i.is_ok() && !i.key.is_latest())
            .map(|i| i.key.clone())
            .collect();
        self.evict(&deleted);
        Ok(batch)
    }

    /// Drop every cached object
    pub fn purge_cache(&self) -> RegistryResult<usize> {
        let mut removed = 0;
        for name in self.cache.list_objects()? {
            removed += self.cache.delete_all(&name, false)?.ok_count();
        }
        info!(removed = removed, "Purged cache");
        Ok(removed)
    }

    // ----------------------------------------------------------------------
    // Discovery
    // ----------------------------------------------------------------------

    pub fn has_object(&self, key: &ObjectKey) -> RegistryResult<bool> {
        self.remote.has_object(key)
    }

    pub fn list_objects(&self) -> RegistryResult<Vec<String>> {
        self.remote.list_objects()
    }

    pub fn list_versions(&self, name: &str) -> RegistryResult<Vec<String>> {
        self.remote.list_versions(name)
    }

    pub fn fetch_metadata(&self, key: &ObjectKey) -> RegistryResult<ObjectMetadata> {
        self.remote.fetch_metadata(key)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
        }
    }

    pub fn log_metrics(&self) {
        let stats = self.stats();
        debug!(
            hits = stats.hits,
            misses = stats.misses,
            stale = stats.stale,
            hit_rate = format!("{:.1}%", stats.hit_rate()),
            "Cache metrics"
        );
    }

    // ----------------------------------------------------------------------
    // Map surface
    //
    // Keys are `name` (latest version) or `name@version`.
    // ----------------------------------------------------------------------

    fn write_policy(&self) -> RegistryResult<ConflictPolicy> {
        Ok(if self.remote.settings()?.mutable {
            ConflictPolicy::Overwrite
        } else {
            ConflictPolicy::Error
        })
    }

    fn request_for(key: &str, artifact: Artifact) -> RegistryResult<SaveRequest> {
        let parsed = ObjectKey::parse(key)?;
        let request = SaveRequest::new(parsed.name, artifact);
        Ok(if key.contains('@') {
            request.with_version(parsed.version)
        } else {
            request
        })
    }

    pub fn get(&self, key: &str) -> RegistryResult<Artifact> {
        self.load(&ObjectKey::parse(key)?, true)
    }

    /// Store `artifact`; a bare name gets the next version
    pub fn set(&self, key: &str, artifact: impl Into<Artifact>) -> RegistryResult<ObjectKey> {
        let request = Self::request_for(key, artifact.into())?;
        self.save(request, self.write_policy()?)
    }

    /// Remove one version, or every version for a bare name
    pub fn remove(&self, key: &str) -> RegistryResult<()> {
        let parsed = ObjectKey::parse(key)?;
        if key.contains('@') {
            self.delete(&parsed.name, Some(&parsed.version))
        } else {
            self.delete(&parsed.name, None)
        }
    }

    pub fn contains(&self, key: &str) -> RegistryResult<bool> {
        self.has_object(&ObjectKey::parse(key)?)
    }

    pub fn keys(&self) -> RegistryResult<Vec<String>> {
        self.list_objects()
    }

    pub fn values(&self) -> RegistryResult<Vec<Artifact>> {
        Ok(self.items()?.into_iter().map(|(_, artifact)| artifact).collect())
    }

    /// Latest version of every object
    pub fn items(&self) -> RegistryResult<Vec<(String, Artifact)>> {
        let keys: Vec<ObjectKey> = self.keys()?.into_iter().map(ObjectKey::latest).collect();
        self.load_batch(&keys, true)?
            .into_iter()
            .map(|item| {
                let name = item.key.name.clone();
                item.into_result().map(|artifact| (name, artifact))
            })
            .collect()
    }

    /// Store every `(key, artifact)` pair
    pub fn update<I>(&self, entries: I) -> RegistryResult<BatchResult<ObjectMetadata>>
    where
        I: IntoIterator<Item = (String, Artifact)>,
    {
        let requests = entries
            .into_iter()
            .map(|(key, artifact)| Self::request_for(&key, artifact))
            .collect::<RegistryResult<Vec<_>>>()?;
        self.save_batch(&requests, self.write_policy()?)
    }

    /// Copy the latest version of every object in `other`
    pub fn update_from(&self, other: &CachedRegistry) -> RegistryResult<BatchResult<ObjectMetadata>> {
        self.update(other.items()?)
    }
}

impl std::fmt::Debug for CachedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedRegistry")
            .field("remote", &self.remote)
            .field("cache", &self.cache)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ErrorKind;
    use crate::transport::{InMemoryTransport, TransportError, TransportResult};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    /// In-memory store whose writes can be switched off
    #[derive(Default)]
    struct FlakyTransport {
        inner: InMemoryTransport,
        fail_writes: AtomicBool,
    }

    impl FlakyTransport {
        fn check(&self) -> TransportResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(TransportError::Forbidden("writes disabled".to_string()));
            }
            Ok(())
        }
    }

    impl ObjectTransport for FlakyTransport {
        fn put(&self, key: &str, data: &[u8]) -> TransportResult<()> {
            self.check()?;
            self.inner.put(key, data)
        }
        fn put_if_absent(&self, key: &str, data: &[u8]) -> TransportResult<bool> {
            self.check()?;
            self.inner.put_if_absent(key, data)
        }
        fn get(&self, key: &str) -> TransportResult<Vec<u8>> {
            self.inner.get(key)
        }
        fn exists(&self, key: &str) -> TransportResult<bool> {
            self.inner.exists(key)
        }
        fn delete(&self, key: &str) -> TransportResult<()> {
            self.check()?;
            self.inner.delete(key)
        }
        fn list(&self, prefix: &str) -> TransportResult<Vec<String>> {
            self.inner.list(prefix)
        }
        fn identity(&self) -> String {
            "flaky://cache".to_string()
        }
    }

    fn options(mutable: bool) -> BackendOptions {
        BackendOptions {
            mutable,
            lock_timeout: Duration::from_secs(10),
            ..BackendOptions::default()
        }
    }

    fn open_with(remote: Arc<InMemoryTransport>, mutable: bool) -> (TempDir, CachedRegistry) {
        let cache_dir = TempDir::new().unwrap();
        let registry = CachedRegistry::open(
            remote,
            options(mutable),
            Some(cache_dir.path().to_path_buf()),
            MaterializerSet::builtin(),
        )
        .unwrap();
        (cache_dir, registry)
    }

    #[test]
    fn test_save_load_every_class() {
        let (_dir, registry) = open_with(Arc::new(InMemoryTransport::new()), false);

        let mut files = BTreeMap::new();
        files.insert("w.bin".to_string(), vec![0u8, 1, 2]);
        files.insert("cfg.json".to_string(), b"{}".to_vec());
        let artifacts = vec![
            Artifact::Bytes(vec![9, 8, 7]),
            Artifact::from("some text"),
            Artifact::Json(json!({"epochs": 3})),
            Artifact::Files(files),
        ];

        for (i, artifact) in artifacts.into_iter().enumerate() {
            let name = format!("proj:obj{}", i);
            let key = registry
                .save(SaveRequest::new(&name, artifact.clone()), ConflictPolicy::Error)
                .unwrap();
            assert_eq!(key.version, "1");
            assert_eq!(registry.load(&ObjectKey::latest(&name), true).unwrap(), artifact);
            assert_eq!(registry.fetch_metadata(&key).unwrap().class, artifact.class());
        }
    }

    #[test]
    fn test_versions_are_assigned_in_order() {
        let (_dir, registry) = open_with(Arc::new(InMemoryTransport::new()), false);
        registry
            .save(SaveRequest::new("proj:cfg", "a").with_version("1.4"), ConflictPolicy::Error)
            .unwrap();

        let batch = registry
            .save_batch(
                &[SaveRequest::new("proj:cfg", "b"), SaveRequest::new("proj:cfg", "c")],
                ConflictPolicy::Error,
            )
            .unwrap();
        let versions: Vec<_> = batch.iter().map(|i| i.key.version.clone()).collect();
        assert_eq!(versions, vec!["1.5", "1.6"]);
        assert_eq!(registry.get("proj:cfg").unwrap(), Artifact::from("c"));
        assert_eq!(registry.get("proj:cfg@1.5").unwrap(), Artifact::from("b"));
    }

    #[test]
    fn test_save_mirrors_into_cache() {
        let (_dir, registry) = open_with(Arc::new(InMemoryTransport::new()), false);
        let key = registry
            .save(SaveRequest::new("proj:m", "x").with_field("owner", "ml"), ConflictPolicy::Error)
            .unwrap();

        assert!(registry.cache().has_object(&key).unwrap());
        let cached = registry.cache().fetch_metadata(&key).unwrap();
        assert_eq!(cached.hash, registry.remote().fetch_metadata(&key).unwrap().hash);
        assert_eq!(cached.extra["owner"], "ml");

        // Second load is a verified cache hit
        registry.load(&key, true).unwrap();
        assert_eq!(registry.stats().hits, 1);
        assert_eq!(registry.stats().misses, 0);
    }

    #[test]
    fn test_cache_staleness() {
        let remote = Arc::new(InMemoryTransport::new());
        let (_a, reader) = open_with(remote.clone(), true);
        let (_b, writer) = open_with(remote.clone(), true);
        let key = ObjectKey::new("proj:model", "1");

        writer
            .save(SaveRequest::new("proj:model", "H1").with_version("1"), ConflictPolicy::Error)
            .unwrap();
        assert_eq!(reader.load(&key, true).unwrap(), Artifact::from("H1"));
        assert_eq!(reader.stats().misses, 1);

        writer
            .save(SaveRequest::new("proj:model", "H2").with_version("1"), ConflictPolicy::Overwrite)
            .unwrap();

        // Unverified load serves the stale copy without touching the remote
        let before = remote.request_count();
        assert_eq!(reader.load(&key, false).unwrap(), Artifact::from("H1"));
        assert_eq!(remote.request_count(), before);

        // Verified load notices the hash change and refreshes the cache
        assert_eq!(reader.load(&key, true).unwrap(), Artifact::from("H2"));
        assert_eq!(reader.stats().stale, 1);
        assert_eq!(reader.load(&key, false).unwrap(), Artifact::from("H2"));
        assert_eq!(
            reader.cache().fetch_metadata(&key).unwrap().hash,
            remote_hash(&reader, &key)
        );
    }

    fn remote_hash(registry: &CachedRegistry, key: &ObjectKey) -> String {
        registry.remote().fetch_metadata(key).unwrap().hash
    }

    #[test]
    fn test_latest_is_resolved_on_remote_when_verifying() {
        let remote = Arc::new(InMemoryTransport::new());
        let (_a, reader) = open_with(remote.clone(), false);
        let (_b, writer) = open_with(remote, false);

        writer.set("proj:m", "one").unwrap();
        assert_eq!(reader.get("proj:m").unwrap(), Artifact::from("one"));
        writer.set("proj:m", "two").unwrap();

        assert_eq!(reader.load(&ObjectKey::latest("proj:m"), false).unwrap(), Artifact::from("one"));
        assert_eq!(reader.load(&ObjectKey::latest("proj:m"), true).unwrap(), Artifact::from("two"));
    }

    #[test]
    fn test_load_batch_order_and_missing_items() {
        let (_dir, registry) = open_with(Arc::new(InMemoryTransport::new()), false);
        registry.set("n:a", "a").unwrap();
        registry.set("n:c", "c").unwrap();
        // Warm one entry
        registry.get("n:a").unwrap();

        let keys = vec![ObjectKey::latest("n:c"), ObjectKey::latest("n:b"), ObjectKey::new("n:a", "1")];
        let batch = registry.load_batch(&keys, true).unwrap();
        let names: Vec<_> = batch.iter().map(|i| i.key.name.as_str()).collect();
        assert_eq!(names, vec!["n:c", "n:b", "n:a"]);
        assert_eq!(batch.get(0).unwrap().value(), Some(&Artifact::from("c")));
        assert!(batch.get(1).unwrap().is_not_found());
        assert_eq!(batch.get(2).unwrap().value(), Some(&Artifact::from("a")));

        assert_eq!(
            registry.load(&ObjectKey::latest("n:b"), true).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_cache_failures_are_swallowed() {
        let remote = Arc::new(InMemoryTransport::new());
        let cache_transport = Arc::new(FlakyTransport::default());
        let cache = RegistryBackend::open(cache_transport.clone(), options(true)).unwrap();
        let remote_backend = RegistryBackend::open(remote, options(false)).unwrap();
        let registry = CachedRegistry::new(remote_backend, cache, MaterializerSet::builtin());

        cache_transport.fail_writes.store(true, Ordering::SeqCst);
        let key = registry.save(SaveRequest::new("n:x", "payload"), ConflictPolicy::Error).unwrap();
        assert!(registry.remote().has_object(&key).unwrap());
        assert!(!registry.cache().has_object(&key).unwrap());

        assert_eq!(registry.load(&key, true).unwrap(), Artifact::from("payload"));
        registry.delete("n:x", None).unwrap();
        assert!(!registry.has_object(&key).unwrap());
    }

    #[test]
    fn test_remote_errors_propagate_on_save() {
        let (_dir, registry) = open_with(Arc::new(InMemoryTransport::new()), false);
        registry.set("n:x@1", "a").unwrap();
        let err = registry.set("n:x@1", "b").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(registry.get("n:x@1").unwrap(), Artifact::from("a"));

        let err = registry
            .save(SaveRequest::new("bad_name", "a"), ConflictPolicy::Error)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_delete_sweeps_remote_and_cache() {
        let (_dir, registry) = open_with(Arc::new(InMemoryTransport::new()), false);
        registry.set("n:x", "1").unwrap();
        registry.set("n:x", "2").unwrap();
        registry.set("n:y", "y").unwrap();

        registry.delete("n:x", Some("1")).unwrap();
        assert_eq!(registry.list_versions("n:x").unwrap(), vec!["2"]);
        assert_eq!(registry.cache().list_versions("n:x").unwrap(), vec!["2"]);

        registry.delete("n:x", None).unwrap();
        registry.delete("n:x", None).unwrap();
        assert!(registry.list_versions("n:x").unwrap().is_empty());
        assert!(registry.cache().list_versions("n:x").unwrap().is_empty());
        assert_eq!(registry.keys().unwrap(), vec!["n:y"]);
    }

    #[test]
    fn test_remote_deletion_evicts_cache_entry() {
        let remote = Arc::new(InMemoryTransport::new());
        let (_a, reader) = open_with(remote.clone(), false);
        let (_b, writer) = open_with(remote, false);

        let key = writer.set("n:x", "x").unwrap();
        reader.load(&key, true).unwrap();
        writer.delete("n:x", None).unwrap();

        assert_eq!(reader.load(&key, true).unwrap_err().kind(), ErrorKind::NotFound);
        assert!(!reader.cache().has_object(&key).unwrap());
    }

    #[test]
    fn test_map_surface() {
        let (_a, registry) = open_with(Arc::new(InMemoryTransport::new()), true);
        registry.set("team:cfg", json!({"lr": 0.1})).unwrap();
        registry.set("team:notes@7", "hello").unwrap();

        assert!(registry.contains("team:cfg").unwrap());
        assert!(registry.contains("team:notes@7").unwrap());
        assert!(!registry.contains("team:notes@8").unwrap());
        assert_eq!(registry.keys().unwrap(), vec!["team:cfg", "team:notes"]);
        assert_eq!(registry.values().unwrap().len(), 2);

        // Mutable registries overwrite explicit versions
        registry.set("team:notes@7", "updated").unwrap();
        assert_eq!(registry.get("team:notes@7").unwrap(), Artifact::from("updated"));

        let (_b, other) = open_with(Arc::new(InMemoryTransport::new()), false);
        let copied = other.update_from(&registry).unwrap();
        assert!(copied.all_ok());
        assert_eq!(other.get("team:notes").unwrap(), Artifact::from("updated"));

        registry.remove("team:notes").unwrap();
        assert!(!registry.contains("team:notes").unwrap());
        assert_eq!(registry.items().unwrap().len(), 1);
    }

    struct UpperText;

    impl Materializer for UpperText {
        fn id(&self) -> &str {
            "custom:upper"
        }

        fn materialize(&self, artifact: &Artifact, dir: &Path) -> anyhow::Result<()> {
            let Artifact::Text(text) = artifact else {
                anyhow::bail!("text only");
            };
            std::fs::write(dir.join("upper.txt"), text.to_uppercase())?;
            Ok(())
        }

        fn load(&self, dir: &Path, _files: &[String]) -> anyhow::Result<Artifact> {
            Ok(Artifact::Text(std::fs::read_to_string(dir.join("upper.txt"))?))
        }
    }

    #[test]
    fn test_custom_materializer() {
        let remote = Arc::new(InMemoryTransport::new());
        let (_a, mut registry) = open_with(remote.clone(), false);
        registry.register_materializer("text", Arc::new(UpperText)).unwrap();

        let key = registry.set("n:shout", "quiet").unwrap();
        assert_eq!(registry.fetch_metadata(&key).unwrap().materializer, "custom:upper");
        assert_eq!(registry.get("n:shout").unwrap(), Artifact::from("QUIET"));

        // A client without the implementation cannot save text anymore
        let (_b, plain) = open_with(remote, false);
        let err = plain.set("n:other", "x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Materializer);
    }
}
