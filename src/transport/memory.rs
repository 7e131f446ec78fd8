use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use uuid::Uuid;

use super::errors::{TransportError, TransportResult};
use super::ObjectTransport;

/// In-memory, map-based object transport.
///
/// Intended for tests and embedding. Objects are held behind a `RwLock` so
/// concurrent callers observe the same atomicity a conditional-write capable
/// object store provides. Every trait call increments a request counter.
pub struct InMemoryTransport {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    requests: AtomicU64,
    conditional_writes: AtomicBool,
    id: Uuid,
}

impl InMemoryTransport {
    /// Create a new empty transport.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            requests: AtomicU64::new(0),
            conditional_writes: AtomicBool::new(true),
            id: Uuid::new_v4(),
        }
    }

    /// Create a transport that reports no conditional write support.
    pub fn without_conditional_writes() -> Self {
        let transport = Self::new();
        transport.conditional_writes.store(false, Ordering::Relaxed);
        transport
    }

    /// Number of trait calls served so far.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    /// Return every stored key in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.read_map().keys().cloned().collect()
    }

    fn record(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Vec<u8>>> {
        // A panicking writer cannot leave the map half-updated.
        self.objects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.objects.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectTransport for InMemoryTransport {
    fn put(&self, key: &str, data: &[u8]) -> TransportResult<()> {
        self.record();
        self.write_map().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn put_if_absent(&self, key: &str, data: &[u8]) -> TransportResult<bool> {
        self.record();
        let mut map = self.write_map();
        if map.contains_key(key) {
            return Ok(false);
        }
        map.insert(key.to_string(), data.to_vec());
        Ok(true)
    }

    fn get(&self, key: &str) -> TransportResult<Vec<u8>> {
        self.record();
        self.read_map()
            .get(key)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(key.to_string()))
    }

    fn exists(&self, key: &str) -> TransportResult<bool> {
        self.record();
        Ok(self.read_map().contains_key(key))
    }

    fn delete(&self, key: &str) -> TransportResult<()> {
        self.record();
        self.write_map().remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> TransportResult<Vec<String>> {
        self.record();
        Ok(self
            .read_map()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn identity(&self) -> String {
        format!("memory://{}", self.id)
    }

    fn supports_conditional_writes(&self) -> bool {
        self.conditional_writes.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("object_count", &self.len())
            .field("requests", &self.request_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let transport = InMemoryTransport::new();
        transport.put("a/b", b"hello").unwrap();
        assert_eq!(transport.get("a/b").unwrap(), b"hello");
        assert!(transport.exists("a/b").unwrap());

        transport.delete("a/b").unwrap();
        assert!(!transport.exists("a/b").unwrap());
        assert!(transport.get("a/b").unwrap_err().is_not_found());

        // Deleting again is fine
        transport.delete("a/b").unwrap();
    }

    #[test]
    fn test_put_if_absent() {
        let transport = InMemoryTransport::new();
        assert!(transport.put_if_absent("k", b"first").unwrap());
        assert!(!transport.put_if_absent("k", b"second").unwrap());
        assert_eq!(transport.get("k").unwrap(), b"first");
    }

    #[test]
    fn test_list_prefix() {
        let transport = InMemoryTransport::new();
        transport.put("objects/a/1", b"").unwrap();
        transport.put("objects/a/2", b"").unwrap();
        transport.put("objects/b/1", b"").unwrap();
        transport.put("other", b"").unwrap();

        let keys = transport.list("objects/a/").unwrap();
        assert_eq!(keys, vec!["objects/a/1", "objects/a/2"]);
        assert_eq!(transport.list("").unwrap().len(), 4);
    }

    #[test]
    fn test_request_counter() {
        let transport = InMemoryTransport::new();
        assert_eq!(transport.request_count(), 0);
        transport.exists("x").unwrap();
        let _ = transport.get("x");
        assert_eq!(transport.request_count(), 2);
    }
}
