//! Advisory locks
//!
//! A lock is a small record stored under `_lock_{name}@{version}`. Holders
//! cooperate by creating it with create-if-absent and deleting it when done;
//! the store itself never enforces it.

use std::cmp::min;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::errors::{RegistryError, RegistryResult};
use super::key::ObjectKey;
use crate::transport::{ObjectTransport, TransportError};

/// Default bound on lock acquisition
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// First retry delay while a lock is busy
const POLL_INITIAL: Duration = Duration::from_millis(25);

/// Longest retry delay while a lock is busy
const POLL_MAX: Duration = Duration::from_millis(500);

/// Pause between write and read-back when the store has no conditional writes
const SETTLE_DELAY: Duration = Duration::from_millis(20);

/// Stored lock record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

/// Acquires and releases advisory locks on one transport
#[derive(Clone)]
pub struct LockManager {
    transport: Arc<dyn ObjectTransport>,
}

impl LockManager {
    pub fn new(transport: Arc<dyn ObjectTransport>) -> Self {
        Self { transport }
    }

    /// Fresh holder identity for one acquisition
    pub fn new_holder() -> String {
        Uuid::new_v4().to_string()
    }

    /// Try to take the lock for `key` until `timeout` elapses.
    ///
    /// Returns `Ok(false)` when another holder kept it for the whole window.
    pub fn acquire(&self, key: &ObjectKey, holder: &str, timeout: Duration) -> RegistryResult<bool> {
        let lock_key = key.lock_key();
        let record = serde_json::to_vec(&LockRecord {
            holder: holder.to_string(),
            acquired_at: Utc::now(),
        })?;

        let deadline = Instant::now() + timeout;
        let mut delay = POLL_INITIAL;
        loop {
            if self.try_create(&lock_key, holder, &record)? {
                debug!(lock = %key.lock_id(), holder = holder, "Lock acquired");
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(lock = %key.lock_id(), "Lock still held at deadline");
                return Ok(false);
            }
            thread::sleep(min(delay, deadline - now));
            delay = min(delay * 2, POLL_MAX);
        }
    }

    fn try_create(&self, lock_key: &str, holder: &str, record: &[u8]) -> RegistryResult<bool> {
        if self.transport.supports_conditional_writes() {
            return Ok(self.transport.put_if_absent(lock_key, record)?);
        }

        // Write, then read back to see whose record survived
        if self.transport.exists(lock_key)? {
            return Ok(false);
        }
        self.transport.put(lock_key, record)?;
        thread::sleep(SETTLE_DELAY);
        Ok(self.current_holder(lock_key)?.as_deref() == Some(holder))
    }

    fn current_holder(&self, lock_key: &str) -> RegistryResult<Option<String>> {
        match self.transport.get(lock_key) {
            Ok(data) => {
                let record: LockRecord = serde_json::from_slice(&data)?;
                Ok(Some(record.holder))
            }
            Err(TransportError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Release the lock if `holder` still owns it
    pub fn release(&self, key: &ObjectKey, holder: &str) -> RegistryResult<()> {
        let lock_key = key.lock_key();
        match self.current_holder(&lock_key)? {
            Some(current) if current == holder => {
                self.transport.delete(&lock_key)?;
                debug!(lock = %key.lock_id(), holder = holder, "Lock released");
            }
            Some(current) => {
                warn!(
                    lock = %key.lock_id(),
                    holder = holder,
                    current = %current,
                    "Lock is owned by another holder, leaving it in place"
                );
            }
            None => {
                warn!(lock = %key.lock_id(), holder = holder, "Lock vanished before release");
            }
        }
        Ok(())
    }

    /// Acquire with a fresh holder, failing with a lock error on timeout
    pub fn lock(&self, key: &ObjectKey, timeout: Duration) -> RegistryResult<LockGuard<'_>> {
        let holder = Self::new_holder();
        if !self.acquire(key, &holder, timeout)? {
            return Err(RegistryError::Lock {
                key: key.lock_id(),
                reason: format!("still held by another caller after {:?}", timeout),
            });
        }
        Ok(LockGuard {
            manager: self,
            key: key.clone(),
            holder,
            released: false,
        })
    }

    /// Holder of the lock on `key`, if any
    pub fn holder(&self, key: &ObjectKey) -> RegistryResult<Option<String>> {
        self.current_holder(&key.lock_key())
    }

    /// Remove a lock regardless of holder (operator recovery after a crash)
    pub fn break_lock(&self, key: &ObjectKey) -> RegistryResult<()> {
        warn!(lock = %key.lock_id(), "Breaking lock");
        self.transport.delete(&key.lock_key())?;
        Ok(())
    }
}

/// Held lock; released when dropped
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    key: ObjectKey,
    holder: String,
    released: bool,
}

impl LockGuard<'_> {
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Release now and report failures
    pub fn release(mut self) -> RegistryResult<()> {
        self.released = true;
        self.manager.release(&self.key, &self.holder)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.manager.release(&self.key, &self.holder) {
            warn!(lock = %self.key.lock_id(), error = %e, "Failed to release lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    fn manager() -> (Arc<InMemoryTransport>, LockManager) {
        let transport = Arc::new(InMemoryTransport::new());
        let manager = LockManager::new(transport.clone());
        (transport, manager)
    }

    #[test]
    fn test_acquire_release() {
        let (transport, locks) = manager();
        let key = ObjectKey::new("a:b", "1");

        assert!(locks.acquire(&key, "h1", Duration::from_millis(10)).unwrap());
        assert!(!locks.acquire(&key, "h2", Duration::from_millis(50)).unwrap());
        assert_eq!(locks.holder(&key).unwrap().as_deref(), Some("h1"));

        // Wrong holder leaves the lock alone
        locks.release(&key, "h2").unwrap();
        assert!(transport.exists(&key.lock_key()).unwrap());

        locks.release(&key, "h1").unwrap();
        assert!(locks.holder(&key).unwrap().is_none());
        assert!(locks.acquire(&key, "h2", Duration::from_millis(10)).unwrap());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let (_transport, locks) = manager();
        let key = ObjectKey::new("a:b", "1");
        {
            let _guard = locks.lock(&key, Duration::from_millis(10)).unwrap();
            assert!(matches!(
                locks.lock(&key, Duration::from_millis(10)),
                Err(RegistryError::Lock { .. })
            ));
        }
        assert!(locks.lock(&key, Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_waiter_gets_lock_after_release() {
        let (_transport, locks) = manager();
        let key = ObjectKey::new("a:b", "1");
        let guard = locks.lock(&key, Duration::from_millis(10)).unwrap();

        let waiter = {
            let locks = locks.clone();
            let key = key.clone();
            thread::spawn(move || locks.acquire(&key, "waiter", Duration::from_secs(5)).unwrap())
        };
        thread::sleep(Duration::from_millis(100));
        guard.release().unwrap();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_mutual_exclusion_under_contention() {
        let (_transport, locks) = manager();
        let key = ObjectKey::new("a:b", "1");
        let inside = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(6));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let locks = locks.clone();
                let key = key.clone();
                let inside = inside.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let _guard = locks.lock(&key, Duration::from_secs(10)).unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    thread::sleep(Duration::from_millis(5));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_emulated_lock_without_conditional_writes() {
        let transport = Arc::new(InMemoryTransport::without_conditional_writes());
        let locks = LockManager::new(transport);
        let key = ObjectKey::new("a:b", "1");

        let guard = locks.lock(&key, Duration::from_millis(10)).unwrap();
        assert!(!locks.acquire(&key, "other", Duration::from_millis(50)).unwrap());
        drop(guard);
        assert!(locks.acquire(&key, "other", Duration::from_millis(50)).unwrap());
    }

    #[test]
    fn test_break_lock() {
        let (_transport, locks) = manager();
        let key = ObjectKey::new("a:b", "1");
        assert!(locks.acquire(&key, "crashed", Duration::from_millis(10)).unwrap());
        locks.break_lock(&key).unwrap();
        assert!(locks.acquire(&key, "next", Duration::from_millis(10)).unwrap());
    }
}
