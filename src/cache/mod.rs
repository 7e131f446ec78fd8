//! Caching layer
//!
//! A local registry backend that shortens repeated reads, and the cached
//! registry that composes it with the remote.

pub mod cached;
pub mod local;

pub use cached::{CacheStats, CachedRegistry, SaveRequest};
pub use local::{default_cache_root, open_cache_backend};
