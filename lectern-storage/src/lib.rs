//! Lectern Storage - Query Cache
//!
//! Read-through caching for remote collection queries. Views describe the
//! query they want; the cache derives a key, serves fresh entries from the
//! persistent store and re-runs the remote query when an entry is missing,
//! expired or explicitly refreshed after a local write.

pub mod cache;

// Re-export cache types for consumers
pub use cache::{
    derive_key, is_fresh, CacheEntry, CacheKey, CacheRead, CacheStats, CacheStore,
    ConfiguredStore, DocumentWriter, FetchResult, FetchState, FreshnessPolicy, KeyValueStore, LmdbStore,
    LmdbStoreError, MemoryStore, QueryCache, QueryExecutor, Subscription,
};
