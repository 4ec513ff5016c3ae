//! Persistence backend trait and cache statistics.
//!
//! This module defines the trait that must be implemented by the storage
//! medium underneath the cache.

use async_trait::async_trait;
use lectern_core::CacheError;

/// String-keyed, string-valued persistent store.
///
/// This trait abstracts over the medium that holds serialized cache entries
/// (e.g., an in-memory map, LMDB, browser-style local storage). It is shared
/// across all keys and possibly other application features.
///
/// # Failure Model
///
/// Every operation is fallible and may suspend. Implementations report
/// problems as [`CacheError`]; the cache never lets those errors escape to
/// its consumers. A `set` that would exceed the medium's capacity must fail
/// with [`CacheError::QuotaExceeded`] and leave the previous value in place.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the raw value stored under `key`.
    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Overwrite the value stored under `key`.
    async fn set_raw(&self, key: &str, value: String) -> Result<(), CacheError>;

    /// Remove the value stored under `key`. Removing a missing key succeeds.
    async fn remove_raw(&self, key: &str) -> Result<(), CacheError>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from a fresh entry.
    pub hits: u64,
    /// Reads that found no entry or an expired one.
    pub misses: u64,
    /// Reads that joined a remote query already in flight.
    pub coalesced: u64,
    /// Remote queries issued.
    pub remote_fetches: u64,
    /// Remote queries that failed.
    pub remote_failures: u64,
    /// Completed remote queries whose result was older than the stored one.
    pub superseded_writes: u64,
    /// Absorbed storage read failures (including corrupt entries).
    pub read_errors: u64,
    /// Absorbed storage write or remove failures.
    pub write_errors: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
