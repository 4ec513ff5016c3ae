//! Cache entries and the error-absorbing store adapter.
//!
//! [`CacheStore`] wraps any [`KeyValueStore`] and turns it into an
//! optimization that cannot break its callers: unreadable entries become
//! misses, failed writes are logged and dropped.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use lectern_core::{CacheError, Record};
use serde::{Deserialize, Serialize};

use super::key::CacheKey;
use super::traits::{CacheStats, KeyValueStore};

/// The full result set of one query shape at one point in time.
///
/// Entries are never merged or patched: every successful fetch replaces the
/// previous entry for its key wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    key: CacheKey,
    payload: Vec<Record>,
    stored_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: CacheKey, payload: Vec<Record>, stored_at: DateTime<Utc>) -> Self {
        Self {
            key,
            payload,
            stored_at,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn payload(&self) -> &[Record] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<Record> {
        self.payload
    }

    pub fn stored_at(&self) -> DateTime<Utc> {
        self.stored_at
    }
}

/// Serialized form: `{"data": [...], "timestamp": <unix millis>}`.
#[derive(Serialize)]
struct StoredEntryRef<'a> {
    data: &'a [Record],
    #[serde(with = "chrono::serde::ts_milliseconds")]
    timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct StoredEntry {
    data: Vec<Record>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    timestamp: DateTime<Utc>,
}

/// Adapter from raw strings to typed [`CacheEntry`] values.
///
/// # Error Absorption
///
/// - `get` returns `None` for missing, corrupt or unreadable entries.
/// - `set` and `remove` swallow failures (quota, storage disabled).
///
/// Each absorbed failure is logged at `warn` and counted in [`CacheStats`].
pub struct CacheStore<S: KeyValueStore> {
    backend: S,
    stats: Arc<RwLock<CacheStats>>,
}

impl<S: KeyValueStore> CacheStore<S> {
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    /// Get a reference to the underlying backend.
    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Consume the adapter and return the backend.
    pub fn into_backend(self) -> S {
        self.backend
    }

    /// Look up the entry for `key`, treating any failure as absent.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let raw = match self.backend.get_raw(key.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache read failed, treating as miss");
                self.record(|s| s.read_errors += 1);
                return None;
            }
        };

        match serde_json::from_str::<StoredEntry>(&raw) {
            Ok(stored) => Some(CacheEntry::new(key.clone(), stored.data, stored.timestamp)),
            Err(e) => {
                let err = CacheError::Read {
                    key: key.to_string(),
                    reason: e.to_string(),
                };
                tracing::warn!(key = %key, error = %err, "corrupt cache entry, treating as miss");
                self.record(|s| s.read_errors += 1);
                None
            }
        }
    }

    /// The stamp of the stored entry for `key`, without counting a read
    /// failure. Unreadable entries have no stamp.
    pub(crate) async fn stored_at(&self, key: &CacheKey) -> Option<DateTime<Utc>> {
        let raw = self.backend.get_raw(key.as_str()).await.ok()??;
        serde_json::from_str::<StoredEntry>(&raw)
            .ok()
            .map(|stored| stored.timestamp)
    }

    /// Overwrite the entry for its key. Returns whether the write landed.
    pub async fn set(&self, entry: &CacheEntry) -> bool {
        let stored = StoredEntryRef {
            data: &entry.payload,
            timestamp: entry.stored_at,
        };
        let raw = match serde_json::to_string(&stored) {
            Ok(raw) => raw,
            Err(e) => {
                let err = CacheError::Write {
                    key: entry.key.to_string(),
                    reason: e.to_string(),
                };
                tracing::warn!(key = %entry.key, error = %err, "cache entry not serializable, skipping write");
                self.record(|s| s.write_errors += 1);
                return false;
            }
        };

        match self.backend.set_raw(entry.key.as_str(), raw).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %entry.key, error = %e, "cache write failed, continuing without cache");
                self.record(|s| s.write_errors += 1);
                false
            }
        }
    }

    /// Remove the entry for `key`. Returns whether the removal landed.
    pub async fn remove(&self, key: &CacheKey) -> bool {
        match self.backend.remove_raw(key.as_str()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache remove failed");
                self.record(|s| s.write_errors += 1);
                false
            }
        }
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }

    pub(crate) fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }
}
