//! Process-local key-value store.
//!
//! Useful as the default medium and in tests. An optional byte capacity
//! emulates the per-origin quota of browser-style storage.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use lectern_core::CacheError;

use super::traits::KeyValueStore;

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<String, String>,
    used_bytes: u64,
}

/// In-memory [`KeyValueStore`].
///
/// Usage is counted as the byte length of keys plus values.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
    capacity_bytes: Option<u64>,
    disabled: bool,
}

impl MemoryStore {
    /// Unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that refuses writes beyond `capacity_bytes`.
    pub fn with_capacity(capacity_bytes: u64) -> Self {
        Self {
            capacity_bytes: Some(capacity_bytes),
            ..Self::default()
        }
    }

    /// Store whose every operation fails, like storage turned off by the host.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently in use.
    pub fn used_bytes(&self) -> u64 {
        self.inner.read().map(|i| i.used_bytes).unwrap_or(0)
    }

    fn check_enabled(&self) -> Result<(), CacheError> {
        if self.disabled {
            return Err(CacheError::Unavailable {
                reason: "storage disabled".to_string(),
            });
        }
        Ok(())
    }
}

fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

fn poisoned(key: &str) -> CacheError {
    CacheError::Unavailable {
        reason: format!("memory store lock poisoned while accessing {key}"),
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check_enabled()?;
        let inner = self.inner.read().map_err(|_| poisoned(key))?;
        Ok(inner.entries.get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.check_enabled()?;
        let mut inner = self.inner.write().map_err(|_| poisoned(key))?;

        let previous = inner
            .entries
            .get(key)
            .map(|old| entry_size(key, old))
            .unwrap_or(0);
        let needed = entry_size(key, &value);
        let projected = inner.used_bytes - previous + needed;

        if let Some(capacity) = self.capacity_bytes {
            if projected > capacity {
                return Err(CacheError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    available: capacity.saturating_sub(inner.used_bytes - previous),
                });
            }
        }

        inner.entries.insert(key.to_string(), value);
        inner.used_bytes = projected;
        Ok(())
    }

    async fn remove_raw(&self, key: &str) -> Result<(), CacheError> {
        self.check_enabled()?;
        let mut inner = self.inner.write().map_err(|_| poisoned(key))?;
        if let Some(old) = inner.entries.remove(key) {
            inner.used_bytes -= entry_size(key, &old);
        }
        Ok(())
    }
}
