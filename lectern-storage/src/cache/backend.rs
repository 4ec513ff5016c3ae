//! Backend selection from configuration.

use async_trait::async_trait;
use lectern_core::{CacheError, StoreConfig};

use super::lmdb_backend::{LmdbStore, LmdbStoreError};
use super::memory::MemoryStore;
use super::traits::KeyValueStore;

/// The store named by `[cache.store]`.
pub enum ConfiguredStore {
    Memory(MemoryStore),
    Lmdb(LmdbStore),
}

impl ConfiguredStore {
    /// Open the configured store. Only LMDB can fail to open.
    pub fn open(config: &StoreConfig) -> Result<Self, LmdbStoreError> {
        match config {
            StoreConfig::Memory { capacity_bytes } => Ok(Self::Memory(match capacity_bytes {
                Some(capacity) => MemoryStore::with_capacity(*capacity),
                None => MemoryStore::new(),
            })),
            StoreConfig::Lmdb { path, map_size_mb } => {
                tracing::info!(path = %path.display(), map_size_mb, "opening LMDB cache store");
                Ok(Self::Lmdb(LmdbStore::open(path, *map_size_mb)?))
            }
        }
    }

    /// Release the store. An LMDB environment is closed so its path can be
    /// opened again; memory entries are dropped.
    pub fn close(self) {
        match self {
            Self::Memory(_) => {}
            Self::Lmdb(store) => {
                tracing::info!("closing LMDB cache store");
                store.close();
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for ConfiguredStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self {
            Self::Memory(store) => store.get_raw(key).await,
            Self::Lmdb(store) => store.get_raw(key).await,
        }
    }

    async fn set_raw(&self, key: &str, value: String) -> Result<(), CacheError> {
        match self {
            Self::Memory(store) => store.set_raw(key, value).await,
            Self::Lmdb(store) => store.set_raw(key, value).await,
        }
    }

    async fn remove_raw(&self, key: &str) -> Result<(), CacheError> {
        match self {
            Self::Memory(store) => store.remove_raw(key).await,
            Self::Lmdb(store) => store.remove_raw(key).await,
        }
    }
}
