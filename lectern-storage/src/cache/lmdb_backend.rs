//! LMDB-backed key-value store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep serialized cache
//! entries on disk, so they survive process restarts on the same machine.
//!
//! # Capacity
//!
//! The LMDB map size is the store's quota. A write that does not fit fails
//! with [`CacheError::QuotaExceeded`] and the previous value stays readable.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses:
//! - Read transactions for `get_raw`
//! - Write transactions for `set_raw` and `remove_raw`
//!
//! # Long Keys
//!
//! LMDB rejects keys over 511 bytes. Longer cache keys are stored
//! under `sha256:<hex digest of the key>`, a fixed 71-byte storage key.

use std::borrow::Cow;
use std::path::Path;

use async_trait::async_trait;
use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions, MdbError};
use lectern_core::CacheError;
use sha2::{Digest, Sha256};

use super::traits::KeyValueStore;

/// Error type for opening an LMDB store.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// LMDB-backed [`KeyValueStore`].
///
/// # Example
///
/// ```ignore
/// use lectern_storage::cache::{LmdbStore, QueryCache};
///
/// let store = LmdbStore::open("/var/lib/lectern/cache", 64)?;
/// let cache = QueryCache::new(store, executor, settings);
/// ```
pub struct LmdbStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Str, Str>,
}

impl LmdbStore {
    /// Open (or create) a store.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `map_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, map_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Str, Str> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self { env, db })
    }

    /// Number of stored keys.
    pub fn entry_count(&self) -> Result<u64, CacheError> {
        let rtxn = self.env.read_txn().map_err(|e| read_error("*", e))?;
        self.db.len(&rtxn).map_err(|e| read_error("*", e))
    }

    /// Close the environment and wait until LMDB has released it, so the
    /// same path can be opened again.
    pub fn close(self) {
        let Self { env, db: _ } = self;
        env.prepare_for_closing().wait();
    }
}

/// LMDB's default maximum key size.
const MAX_KEY_BYTES: usize = 511;

/// The key actually written to LMDB for a cache key.
fn storage_key(key: &str) -> Cow<'_, str> {
    if key.len() <= MAX_KEY_BYTES {
        Cow::Borrowed(key)
    } else {
        Cow::Owned(format!("sha256:{}", hex::encode(Sha256::digest(key.as_bytes()))))
    }
}

fn read_error(key: &str, e: heed::Error) -> CacheError {
    CacheError::Read {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

fn write_error(key: &str, needed: usize, e: heed::Error) -> CacheError {
    match e {
        heed::Error::Mdb(MdbError::MapFull) => CacheError::QuotaExceeded {
            key: key.to_string(),
            needed: needed as u64,
            available: 0,
        },
        other => CacheError::Write {
            key: key.to_string(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl KeyValueStore for LmdbStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        let rtxn = self.env.read_txn().map_err(|e| read_error(key, e))?;
        let value = self
            .db
            .get(&rtxn, &storage_key(key))
            .map_err(|e| read_error(key, e))?;
        Ok(value.map(str::to_owned))
    }

    async fn set_raw(&self, key: &str, value: String) -> Result<(), CacheError> {
        let needed = key.len() + value.len();
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| write_error(key, needed, e))?;

        // On failure the transaction is dropped and aborted, keeping the old value.
        self.db
            .put(&mut wtxn, &storage_key(key), &value)
            .map_err(|e| write_error(key, needed, e))?;

        wtxn.commit().map_err(|e| write_error(key, needed, e))
    }

    async fn remove_raw(&self, key: &str) -> Result<(), CacheError> {
        let mut wtxn = self.env.write_txn().map_err(|e| write_error(key, 0, e))?;
        self.db
            .delete(&mut wtxn, &storage_key(key))
            .map_err(|e| write_error(key, 0, e))?;
        wtxn.commit().map_err(|e| write_error(key, 0, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (LmdbStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = LmdbStore::open(temp_dir.path(), 10).expect("store creation should succeed");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _temp_dir) = create_test_store();

        store
            .set_raw("lectern-cache:messages:abc", r#"{"data":[],"timestamp":1}"#.to_string())
            .await
            .expect("set should succeed");

        let value = store
            .get_raw("lectern-cache:messages:abc")
            .await
            .expect("get should succeed");
        assert_eq!(value.as_deref(), Some(r#"{"data":[],"timestamp":1}"#));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (store, _temp_dir) = create_test_store();
        let value = store.get_raw("missing").await.expect("get should succeed");
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_overwrite() {
        let (store, _temp_dir) = create_test_store();
        store.set_raw("k", "one".to_string()).await.expect("set should succeed");
        store.set_raw("k", "two".to_string()).await.expect("set should succeed");
        assert_eq!(
            store.get_raw("k").await.expect("get should succeed").as_deref(),
            Some("two")
        );
        assert_eq!(store.entry_count().expect("count should succeed"), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _temp_dir) = create_test_store();
        store.set_raw("k", "v".to_string()).await.expect("set should succeed");
        store.remove_raw("k").await.expect("remove should succeed");
        assert!(store.get_raw("k").await.expect("get should succeed").is_none());

        // Removing a missing key is not an error.
        store.remove_raw("k").await.expect("remove should succeed");
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");

        let store = LmdbStore::open(temp_dir.path(), 10).expect("open should succeed");
        store
            .set_raw("k", "persisted".to_string())
            .await
            .expect("set should succeed");
        store.close();

        let reopened = LmdbStore::open(temp_dir.path(), 10).expect("reopen should succeed");
        assert_eq!(
            reopened.get_raw("k").await.expect("get should succeed").as_deref(),
            Some("persisted")
        );
    }

    #[tokio::test]
    async fn test_keys_over_lmdb_limit() {
        let (store, _temp_dir) = create_test_store();
        let long_a = format!("lectern-cache:{}:a", "c".repeat(600));
        let long_b = format!("lectern-cache:{}:b", "c".repeat(600));

        store.set_raw(&long_a, "first".to_string()).await.expect("set should succeed");
        store.set_raw(&long_b, "second".to_string()).await.expect("set should succeed");

        assert_eq!(
            store.get_raw(&long_a).await.expect("get should succeed").as_deref(),
            Some("first")
        );
        assert_eq!(
            store.get_raw(&long_b).await.expect("get should succeed").as_deref(),
            Some("second")
        );
        assert_eq!(store.entry_count().expect("count should succeed"), 2);

        store.remove_raw(&long_a).await.expect("remove should succeed");
        assert!(store.get_raw(&long_a).await.expect("get should succeed").is_none());
    }

    #[test]
    fn test_storage_key_fits_lmdb() {
        let short = "lectern-cache:messages:abc";
        assert_eq!(storage_key(short), short);

        let at_limit = "k".repeat(MAX_KEY_BYTES);
        assert_eq!(storage_key(&at_limit), at_limit.as_str());

        let long = "k".repeat(MAX_KEY_BYTES + 1);
        let mapped = storage_key(&long);
        assert!(mapped.starts_with("sha256:"));
        assert_eq!(mapped.len(), 71);
    }

    #[tokio::test]
    async fn test_map_full_is_quota_exceeded() {
        let (store, _temp_dir) = create_test_store();
        store.set_raw("small", "ok".to_string()).await.expect("set should succeed");

        // Larger than the whole 10 MB map.
        let huge = "x".repeat(12 * 1024 * 1024);
        let err = store.set_raw("huge", huge).await.unwrap_err();
        assert!(matches!(err, CacheError::QuotaExceeded { .. }));

        assert_eq!(
            store.get_raw("small").await.expect("get should succeed").as_deref(),
            Some("ok")
        );
        assert!(store.get_raw("huge").await.expect("get should succeed").is_none());
    }
}
