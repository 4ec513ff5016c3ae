//! Read-through query cache with a fixed time-to-live.
//!
//! This module caches the full result set of collection queries against a
//! remote document store, keyed by a deterministic digest of the query shape.
//!
//! # Design Philosophy
//!
//! The cache is an optimization, never a dependency for correctness:
//!
//! - Storage failures are absorbed at the [`CacheStore`] boundary. A corrupt
//!   or unreadable entry is a miss; a failed write is logged and ignored.
//! - Remote query failures always reach the caller as a [`RemoteQueryError`]
//!   and never resolve to stale or empty data.
//! - A failed refresh leaves the previous entry untouched.
//!
//! # Single Flight
//!
//! Concurrent readers of the same stale key share one remote query. The
//! in-flight query runs on its own task, so it still completes and populates
//! the cache when every waiter has gone away.
//!
//! # Example
//!
//! ```ignore
//! let cache = QueryCache::new(MemoryStore::new(), Arc::new(database), CacheSettings::default());
//!
//! let feed = QueryDescriptor::new("messages").order_by("createdAt", SortDirection::Desc);
//! let read = cache.fetch(&feed).await?;
//! if read.was_cache_hit() {
//!     tracing::debug!(age = ?read.staleness(), "served from cache");
//! }
//!
//! // After posting a message, bypass the TTL.
//! let latest = cache.refresh(&feed).await?;
//! ```
//!
//! [`RemoteQueryError`]: lectern_core::RemoteQueryError

pub mod backend;
pub mod executor;
pub mod freshness;
pub mod key;
pub mod lmdb_backend;
pub mod memory;
pub mod read_through;
pub mod store;
pub mod subscription;
pub mod traits;

pub use backend::ConfiguredStore;
pub use executor::{DocumentWriter, QueryExecutor};
pub use freshness::{is_fresh, CacheRead, FreshnessPolicy};
pub use key::{derive_key, CacheKey};
pub use lmdb_backend::{LmdbStore, LmdbStoreError};
pub use memory::MemoryStore;
pub use read_through::QueryCache;
pub use store::{CacheEntry, CacheStore};
pub use subscription::{FetchResult, FetchState, Subscription};
pub use traits::{CacheStats, KeyValueStore};
