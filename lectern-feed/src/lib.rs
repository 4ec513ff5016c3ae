//! Lectern Feed - Messages, Threads and Mentions
//!
//! The consumer side of the query cache: a message feed whose top-level
//! messages and replies are two independently cached queries, joined into
//! threads for display, plus `@name` mention support backed by a cached
//! user list.

pub mod descriptors;
pub mod mentions;
pub mod model;
pub mod service;
pub mod telemetry;
pub mod thread;

pub use mentions::{active_mention, apply_mention, segments, suggest, Segment};
pub use model::{decode_messages, Author, Message, UserSummary, DEFAULT_DISPLAY_NAME};
pub use service::FeedService;
pub use telemetry::init_tracing;
pub use thread::{build_threads, Thread};

use std::sync::Arc;

use lectern_core::{CacheError, LecternConfig, LecternResult};
use lectern_storage::{ConfiguredStore, DocumentWriter, QueryCache, QueryExecutor};

/// Build a feed from a loaded configuration.
///
/// Opens the configured store and wires a cache over `db` with the
/// configured TTL and key prefix.
pub fn open_feed<D>(config: &LecternConfig, db: Arc<D>) -> LecternResult<FeedService<ConfiguredStore, D>>
where
    D: QueryExecutor + DocumentWriter + 'static,
{
    config.validate()?;
    let store = ConfiguredStore::open(&config.cache.store).map_err(|e| CacheError::Unavailable {
        reason: e.to_string(),
    })?;
    let cache = QueryCache::new(store, Arc::clone(&db), config.cache.clone());
    Ok(FeedService::new(cache, db, config.feed.clone()))
}
