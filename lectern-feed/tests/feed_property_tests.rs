//! Property-Based Tests for the Cached Feed
//!
//! **Property 1: Threads Reflect the Remote Database**
//!
//! For any set of stored messages, the threads built through the cache
//! SHALL contain every root newest first, each with exactly its own
//! replies oldest first, and no reply whose root is missing.
//!
//! **Property 2: Writes Are Visible Before the TTL**
//!
//! After a post, like or delete, every subscription of the affected query
//! SHALL show the change without waiting for the entry to expire.

use std::sync::Arc;

use lectern_core::{CacheSettings, FeedSettings, LecternConfig, QueryDescriptor, StoreConfig};
use lectern_feed::{descriptors, open_feed, Author, FeedService};
use lectern_storage::{ConfiguredStore, FetchState, MemoryStore, QueryCache};
use lectern_test_utils::{fixtures, generators, MemoryDatabase, Record};
use proptest::prelude::*;
use tempfile::TempDir;
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn seeded_feed() -> (FeedService<MemoryStore, MemoryDatabase>, Arc<MemoryDatabase>) {
    let db = Arc::new(fixtures::seeded_database());
    let cache = fixtures::cache_over(Arc::clone(&db));
    (
        FeedService::new(cache, Arc::clone(&db), FeedSettings::default()),
        db,
    )
}

fn database_with(roots: &[Record], replies: &[Record]) -> Arc<MemoryDatabase> {
    let db = MemoryDatabase::new();
    for record in roots.iter().chain(replies) {
        db.insert(descriptors::MESSAGES, record.clone());
    }
    Arc::new(db)
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property 1: every root appears once, with only its own replies.
    #[test]
    fn prop_threads_match_database((roots, replies) in generators::arb_feed(6, 12)) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let db = database_with(&roots, &replies);
            let feed = FeedService::new(
                fixtures::cache_over(Arc::clone(&db)),
                Arc::clone(&db),
                FeedSettings::default(),
            );

            let threads = feed.threads().await.map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(threads.len(), roots.len());
            prop_assert!(threads
                .windows(2)
                .all(|pair| pair[0].root.created_at >= pair[1].root.created_at));

            let shown: usize = threads.iter().map(|t| t.reply_count()).sum();
            let attached = replies
                .iter()
                .filter(|r| r.get_str("replyTo").is_some_and(|p| p.starts_with("root-")))
                .count();
            prop_assert_eq!(shown, attached);

            for thread in &threads {
                for reply in &thread.replies {
                    prop_assert_eq!(reply.reply_to.as_deref(), Some(thread.root.id.as_str()));
                }
                prop_assert!(thread
                    .replies
                    .windows(2)
                    .all(|pair| pair[0].created_at <= pair[1].created_at));
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Property 1: a second read inside the TTL never reaches the database.
    #[test]
    fn prop_repeat_reads_are_served_from_cache((roots, replies) in generators::arb_feed(4, 6)) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let db = database_with(&roots, &replies);
            let feed = FeedService::new(
                fixtures::cache_over(Arc::clone(&db)),
                Arc::clone(&db),
                FeedSettings::default(),
            );

            let first = feed.threads().await.map_err(|e| TestCaseError::fail(e.to_string()))?;
            let second = feed.threads().await.map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(first, second);
            prop_assert_eq!(db.execute_calls(), 2);
            Ok::<(), TestCaseError>(())
        })?;
    }
}

// ============================================================================
// END-TO-END SCENARIOS
// ============================================================================

/// Property 2: a posted message reaches a subscription already showing the
/// feed, and becomes its first record.
#[tokio::test]
async fn test_post_reaches_live_subscription() {
    let (feed, db) = seeded_feed();
    let mut sub = feed.cache().subscribe(descriptors::main_messages()).await;
    let before = sub.settled().await;
    assert_eq!(before.records.len(), 3);
    assert_eq!(sub.state(), FetchState::Ready);

    let id = feed
        .post_message(&Author::new("u1"), "Parent meetings next week", None)
        .await
        .unwrap();

    let after = sub.settled().await;
    assert_eq!(after.records.len(), 4);
    assert_eq!(after.records[0].id, id);
    assert_eq!(db.execute_calls(), 2);
}

/// Property 2: a failed refresh after a write leaves the subscription on its
/// last records and reports the error.
#[tokio::test]
async fn test_failed_refresh_keeps_last_records() {
    let (feed, db) = seeded_feed();
    let mut sub = feed.cache().subscribe(descriptors::main_messages()).await;
    sub.settled().await;

    db.fail_next(lectern_core::RemoteQueryError::unavailable("offline"));
    assert!(sub.refresh().await.is_err());

    let current = sub.settled().await;
    assert_eq!(current.records.len(), 3);
    assert!(matches!(sub.state(), FetchState::Failed(ref e) if e.code == "unavailable"));
}

/// Mention suggestions and posting with a mention use the same cached users.
#[tokio::test]
async fn test_mention_then_post() {
    let (feed, db) = seeded_feed();
    let typed = "see you there @an";
    let suggestions = feed.mention_suggestions(typed).await.unwrap();
    assert_eq!(suggestions.len(), 1);

    let (text, _) = lectern_feed::apply_mention(typed, typed.len(), &suggestions[0].display_name);
    assert_eq!(text, "see you there @Ana Souza ");
    feed.post_message(&Author::new("u2"), &text, Some("m3")).await.unwrap();

    let threads = feed.threads().await.unwrap();
    let m3 = threads.iter().find(|t| t.root.id == "m3").unwrap();
    assert_eq!(m3.reply_count(), 2);
    assert_eq!(m3.replies[1].content, text);

    feed.mention_suggestions("@bru").await.unwrap();
    // users, the reply refresh, then main; replies were fresh from the refresh
    assert_eq!(db.execute_calls(), 3);
}

#[tokio::test]
async fn test_open_feed_with_memory_store() {
    let config = LecternConfig::from_toml_str(
        r#"
        [cache]
        ttl_secs = 60
        key_prefix = "staff-room"

        [feed]
        max_message_chars = 10
        "#,
    )
    .unwrap();
    let db = Arc::new(fixtures::seeded_database());
    let feed = open_feed(&config, Arc::clone(&db)).unwrap();

    assert_eq!(feed.threads().await.unwrap().len(), 3);
    let key = feed.cache().key_for(&descriptors::main_messages());
    assert!(key.as_str().starts_with("staff-room"));
    assert!(feed
        .post_message(&Author::new("u1"), "far too long for this", None)
        .await
        .is_err());
}

#[tokio::test]
async fn test_open_feed_with_lmdb_store() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = LecternConfig::default();
    config.cache.store = StoreConfig::Lmdb {
        path: temp_dir.path().join("cache"),
        map_size_mb: 8,
    };
    let db = Arc::new(fixtures::seeded_database());
    let feed = open_feed(&config, Arc::clone(&db)).unwrap();

    feed.threads().await.unwrap();
    feed.threads().await.unwrap();
    assert_eq!(db.execute_calls(), 2);
    assert!(feed.cache().peek(&descriptors::replies()).await.is_some());
}

#[tokio::test]
async fn test_lmdb_entries_survive_restart() {
    let temp_dir = TempDir::new().unwrap();
    let store_config = StoreConfig::Lmdb {
        path: temp_dir.path().join("cache"),
        map_size_mb: 8,
    };

    let first_db = Arc::new(fixtures::seeded_database());
    let cache = QueryCache::new(
        ConfiguredStore::open(&store_config).unwrap(),
        Arc::clone(&first_db),
        CacheSettings::default(),
    );
    let written = cache.fetch(&descriptors::main_messages()).await.unwrap();
    assert!(written.was_cache_miss());
    assert_eq!(first_db.execute_calls(), 1);
    cache.into_backend().expect("no other cache handles").close();

    let second_db = Arc::new(fixtures::seeded_database());
    let cache = QueryCache::new(
        ConfiguredStore::open(&store_config).unwrap(),
        Arc::clone(&second_db),
        CacheSettings::default(),
    );
    let read = cache.fetch(&descriptors::main_messages()).await.unwrap();
    assert!(read.was_cache_hit());
    assert_eq!(read.value(), written.value());
    assert_eq!(second_db.execute_calls(), 0);
}

#[tokio::test]
async fn test_lmdb_store_caches_long_collection_names() {
    let temp_dir = TempDir::new().unwrap();
    let store = ConfiguredStore::open(&StoreConfig::Lmdb {
        path: temp_dir.path().join("cache"),
        map_size_mb: 8,
    })
    .unwrap();
    let db = Arc::new(MemoryDatabase::new());
    let cache = QueryCache::new(store, Arc::clone(&db), CacheSettings::default());
    let descriptor = QueryDescriptor::new("c".repeat(500));
    assert!(cache.key_for(&descriptor).as_str().len() > 511);

    cache.fetch(&descriptor).await.unwrap();
    let second = cache.fetch(&descriptor).await.unwrap();
    assert!(second.was_cache_hit());
    assert_eq!(db.execute_calls(), 1);
    assert_eq!(cache.stats().write_errors, 0);
}

#[tokio::test]
async fn test_open_feed_rejects_invalid_config() {
    let mut config = LecternConfig::default();
    config.cache.ttl_secs = 0;
    let db = Arc::new(MemoryDatabase::new());
    assert!(open_feed(&config, db).is_err());
}
