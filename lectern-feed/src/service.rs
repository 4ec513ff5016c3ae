//! Feed operations over the query cache.
//!
//! Reads go through [`QueryCache`]; every write goes straight to the remote
//! database and is followed by a `refresh` of the descriptor it affects, so
//! the author sees the change without waiting for the TTL.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::try_join;
use lectern_core::{
    FeedSettings, Fields, LecternResult, QueryDescriptor, RemoteQueryError, ValidationError,
};
use lectern_storage::{DocumentWriter, KeyValueStore, QueryCache, QueryExecutor};
use serde_json::{json, Value};

use crate::descriptors::{self, MESSAGES, USERS};
use crate::mentions;
use crate::model::{decode_messages, Author, Message, UserSummary, DEFAULT_DISPLAY_NAME};
use crate::thread::{build_threads, Thread};

/// Message feed backed by a cached remote database.
///
/// # Type Parameters
///
/// - `S`: The persistence medium behind the cache
/// - `D`: The remote database, queried through the cache and written directly
pub struct FeedService<S, D>
where
    S: KeyValueStore,
    D: QueryExecutor + DocumentWriter,
{
    cache: QueryCache<S, D>,
    db: Arc<D>,
    settings: FeedSettings,
}

impl<S, D> FeedService<S, D>
where
    S: KeyValueStore + 'static,
    D: QueryExecutor + DocumentWriter + 'static,
{
    /// Create a feed over `cache`. `db` must be the database the cache
    /// queries.
    pub fn new(cache: QueryCache<S, D>, db: Arc<D>, settings: FeedSettings) -> Self {
        Self {
            cache,
            db,
            settings,
        }
    }

    pub fn cache(&self) -> &QueryCache<S, D> {
        &self.cache
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    /// Top-level messages with their replies.
    ///
    /// The two underlying queries are cached independently.
    pub async fn threads(&self) -> Result<Vec<Thread>, RemoteQueryError> {
        let main = descriptors::main_messages();
        let replies = descriptors::replies();
        let (main, replies) = try_join(self.cache.fetch(&main), self.cache.fetch(&replies)).await?;
        Ok(build_threads(
            decode_messages(main.value()),
            decode_messages(replies.value()),
        ))
    }

    /// Post a message, or a reply when `reply_to` names a top-level message.
    ///
    /// Returns the new message's id after the affected query has been
    /// refreshed.
    ///
    /// # Errors
    ///
    /// - `Validation` for blank or overlong content, or an unknown parent
    /// - `Query` when the write or the follow-up refresh fails
    pub async fn post_message(
        &self,
        author: &Author,
        content: &str,
        reply_to: Option<&str>,
    ) -> LecternResult<String> {
        self.validate_content(content)?;

        if let Some(parent) = reply_to {
            let parent_doc = self.db.get(MESSAGES, parent).await?;
            let is_root = parent_doc
                .as_ref()
                .is_some_and(|doc| doc.get("replyTo").map_or(true, Value::is_null));
            if !is_root {
                return Err(ValidationError::InvalidValue {
                    field: "replyTo".to_string(),
                    reason: format!("{parent} is not a top-level message"),
                }
                .into());
            }
        }

        let display_name = self.resolve_display_name(author).await?;

        let mut fields = Fields::new();
        fields.insert("content".to_string(), json!(content));
        fields.insert("createdAt".to_string(), json!(Utc::now().timestamp_millis()));
        fields.insert("userId".to_string(), json!(author.uid));
        fields.insert("userDisplayName".to_string(), json!(display_name));
        fields.insert("userPhotoURL".to_string(), json!(author.photo_url));
        fields.insert("likes".to_string(), json!([]));
        fields.insert("replyTo".to_string(), json!(reply_to));

        let id = self.db.add(MESSAGES, fields).await?;
        tracing::info!(id = %id, user_id = %author.uid, reply = reply_to.is_some(), "message posted");

        self.cache.refresh(&descriptor_for(reply_to.is_some())).await?;
        Ok(id)
    }

    /// Like or unlike a message for `uid`. Returns whether it is now liked.
    pub async fn toggle_like(&self, message_id: &str, uid: &str) -> LecternResult<bool> {
        let record = self
            .db
            .get(MESSAGES, message_id)
            .await?
            .ok_or_else(|| RemoteQueryError::not_found(format!("{MESSAGES}/{message_id}")))?;
        let message = Message::try_from(&record)?;

        let liked = !message.is_liked_by(uid);
        let likes: Vec<String> = if liked {
            let mut likes = message.likes.clone();
            likes.push(uid.to_string());
            likes
        } else {
            message.likes.iter().filter(|l| *l != uid).cloned().collect()
        };

        let mut patch = Fields::new();
        patch.insert("likes".to_string(), json!(likes));
        self.db.update(MESSAGES, message_id, patch).await?;
        tracing::debug!(id = %message_id, uid = %uid, liked, "like toggled");

        self.cache.refresh(&descriptor_for(message.is_reply())).await?;
        Ok(liked)
    }

    /// Delete a message. Deleting a missing message does nothing.
    ///
    /// Replies to a deleted root stay stored and stop being shown.
    pub async fn delete_message(&self, message_id: &str) -> LecternResult<()> {
        let Some(record) = self.db.get(MESSAGES, message_id).await? else {
            tracing::debug!(id = %message_id, "message already gone");
            return Ok(());
        };
        let is_reply = record.get("replyTo").is_some_and(|v| !v.is_null());

        self.db.delete(MESSAGES, message_id).await?;
        tracing::info!(id = %message_id, "message deleted");

        self.cache.refresh(&descriptor_for(is_reply)).await?;
        Ok(())
    }

    /// Users to offer for the mention being typed at the end of `text`.
    ///
    /// The candidate list is one cached query; no query runs when no
    /// mention is being typed.
    pub async fn mention_suggestions(&self, text: &str) -> Result<Vec<UserSummary>, RemoteQueryError> {
        if mentions::active_mention(text).is_none() {
            return Ok(Vec::new());
        }
        let read = self
            .cache
            .fetch(&descriptors::mention_users(self.settings.mention_user_limit))
            .await?;
        let users: Vec<UserSummary> = read.value().iter().map(UserSummary::from).collect();
        Ok(mentions::suggest(&users, text, self.settings.max_suggestions)
            .into_iter()
            .cloned()
            .collect())
    }

    fn validate_content(&self, content: &str) -> Result<(), ValidationError> {
        if content.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "content".to_string(),
            });
        }
        let got = content.chars().count();
        if got > self.settings.max_message_chars {
            return Err(ValidationError::TooLong {
                field: "content".to_string(),
                max: self.settings.max_message_chars,
                got,
            });
        }
        Ok(())
    }

    /// The profile's display name wins over the session's.
    async fn resolve_display_name(&self, author: &Author) -> Result<String, RemoteQueryError> {
        let profile = self.db.get(USERS, &author.uid).await?;
        let from_profile = profile
            .as_ref()
            .and_then(|doc| doc.get_str("displayName"))
            .filter(|name| !name.is_empty())
            .map(str::to_owned);
        Ok(from_profile
            .or_else(|| author.display_name.clone().filter(|name| !name.is_empty()))
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string()))
    }
}

fn descriptor_for(is_reply: bool) -> QueryDescriptor {
    if is_reply {
        descriptors::replies()
    } else {
        descriptors::main_messages()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_core::LecternError;
    use lectern_test_utils::{assertions, fixtures, MemoryDatabase};

    fn service() -> (FeedService<lectern_storage::MemoryStore, MemoryDatabase>, Arc<MemoryDatabase>) {
        let db = Arc::new(fixtures::seeded_database());
        let cache = fixtures::cache_over(Arc::clone(&db));
        (
            FeedService::new(cache, Arc::clone(&db), FeedSettings::default()),
            db,
        )
    }

    #[tokio::test]
    async fn test_threads_are_cached() {
        let (feed, db) = service();
        let threads = feed.threads().await.unwrap();

        let roots: Vec<&str> = threads.iter().map(|t| t.root.id.as_str()).collect();
        assert_eq!(roots, ["m3", "m2", "m1"]);
        let m1: Vec<&str> = threads[2].replies.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(m1, ["r2", "r1"]);
        assert_eq!(db.execute_calls(), 2);

        feed.threads().await.unwrap();
        assert_eq!(db.execute_calls(), 2);
    }

    #[tokio::test]
    async fn test_post_message_shows_up_first() {
        let (feed, db) = service();
        feed.threads().await.unwrap();

        let author = Author::new("u1").with_display_name("Session Name");
        let id = feed.post_message(&author, "Staff meeting moved", None).await.unwrap();
        assert_eq!(db.execute_calls(), 3);

        let threads = feed.threads().await.unwrap();
        assert_eq!(threads[0].root.id, id);
        assert_eq!(threads[0].root.user_display_name, "Ana Souza");
        assert_eq!(db.execute_calls(), 3);
    }

    #[tokio::test]
    async fn test_post_reply_refreshes_replies_only() {
        let (feed, db) = service();
        feed.threads().await.unwrap();

        let id = feed
            .post_message(&Author::new("u2"), "Count me in", Some("m2"))
            .await
            .unwrap();
        let entry = feed.cache().peek(&descriptors::replies()).await.unwrap();
        assert!(entry.payload().iter().any(|r| r.id == id));
        assert_eq!(db.execute_calls(), 3);

        let threads = feed.threads().await.unwrap();
        assert_eq!(threads[1].root.id, "m2");
        assert_eq!(threads[1].replies[0].id, id);
    }

    #[tokio::test]
    async fn test_display_name_fallbacks() {
        let (feed, db) = service();
        let from_session = Author::new("u2").with_display_name("Bruno S.");
        feed.post_message(&from_session, "hi", None).await.unwrap();
        feed.post_message(&Author::new("nobody"), "hi", None).await.unwrap();

        let names: Vec<String> = db
            .records(MESSAGES)
            .iter()
            .filter(|r| r.get_str("content") == Some("hi"))
            .filter_map(|r| r.get_str("userDisplayName").map(str::to_owned))
            .collect();
        assert!(names.contains(&"Bruno S.".to_string()));
        assert!(names.contains(&DEFAULT_DISPLAY_NAME.to_string()));
    }

    #[tokio::test]
    async fn test_post_validation() {
        let (feed, db) = service();
        let author = Author::new("u1");

        let blank = feed.post_message(&author, "   \n", None).await;
        assert!(matches!(
            blank,
            Err(LecternError::Validation(ValidationError::RequiredFieldMissing { .. }))
        ));

        let long = "a".repeat(401);
        let too_long = feed.post_message(&author, &long, None).await;
        assert!(matches!(
            too_long,
            Err(LecternError::Validation(ValidationError::TooLong { max: 400, got: 401, .. }))
        ));
        assert!(feed.post_message(&author, &"a".repeat(400), None).await.is_ok());

        let orphan = feed.post_message(&author, "hello?", Some("nope")).await;
        assert!(matches!(orphan, Err(LecternError::Validation(_))));
        let nested = feed.post_message(&author, "deeper", Some("r1")).await;
        assert!(matches!(nested, Err(LecternError::Validation(_))));

        assert_eq!(db.write_calls(), 1);
    }

    #[tokio::test]
    async fn test_toggle_like() {
        let (feed, _db) = service();
        assert!(feed.toggle_like("m2", "u1").await.unwrap());

        let threads = feed.threads().await.unwrap();
        assert!(threads[1].root.is_liked_by("u1"));

        assert!(!feed.toggle_like("m2", "u1").await.unwrap());
        let threads = feed.threads().await.unwrap();
        assert_eq!(threads[1].root.like_count(), 0);

        let missing = feed.toggle_like("ghost", "u1").await;
        assert!(matches!(missing, Err(LecternError::Query(ref e)) if e.code == "not-found"));
    }

    #[tokio::test]
    async fn test_delete_root_hides_its_replies() {
        let (feed, _db) = service();
        feed.threads().await.unwrap();

        feed.delete_message("m1").await.unwrap();
        let threads = feed.threads().await.unwrap();
        let roots: Vec<&str> = threads.iter().map(|t| t.root.id.as_str()).collect();
        assert_eq!(roots, ["m3", "m2"]);

        feed.delete_message("m1").await.unwrap();
    }

    #[tokio::test]
    async fn test_mention_suggestions_use_one_cached_query() {
        let (feed, db) = service();
        assert!(feed.mention_suggestions("no mention here").await.unwrap().is_empty());
        assert_eq!(db.execute_calls(), 0);

        let found = feed.mention_suggestions("thanks @bru").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].display_name, "Bruno");

        let everyone = feed.mention_suggestions("@").await.unwrap();
        assert_eq!(everyone.len(), 3);
        assert_eq!(db.execute_calls(), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_surfaces() {
        let (feed, db) = service();
        db.fail_always(RemoteQueryError::permission_denied("signed out"));
        let result = feed.threads().await;
        assertions::assert_remote_code(&result.map(|t| t.len()), "permission-denied");
    }
}
