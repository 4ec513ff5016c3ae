//! Lectern Test Utilities
//!
//! Centralized test infrastructure for the Lectern workspace:
//! - An in-memory remote document database with failure injection
//! - Proptest generators for feed documents
//! - Test fixtures for common scenarios
//! - Custom assertions for Lectern-specific validation

// Re-export core types for convenience
pub use lectern_core::{
    CacheSettings, Constraint, FieldValue, Fields, FilterOperator, QueryDescriptor, Record,
    RemoteQueryError, Sentinel, SortDirection,
};
pub use lectern_storage::{DocumentWriter, MemoryStore, QueryCache, QueryExecutor};

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OwnedRwLockWriteGuard;
use uuid::Uuid;

// ============================================================================
// IN-MEMORY REMOTE DATABASE
// ============================================================================

#[derive(Debug, Clone, Default)]
enum FailurePlan {
    #[default]
    None,
    Next(RemoteQueryError),
    Always(RemoteQueryError),
}

/// Remote document database held in memory.
///
/// Queries follow the remote store's rules closely enough for cache tests:
/// - missing fields never match a filter,
/// - `!=` and `not-in` exclude nulls,
/// - range filters only compare values of the same type,
/// - documents missing a sort field are left out of ordered results,
/// - an inequality filter requires the first sort key to use the same field.
///
/// Every `execute` call is counted, can be made to fail, and can be held
/// back with [`MemoryDatabase::pause`].
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    collections: RwLock<HashMap<String, BTreeMap<String, Fields>>>,
    execute_calls: AtomicUsize,
    write_calls: AtomicUsize,
    failures: Mutex<FailurePlan>,
    gate: Arc<tokio::sync::RwLock<()>>,
}

/// Holds queries back until dropped.
pub struct QueryPause {
    _guard: OwnedRwLockWriteGuard<()>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `record` directly, bypassing write accounting.
    pub fn insert(&self, collection: &str, record: Record) {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(record.id, record.fields);
    }

    /// All documents of `collection` in identifier order.
    pub fn records(&self, collection: &str) -> Vec<Record> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Record::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of `execute` calls so far, including failed and paused ones.
    pub fn execute_calls(&self) -> usize {
        self.execute_calls.load(AtomicOrdering::SeqCst)
    }

    /// Number of document writes so far.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(AtomicOrdering::SeqCst)
    }

    /// Fail the next query with `err`.
    pub fn fail_next(&self, err: RemoteQueryError) {
        *self.lock_failures() = FailurePlan::Next(err);
    }

    /// Fail every query with `err` until [`MemoryDatabase::recover`].
    pub fn fail_always(&self, err: RemoteQueryError) {
        *self.lock_failures() = FailurePlan::Always(err);
    }

    pub fn recover(&self) {
        *self.lock_failures() = FailurePlan::None;
    }

    /// Hold every query at its start until the returned guard is dropped.
    ///
    /// Held queries are already counted in [`MemoryDatabase::execute_calls`].
    pub async fn pause(&self) -> QueryPause {
        QueryPause {
            _guard: Arc::clone(&self.gate).write_owned().await,
        }
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, FailurePlan> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_failure(&self) -> Option<RemoteQueryError> {
        let mut plan = self.lock_failures();
        match std::mem::take(&mut *plan) {
            FailurePlan::None => None,
            FailurePlan::Next(err) => Some(err),
            FailurePlan::Always(err) => {
                *plan = FailurePlan::Always(err.clone());
                Some(err)
            }
        }
    }

    fn run_query(&self, collection: &str, constraints: &[Constraint]) -> Vec<Record> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        let Some(docs) = collections.get(collection) else {
            return Vec::new();
        };

        let sort_keys: Vec<(&str, SortDirection)> = constraints
            .iter()
            .filter_map(|c| match c {
                Constraint::OrderBy { field, direction } => Some((field.as_str(), *direction)),
                _ => None,
            })
            .collect();

        let mut matched: Vec<(&String, &Fields)> = docs
            .iter()
            .filter(|(_, fields)| {
                constraints.iter().all(|c| match c {
                    Constraint::Where { field, op, value } => matches_filter(fields, field, *op, value),
                    _ => true,
                })
            })
            .filter(|(_, fields)| sort_keys.iter().all(|(field, _)| fields.contains_key(*field)))
            .collect();

        matched.sort_by(|(_, a), (_, b)| {
            for (field, direction) in &sort_keys {
                let ordering = match (a.get(*field), b.get(*field)) {
                    (Some(x), Some(y)) => compare_values(x, y),
                    _ => Ordering::Equal,
                };
                let ordering = match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        let limit = constraints.iter().rev().find_map(|c| match c {
            Constraint::Limit(n) => Some(*n),
            _ => None,
        });

        matched
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(id, fields)| Record::new(id.clone(), fields.clone()))
            .collect()
    }
}

/// Reject query shapes the remote store refuses to run.
fn check_query_shape(constraints: &[Constraint]) -> Result<(), RemoteQueryError> {
    let mut inequality_field: Option<&str> = None;
    for constraint in constraints {
        if let Constraint::Where { field, op, .. } = constraint {
            if !op.is_inequality() {
                continue;
            }
            match inequality_field {
                Some(existing) if existing != field.as_str() => {
                    return Err(RemoteQueryError::invalid_argument(format!(
                        "inequality filters on different fields: {existing} and {field}"
                    )));
                }
                _ => inequality_field = Some(field.as_str()),
            }
        }
    }

    let first_sort = constraints.iter().find_map(|c| match c {
        Constraint::OrderBy { field, .. } => Some(field.as_str()),
        _ => None,
    });
    if let (Some(inequality), Some(first)) = (inequality_field, first_sort) {
        if inequality != first {
            return Err(RemoteQueryError::failed_precondition(format!(
                "inequality filter on {inequality} requires the first orderBy on {inequality}, not {first}"
            )));
        }
    }
    Ok(())
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order across JSON values: by type first, then by value.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ordering = compare_values(left, right);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => Ordering::Equal,
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(_), Value::Object(_)) => a == b,
        _ => compare_values(a, b) == Ordering::Equal,
    }
}

fn operand(value: &FieldValue) -> Option<Value> {
    match value {
        FieldValue::Json(value) => Some(value.clone()),
        FieldValue::Timestamp(ts) => Some(Value::from(ts.timestamp_millis())),
        FieldValue::Sentinel(_) => None,
    }
}

fn matches_filter(fields: &Fields, field: &str, op: FilterOperator, value: &FieldValue) -> bool {
    let actual = fields.get(field);

    if let FieldValue::Sentinel(sentinel) = value {
        return match (sentinel, op) {
            (Sentinel::NotNull, FilterOperator::Ne) => actual.is_some_and(|v| !v.is_null()),
            _ => false,
        };
    }

    let (Some(actual), Some(expected)) = (actual, operand(value)) else {
        return false;
    };

    let comparable = type_rank(actual) == type_rank(&expected);
    match op {
        FilterOperator::Eq => same_value(actual, &expected),
        FilterOperator::Ne => !actual.is_null() && !same_value(actual, &expected),
        FilterOperator::Gt => comparable && compare_values(actual, &expected) == Ordering::Greater,
        FilterOperator::Lt => comparable && compare_values(actual, &expected) == Ordering::Less,
        FilterOperator::Gte => comparable && compare_values(actual, &expected) != Ordering::Less,
        FilterOperator::Lte => comparable && compare_values(actual, &expected) != Ordering::Greater,
        FilterOperator::In => expected
            .as_array()
            .is_some_and(|options| options.iter().any(|o| same_value(actual, o))),
        FilterOperator::NotIn => {
            !actual.is_null()
                && expected
                    .as_array()
                    .is_some_and(|options| !options.iter().any(|o| same_value(actual, o)))
        }
        FilterOperator::ArrayContains => actual
            .as_array()
            .is_some_and(|items| items.iter().any(|item| same_value(item, &expected))),
        FilterOperator::ArrayContainsAny => match (actual.as_array(), expected.as_array()) {
            (Some(items), Some(options)) => items
                .iter()
                .any(|item| options.iter().any(|o| same_value(item, o))),
            _ => false,
        },
    }
}

#[async_trait]
impl QueryExecutor for MemoryDatabase {
    async fn execute(
        &self,
        collection: &str,
        constraints: &[Constraint],
    ) -> Result<Vec<Record>, RemoteQueryError> {
        self.execute_calls.fetch_add(1, AtomicOrdering::SeqCst);
        let _open = self.gate.read().await;

        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        check_query_shape(constraints)?;
        Ok(self.run_query(collection, constraints))
    }
}

#[async_trait]
impl DocumentWriter for MemoryDatabase {
    async fn add(&self, collection: &str, fields: Fields) -> Result<String, RemoteQueryError> {
        self.write_calls.fetch_add(1, AtomicOrdering::SeqCst);
        let id = Uuid::now_v7().simple().to_string();
        self.insert(collection, Record::new(id.clone(), fields));
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), RemoteQueryError> {
        self.write_calls.fetch_add(1, AtomicOrdering::SeqCst);
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| RemoteQueryError::not_found(format!("{collection}/{id}")))?;
        doc.extend(fields);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>, RemoteQueryError> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Record::new(id, fields.clone())))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteQueryError> {
        self.write_calls.fetch_add(1, AtomicOrdering::SeqCst);
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(docs) = collections.get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating feed documents.

    use super::*;
    use proptest::prelude::*;

    /// Generate a document identifier.
    pub fn arb_record_id() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9]{1,20}"
    }

    /// Generate a creation time in unix milliseconds (2020-2030).
    pub fn arb_created_at() -> impl Strategy<Value = i64> {
        1_577_836_800_000i64..1_893_456_000_000i64
    }

    /// Generate a display name as users type them.
    pub fn arb_display_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9_ ]{0,15}"
    }

    /// Generate a user document with a display name.
    pub fn arb_user() -> impl Strategy<Value = Record> {
        (arb_record_id(), arb_display_name())
            .prop_map(|(uid, name)| fixtures::user(&uid, Some(&name), None))
    }

    /// Generate a feed as the two feed queries return it.
    ///
    /// Roots come newest first. Replies are ordered by parent id then by
    /// creation time; some point at parents that do not exist.
    pub fn arb_feed(
        max_roots: usize,
        max_replies: usize,
    ) -> impl Strategy<Value = (Vec<Record>, Vec<Record>)> {
        (
            prop::collection::vec(arb_created_at(), 0..=max_roots),
            prop::collection::vec(
                (any::<prop::sample::Index>(), any::<bool>(), arb_created_at()),
                0..=max_replies,
            ),
        )
            .prop_map(|(root_times, reply_specs)| {
                let mut roots: Vec<Record> = root_times
                    .iter()
                    .enumerate()
                    .map(|(i, at)| fixtures::message(&format!("root-{i}"), "root", *at, "u1"))
                    .collect();
                roots.sort_by_key(|r| std::cmp::Reverse(r.get_i64("createdAt")));

                let mut replies: Vec<Record> = reply_specs
                    .iter()
                    .enumerate()
                    .map(|(i, (parent, orphan, at))| {
                        let parent_id = if *orphan || root_times.is_empty() {
                            format!("missing-{i}")
                        } else {
                            format!("root-{}", parent.index(root_times.len()))
                        };
                        fixtures::reply(&format!("reply-{i}"), &parent_id, "reply", *at, "u2")
                    })
                    .collect();
                replies.sort_by(|a, b| {
                    (a.get_str("replyTo"), a.get_i64("createdAt"))
                        .cmp(&(b.get_str("replyTo"), b.get_i64("createdAt")))
                });

                (roots, replies)
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use serde_json::json;

    /// A top-level message document.
    pub fn message(id: &str, content: &str, created_at: i64, user_id: &str) -> Record {
        Record::empty(id)
            .with_field("content", json!(content))
            .with_field("createdAt", json!(created_at))
            .with_field("userId", json!(user_id))
            .with_field("userDisplayName", json!(format!("User {user_id}")))
            .with_field("userPhotoURL", Value::Null)
            .with_field("likes", json!([]))
            .with_field("replyTo", Value::Null)
    }

    /// A reply to `parent`.
    pub fn reply(id: &str, parent: &str, content: &str, created_at: i64, user_id: &str) -> Record {
        message(id, content, created_at, user_id).with_field("replyTo", json!(parent))
    }

    /// A user document. Either name may be absent.
    pub fn user(uid: &str, display_name: Option<&str>, name: Option<&str>) -> Record {
        let mut record = Record::empty(uid).with_field("uid", json!(uid));
        if let Some(display_name) = display_name {
            record = record.with_field("displayName", json!(display_name));
        }
        if let Some(name) = name {
            record = record.with_field("name", json!(name));
        }
        record
    }

    /// A small feed: three roots, replies to two of them, one orphan reply
    /// and three users with different naming.
    pub fn seeded_database() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.insert("messages", message("m1", "Welcome to the staff room", 1_000, "u1"));
        db.insert("messages", message("m2", "Grading rubrics anyone?", 2_000, "u2"));
        db.insert("messages", message("m3", "Field trip on Friday", 3_000, "u1"));
        db.insert("messages", reply("r1", "m1", "Thanks!", 1_500, "u2"));
        db.insert("messages", reply("r2", "m1", "Glad to be here", 1_200, "u3"));
        db.insert("messages", reply("r3", "m3", "Which museum?", 3_100, "u2"));
        db.insert("messages", reply("r4", "deleted", "Lost reply", 500, "u3"));

        db.insert("users", user("u1", Some("Ana Souza"), None));
        db.insert("users", user("u2", None, Some("Bruno")));
        db.insert("users", user("u3", None, None));
        db
    }

    /// A cache with default settings over `db`.
    pub fn cache_over(db: Arc<MemoryDatabase>) -> QueryCache<MemoryStore, MemoryDatabase> {
        QueryCache::new(MemoryStore::new(), db, CacheSettings::default())
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertions for Lectern-specific validation.

    use super::*;

    /// Assert that a result is a remote failure with `code`.
    pub fn assert_remote_code<T: std::fmt::Debug>(result: &Result<T, RemoteQueryError>, code: &str) {
        match result {
            Err(err) => assert_eq!(err.code, code, "unexpected remote error: {err}"),
            Ok(value) => panic!("Expected remote error {code}, got Ok({value:?})"),
        }
    }

    /// Assert that `records` carry exactly the ids in `expected`, in order.
    pub fn assert_ids(records: &[Record], expected: &[&str]) {
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, expected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn main_feed() -> Vec<Constraint> {
        vec![
            Constraint::eq("replyTo", Value::Null),
            Constraint::order_by("createdAt", SortDirection::Desc),
        ]
    }

    fn replies() -> Vec<Constraint> {
        vec![
            Constraint::filter("replyTo", FilterOperator::Ne, FieldValue::not_null()),
            Constraint::order_by("replyTo", SortDirection::Asc),
            Constraint::order_by("createdAt", SortDirection::Asc),
        ]
    }

    #[tokio::test]
    async fn test_main_feed_newest_first() {
        let db = fixtures::seeded_database();
        let records = db.execute("messages", &main_feed()).await.unwrap();
        assertions::assert_ids(&records, &["m3", "m2", "m1"]);
    }

    #[tokio::test]
    async fn test_replies_by_parent_then_time() {
        let db = fixtures::seeded_database();
        let records = db.execute("messages", &replies()).await.unwrap();
        assertions::assert_ids(&records, &["r4", "r2", "r1", "r3"]);
    }

    #[tokio::test]
    async fn test_limit() {
        let db = fixtures::seeded_database();
        let records = db.execute("users", &[Constraint::limit(2)]).await.unwrap();
        assertions::assert_ids(&records, &["u1", "u2"]);
    }

    #[tokio::test]
    async fn test_missing_sort_field_is_excluded() {
        let db = fixtures::seeded_database();
        let records = db
            .execute("users", &[Constraint::order_by("displayName", SortDirection::Asc)])
            .await
            .unwrap();
        assertions::assert_ids(&records, &["u1"]);
    }

    #[tokio::test]
    async fn test_inequality_must_lead_sort_order() {
        let db = fixtures::seeded_database();
        let constraints = vec![
            Constraint::filter("replyTo", FilterOperator::Ne, FieldValue::not_null()),
            Constraint::order_by("createdAt", SortDirection::Asc),
        ];
        let result = db.execute("messages", &constraints).await;
        assertions::assert_remote_code(&result, "failed-precondition");
    }

    #[tokio::test]
    async fn test_range_and_membership_filters() {
        let db = fixtures::seeded_database();
        let later = db
            .execute(
                "messages",
                &[
                    Constraint::filter("createdAt", FilterOperator::Gte, json!(2_000)),
                    Constraint::order_by("createdAt", SortDirection::Asc),
                ],
            )
            .await
            .unwrap();
        assertions::assert_ids(&later, &["m2", "m3", "r3"]);

        let by_users = db
            .execute(
                "messages",
                &[Constraint::filter("userId", FilterOperator::In, json!(["u3"]))],
            )
            .await
            .unwrap();
        assertions::assert_ids(&by_users, &["r2", "r4"]);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let db = fixtures::seeded_database();
        db.fail_next(RemoteQueryError::permission_denied("nope"));
        assertions::assert_remote_code(&db.execute("messages", &[]).await, "permission-denied");
        assert!(db.execute("messages", &[]).await.is_ok());

        db.fail_always(RemoteQueryError::unavailable("offline"));
        assert!(db.execute("messages", &[]).await.is_err());
        assert!(db.execute("messages", &[]).await.is_err());
        db.recover();
        assert!(db.execute("messages", &[]).await.is_ok());
        assert_eq!(db.execute_calls(), 5);
    }

    #[tokio::test]
    async fn test_writes() {
        let db = MemoryDatabase::new();
        let mut fields = Fields::new();
        fields.insert("content".to_string(), json!("hello"));
        let id = db.add("messages", fields).await.unwrap();

        let mut patch = Fields::new();
        patch.insert("likes".to_string(), json!(["u1"]));
        db.update("messages", &id, patch).await.unwrap();

        let doc = db.get("messages", &id).await.unwrap().unwrap();
        assert_eq!(doc.get_str("content"), Some("hello"));
        assert_eq!(doc.get("likes"), Some(&json!(["u1"])));

        db.delete("messages", &id).await.unwrap();
        assert!(db.get("messages", &id).await.unwrap().is_none());
        assertions::assert_remote_code(
            &db.update("messages", &id, Fields::new()).await,
            "not-found",
        );
        assert_eq!(db.write_calls(), 4);
    }

    #[tokio::test]
    async fn test_pause_holds_queries() {
        let db = Arc::new(fixtures::seeded_database());
        let pause = db.pause().await;

        let query = {
            let db = Arc::clone(&db);
            tokio::spawn(async move { db.execute("messages", &[]).await })
        };
        while db.execute_calls() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::task::yield_now().await;
        assert!(!query.is_finished());

        drop(pause);
        assert_eq!(query.await.unwrap().unwrap().len(), 7);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_feed_roots_are_newest_first((roots, _replies) in generators::arb_feed(10, 10)) {
            for pair in roots.windows(2) {
                prop_assert!(pair[0].get_i64("createdAt") >= pair[1].get_i64("createdAt"));
            }
        }

        #[test]
        fn prop_generated_users_have_names(user in generators::arb_user()) {
            prop_assert!(user.get_str("displayName").is_some());
        }
    }
}
