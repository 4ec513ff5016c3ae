//! Live subscriptions to a query descriptor.
//!
//! A [`Subscription`] is what a view holds: it exposes the current
//! [`FetchResult`] for one descriptor and follows the lifecycle
//! `Idle -> Loading -> {Ready, Failed}`, re-entering `Loading` on refresh or
//! when the descriptor or its dependencies change.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use lectern_core::{QueryDescriptor, Record, RemoteQueryError};
use tokio::sync::watch;

use super::executor::QueryExecutor;
use super::key::CacheKey;
use super::read_through::QueryCache;
use super::traits::KeyValueStore;

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchState {
    /// Nothing requested yet.
    Idle,
    /// A fresh-entry check or remote query is pending.
    Loading,
    /// The records are current.
    Ready,
    /// The last remote query failed.
    Failed(RemoteQueryError),
}

/// The value a consumer renders.
///
/// While loading or after a failure, `records` keeps whatever the
/// subscription showed last; the cache never substitutes stale entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResult {
    pub records: Vec<Record>,
    pub is_loading: bool,
    pub error: Option<RemoteQueryError>,
    loaded: bool,
}

impl FetchResult {
    pub(crate) fn ready(records: Vec<Record>) -> Self {
        Self {
            records,
            is_loading: false,
            error: None,
            loaded: true,
        }
    }

    pub(crate) fn loading(records: Vec<Record>) -> Self {
        Self {
            records,
            is_loading: true,
            error: None,
            loaded: false,
        }
    }

    pub(crate) fn begin_loading(&mut self) {
        self.is_loading = true;
        self.error = None;
    }

    pub(crate) fn resolve(&mut self, records: Vec<Record>) {
        self.records = records;
        self.is_loading = false;
        self.error = None;
        self.loaded = true;
    }

    pub(crate) fn fail(&mut self, error: RemoteQueryError) {
        self.is_loading = false;
        self.error = Some(error);
    }

    pub fn state(&self) -> FetchState {
        if self.is_loading {
            FetchState::Loading
        } else if let Some(err) = &self.error {
            FetchState::Failed(err.clone())
        } else if self.loaded {
            FetchState::Ready
        } else {
            FetchState::Idle
        }
    }
}

fn fingerprint<H: Hash + ?Sized>(deps: &H) -> u64 {
    let mut hasher = DefaultHasher::new();
    deps.hash(&mut hasher);
    hasher.finish()
}

/// Handle for one (descriptor, consumer) pair.
///
/// Dropping the handle detaches it. A query it started keeps running and
/// still populates the cache for the next reader.
pub struct Subscription<S, E>
where
    S: KeyValueStore,
    E: QueryExecutor,
{
    cache: QueryCache<S, E>,
    descriptor: QueryDescriptor,
    key: CacheKey,
    rx: watch::Receiver<FetchResult>,
    deps: Option<u64>,
}

impl<S, E> Subscription<S, E>
where
    S: KeyValueStore + 'static,
    E: QueryExecutor + 'static,
{
    pub(crate) fn new(
        cache: QueryCache<S, E>,
        descriptor: QueryDescriptor,
        key: CacheKey,
        rx: watch::Receiver<FetchResult>,
    ) -> Self {
        Self {
            cache,
            descriptor,
            key,
            rx,
            deps: None,
        }
    }

    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Snapshot of the current result.
    pub fn current(&self) -> FetchResult {
        self.rx.borrow().clone()
    }

    pub fn state(&self) -> FetchState {
        self.rx.borrow().state()
    }

    /// Wait for the next transition. Returns `None` once the cache is gone.
    pub async fn changed(&mut self) -> Option<FetchResult> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until the subscription is no longer loading.
    pub async fn settled(&mut self) -> FetchResult {
        if let Ok(result) = self.rx.wait_for(|r| !r.is_loading).await {
            return result.clone();
        }
        self.current()
    }

    /// Re-run the remote query, bypassing freshness. The subscription moves
    /// to `Loading` and then to `Ready` or `Failed`.
    pub async fn refresh(&mut self) -> Result<Vec<Record>, RemoteQueryError> {
        self.cache.refresh(&self.descriptor).await
    }

    /// Start a new load cycle that honors freshness: a fresh entry is served
    /// directly, anything else queries the remote store.
    pub async fn reload(&mut self) {
        let seed = self.rx.borrow().records.clone();
        let (key, rx) = self.cache.attach(&self.descriptor, seed).await;
        self.key = key;
        self.rx = rx;
    }

    /// Point the subscription at another descriptor.
    ///
    /// A descriptor with a different key is a new identity and starts a new
    /// load cycle. Returns whether it did.
    pub async fn set_descriptor(&mut self, descriptor: QueryDescriptor) -> bool {
        let key = self.cache.key_for(&descriptor);
        self.descriptor = descriptor;
        if key == self.key {
            return false;
        }
        tracing::debug!(from = %self.key, to = %key, "subscription descriptor changed");
        self.reload().await;
        true
    }

    /// Record the values the view's query depends on.
    ///
    /// The first call only remembers them. Any later call with different
    /// values reloads the subscription. Returns whether it reloaded.
    pub async fn set_dependencies<H: Hash + ?Sized>(&mut self, deps: &H) -> bool {
        let next = fingerprint(deps);
        match self.deps.replace(next) {
            Some(prev) if prev != next => {
                self.reload().await;
                true
            }
            _ => false,
        }
    }
}
