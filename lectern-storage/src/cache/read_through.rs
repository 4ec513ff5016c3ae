//! Read-through query cache with single-flight coalescing.
//!
//! [`QueryCache`] routes each read through the freshness policy: a fresh
//! entry is served without touching the network, anything else runs the
//! remote query, stores the full result set and hands it back.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use lectern_core::{CacheSettings, Constraint, QueryDescriptor, Record, RemoteQueryError};
use tokio::sync::watch;

use super::executor::QueryExecutor;
use super::freshness::{CacheRead, FreshnessPolicy};
use super::key::CacheKey;
use super::store::{CacheEntry, CacheStore};
use super::subscription::{FetchResult, Subscription};
use super::traits::{CacheStats, KeyValueStore};

type FlightResult = Result<Vec<Record>, RemoteQueryError>;
type SharedFlight = Shared<BoxFuture<'static, FlightResult>>;

/// A remote query currently running for one key.
struct InFlight {
    generation: u64,
    fut: SharedFlight,
}

/// Per-key ordering state.
///
/// Every flight gets a generation number when it starts. A completed flight
/// only writes to the store if no later flight has committed already.
/// The state is dropped once no flight for the key is running.
#[derive(Debug, Default)]
struct KeyState {
    started: u64,
    committed: u64,
    committed_at_millis: Option<i64>,
    running: u64,
}

#[derive(Default)]
struct Registry {
    in_flight: HashMap<CacheKey, InFlight>,
    watchers: HashMap<CacheKey, Vec<watch::Sender<FetchResult>>>,
    keys: HashMap<CacheKey, KeyState>,
}

impl Registry {
    /// Apply `update` to every live subscription of `key`, dropping the
    /// senders whose subscription has gone away.
    fn broadcast(&mut self, key: &CacheKey, update: impl Fn(&mut FetchResult)) {
        let Some(senders) = self.watchers.get_mut(key) else {
            return;
        };
        senders.retain(|tx| !tx.is_closed());
        for tx in senders.iter() {
            tx.send_modify(|result| update(result));
        }
        if senders.is_empty() {
            self.watchers.remove(key);
        }
    }

    fn watch(&mut self, key: &CacheKey, tx: watch::Sender<FetchResult>) {
        let senders = self.watchers.entry(key.clone()).or_default();
        senders.retain(|tx| !tx.is_closed());
        senders.push(tx);
    }

    /// Forget `key` once nothing is running for it and no subscription
    /// still listens.
    fn prune(&mut self, key: &CacheKey) {
        if let Some(senders) = self.watchers.get_mut(key) {
            senders.retain(|tx| !tx.is_closed());
            if senders.is_empty() {
                self.watchers.remove(key);
            }
        }
        if self.keys.get(key).is_some_and(|s| s.running == 0) {
            self.keys.remove(key);
        }
    }
}

struct Inner<S: KeyValueStore, E> {
    store: CacheStore<S>,
    executor: Arc<E>,
    policy: FreshnessPolicy,
    key_prefix: String,
    registry: Mutex<Registry>,
    /// Serializes the stamp decision with the store write it guards.
    commit_lock: tokio::sync::Mutex<()>,
}

/// Read-through cache over a remote [`QueryExecutor`].
///
/// # Type Parameters
///
/// - `S`: The persistence medium for serialized entries
/// - `E`: The remote query collaborator
///
/// Cloning is cheap; clones share the store, the in-flight table and the
/// statistics.
pub struct QueryCache<S, E>
where
    S: KeyValueStore,
    E: QueryExecutor,
{
    inner: Arc<Inner<S, E>>,
}

impl<S, E> Clone for QueryCache<S, E>
where
    S: KeyValueStore,
    E: QueryExecutor,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, E> QueryCache<S, E>
where
    S: KeyValueStore + 'static,
    E: QueryExecutor + 'static,
{
    /// Create a new query cache.
    pub fn new(backend: S, executor: Arc<E>, settings: CacheSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: CacheStore::new(backend),
                executor,
                policy: FreshnessPolicy::new(settings.ttl()),
                key_prefix: settings.key_prefix,
                registry: Mutex::new(Registry::default()),
                commit_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Create a new query cache with the default five-minute TTL.
    pub fn with_defaults(backend: S, executor: Arc<E>) -> Self {
        Self::new(backend, executor, CacheSettings::default())
    }

    /// The freshness policy in force.
    pub fn policy(&self) -> FreshnessPolicy {
        self.inner.policy
    }

    /// Get a reference to the store adapter.
    pub fn store(&self) -> &CacheStore<S> {
        &self.inner.store
    }

    /// Take the backend back once this is the last handle to the cache.
    ///
    /// Returns `None` while clones, subscriptions or running queries still
    /// share the cache.
    pub fn into_backend(self) -> Option<S> {
        Arc::try_unwrap(self.inner)
            .ok()
            .map(|inner| inner.store.into_backend())
    }

    /// Get a reference to the remote query collaborator.
    pub fn executor(&self) -> &E {
        &self.inner.executor
    }

    /// The key under which `descriptor`'s results are stored.
    pub fn key_for(&self, descriptor: &QueryDescriptor) -> CacheKey {
        CacheKey::for_descriptor(&self.inner.key_prefix, descriptor)
    }

    /// Read the records for `descriptor`, running the remote query only when
    /// no fresh entry exists.
    ///
    /// Concurrent callers for the same stale key share one remote query.
    ///
    /// # Errors
    ///
    /// Returns the collaborator's [`RemoteQueryError`] unchanged when the
    /// query fails. The stored entry, if any, is left as it was.
    pub async fn fetch(
        &self,
        descriptor: &QueryDescriptor,
    ) -> Result<CacheRead<Vec<Record>>, RemoteQueryError> {
        let key = self.key_for(descriptor);

        if let Some(entry) = self.fresh_entry(&key).await {
            let stored_at = entry.stored_at();
            return Ok(CacheRead::from_cache(entry.into_payload(), stored_at));
        }

        let flight = {
            let mut registry = self.inner.lock_registry();
            let existing = registry.in_flight.get(&key).map(|f| f.fut.clone());
            match existing {
                Some(fut) => {
                    self.inner.store.record(|s| s.coalesced += 1);
                    tracing::debug!(key = %key, "joining in-flight query");
                    fut
                }
                None => self.start_flight(&mut registry, key, descriptor),
            }
        };

        let records = flight.await?;
        Ok(CacheRead::from_remote(records, Utc::now()))
    }

    /// Re-run the remote query for `descriptor` regardless of freshness.
    ///
    /// Used after a local write so the author sees their change without
    /// waiting for the TTL. On success the stored entry is replaced and
    /// every subscription of the key receives the new records.
    ///
    /// # Errors
    ///
    /// Returns the collaborator's [`RemoteQueryError`]; the previous entry
    /// is kept.
    pub async fn refresh(&self, descriptor: &QueryDescriptor) -> Result<Vec<Record>, RemoteQueryError> {
        let key = self.key_for(descriptor);
        let flight = {
            let mut registry = self.inner.lock_registry();
            self.start_flight(&mut registry, key, descriptor)
        };
        flight.await
    }

    /// Remove the stored entry for `descriptor`. Returns whether the removal
    /// reached the store.
    pub async fn clear(&self, descriptor: &QueryDescriptor) -> bool {
        let key = self.key_for(descriptor);
        tracing::debug!(key = %key, "clearing cache entry");
        self.inner.store.remove(&key).await
    }

    /// Read the stored entry for `descriptor` without running a query or
    /// counting a hit or miss.
    pub async fn peek(&self, descriptor: &QueryDescriptor) -> Option<CacheEntry> {
        self.inner.store.get(&self.key_for(descriptor)).await
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.store.stats()
    }

    /// Open a live subscription to `descriptor`.
    ///
    /// A fresh entry puts the subscription straight into the ready state.
    /// Otherwise it starts loading, joining a query already in flight for
    /// the same key when there is one.
    pub async fn subscribe(&self, descriptor: QueryDescriptor) -> Subscription<S, E> {
        let (key, rx) = self.attach(&descriptor, Vec::new()).await;
        Subscription::new(self.clone(), descriptor, key, rx)
    }

    /// Register a new watcher for `descriptor` and bring it up to date.
    ///
    /// `seed` is the records the watcher showed before, kept visible while
    /// the new load is pending.
    pub(crate) async fn attach(
        &self,
        descriptor: &QueryDescriptor,
        seed: Vec<Record>,
    ) -> (CacheKey, watch::Receiver<FetchResult>) {
        let key = self.key_for(descriptor);

        if let Some(entry) = self.fresh_entry(&key).await {
            let (tx, rx) = watch::channel(FetchResult::ready(entry.into_payload()));
            self.inner.lock_registry().watch(&key, tx);
            return (key, rx);
        }

        let (tx, rx) = watch::channel(FetchResult::loading(seed));
        let mut registry = self.inner.lock_registry();
        registry.watch(&key, tx);
        if registry.in_flight.contains_key(&key) {
            self.inner.store.record(|s| s.coalesced += 1);
            tracing::debug!(key = %key, "subscription joining in-flight query");
        } else {
            // The flight runs on its own task; the handle is not needed here.
            let _ = self.start_flight(&mut registry, key.clone(), descriptor);
        }
        (key, rx)
    }

    /// Look up `key` and return it only if fresh, counting a hit or miss.
    async fn fresh_entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = Utc::now();
        match self.inner.store.get(key).await {
            Some(entry) if self.inner.policy.is_fresh(&entry, now) => {
                self.inner.store.record(|s| s.hits += 1);
                tracing::debug!(key = %key, stored_at = %entry.stored_at(), "cache hit");
                Some(entry)
            }
            Some(entry) => {
                self.inner.store.record(|s| s.misses += 1);
                tracing::debug!(key = %key, stored_at = %entry.stored_at(), "cache entry expired");
                None
            }
            None => {
                self.inner.store.record(|s| s.misses += 1);
                tracing::debug!(key = %key, "cache miss");
                None
            }
        }
    }

    /// Spawn the remote query for `key` and record it as the key's current
    /// flight. Must be called with the registry lock held.
    fn start_flight(
        &self,
        registry: &mut Registry,
        key: CacheKey,
        descriptor: &QueryDescriptor,
    ) -> SharedFlight {
        let state = registry.keys.entry(key.clone()).or_default();
        state.started += 1;
        state.running += 1;
        let generation = state.started;

        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let collection = descriptor.collection().to_string();
        let constraints = descriptor.constraints().to_vec();
        let handle = tokio::spawn(async move {
            inner
                .run_flight(task_key, generation, collection, constraints)
                .await
        });

        let fut: SharedFlight = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(RemoteQueryError::aborted(format!("query task failed: {e}"))),
            }
        }
        .boxed()
        .shared();

        registry.broadcast(&key, FetchResult::begin_loading);
        registry.in_flight.insert(
            key,
            InFlight {
                generation,
                fut: fut.clone(),
            },
        );
        fut
    }
}

impl<S, E> Inner<S, E>
where
    S: KeyValueStore,
    E: QueryExecutor,
{
    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_flight(
        &self,
        key: CacheKey,
        generation: u64,
        collection: String,
        constraints: Vec<Constraint>,
    ) -> FlightResult {
        self.store.record(|s| s.remote_fetches += 1);
        tracing::debug!(key = %key, generation, collection = %collection, "running remote query");

        let result = AssertUnwindSafe(self.executor.execute(&collection, &constraints))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(RemoteQueryError::aborted("query executor panicked")));

        match &result {
            Ok(records) => {
                self.commit(&key, generation, records).await;
                let records = records.clone();
                self.settle(&key, generation, move |r| r.resolve(records.clone()));
            }
            Err(e) => {
                self.store.record(|s| s.remote_failures += 1);
                tracing::error!(
                    key = %key,
                    code = %e.code,
                    error = %e.message,
                    "remote query failed"
                );
                let err = e.clone();
                self.settle(&key, generation, move |r| r.fail(err.clone()));
            }
        }
        result
    }

    /// Write `records` as the key's entry unless a later flight already did.
    async fn commit(&self, key: &CacheKey, generation: u64, records: &[Record]) {
        let _guard = self.commit_lock.lock().await;

        // A key seen for the first time since its state was pruned takes the
        // stored entry's stamp as its floor.
        let needs_floor = self
            .lock_registry()
            .keys
            .get(key)
            .map_or(true, |s| s.committed_at_millis.is_none());
        let floor = if needs_floor {
            self.store
                .stored_at(key)
                .await
                .map(|stamp| stamp.timestamp_millis())
        } else {
            None
        };

        let stamp = {
            let mut registry = self.lock_registry();
            let state = registry.keys.entry(key.clone()).or_default();
            if generation <= state.committed {
                None
            } else {
                let now = Utc::now().timestamp_millis();
                let millis = match state.committed_at_millis.or(floor) {
                    Some(prev) if now <= prev => prev + 1,
                    _ => now,
                };
                state.committed = generation;
                state.committed_at_millis = Some(millis);
                Some(DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now))
            }
        };

        match stamp {
            Some(stored_at) => {
                let entry = CacheEntry::new(key.clone(), records.to_vec(), stored_at);
                self.store.set(&entry).await;
            }
            None => {
                self.store.record(|s| s.superseded_writes += 1);
                tracing::debug!(key = %key, generation, "newer result already stored, skipping write");
            }
        }
    }

    /// Retire the flight and, if it is the key's latest, publish its outcome.
    fn settle(&self, key: &CacheKey, generation: u64, update: impl Fn(&mut FetchResult)) {
        let mut registry = self.lock_registry();
        if let Some(state) = registry.keys.get_mut(key) {
            state.running = state.running.saturating_sub(1);
        }
        if registry
            .in_flight
            .get(key)
            .is_some_and(|f| f.generation == generation)
        {
            registry.in_flight.remove(key);
        }
        let latest = registry
            .keys
            .get(key)
            .map_or(true, |s| s.started == generation);
        if latest {
            registry.broadcast(key, update);
        }
        registry.prune(key);
    }
}
