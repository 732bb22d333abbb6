//! Persistent TTL + LRU + stale-while-revalidate cache.
//!
//! [`Cache`] is a cheap-to-clone handle (an `Arc` around shared state), the
//! same shape as [`crate::config::Config`]'s `LiveConfig` sibling in the
//! gateway this crate grew out of. Every tool call that wants caching goes
//! through [`Cache::get_or_compute`], which folds together four concerns:
//! TTL/SWR freshness, promise coalescing so concurrent callers for the same
//! key share one `compute_fn` invocation, LRU eviction once `max_size` is
//! exceeded, and a pluggable [`strategy::PersistencePolicy`] deciding when
//! entries hit disk.

pub mod entry;
pub mod key;
pub mod persistence;
pub mod stats;
pub mod strategy;

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::{
    cache::{
        entry::{now_millis, CacheEntry},
        key::CacheKey,
        persistence::PersistenceManager,
        stats::{CacheStats, CacheStatsSnapshot},
        strategy::PersistencePolicy,
    },
    config::CacheConfig,
    Error, Result,
};

/// Per-call overrides of the cache's configured defaults.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Override the configured default TTL.
    pub ttl: Option<Duration>,
    /// Override whether stale-while-revalidate applies to this entry.
    pub stale_while_revalidate: Option<bool>,
    /// Override the configured default stale grace period.
    pub stale_time: Option<Duration>,
}

/// Outcome of a coalesced computation, broadcast to every waiting caller.
/// Errors are flattened to their `Display` text: [`Error`] itself isn't
/// `Clone`, and a waiting caller only needs to know the computation failed,
/// not recover the exact variant.
type ComputeOutcome = Result<Value, String>;

struct State {
    entries: HashMap<String, CacheEntry>,
    pending: HashMap<String, broadcast::Sender<ComputeOutcome>>,
    dirty: HashSet<String>,
    next_seq: u64,
}

impl State {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            pending: HashMap::new(),
            dirty: HashSet::new(),
            next_seq: 0,
        }
    }
}

struct Inner {
    config: CacheConfig,
    state: parking_lot::Mutex<State>,
    persistence: PersistenceManager,
    strategy: Box<dyn PersistencePolicy>,
    stats: CacheStats,
}

/// A persistent, coalescing, stale-while-revalidate cache.
///
/// Cloning a `Cache` is cheap (it's an `Arc` handle); every clone shares the
/// same in-memory state and disk root.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

enum FastPath {
    Fresh(Value),
    StaleNoRevalidate(Value),
    StaleRevalidate(Value),
    AwaitPending(broadcast::Receiver<ComputeOutcome>),
    ConsultDisk,
}

impl Cache {
    /// Build a cache from configuration, optionally eager-loading every
    /// on-disk entry and spawning its background flush/sweep tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if eager loading fails to read the cache root.
    pub async fn new(config: CacheConfig) -> Result<Self> {
        let persistence = PersistenceManager::new(config.root.clone());
        let strategy = strategy::build(config.persistence_strategy, config.persistence_interval, &config.critical_namespaces);

        let mut state = State::new();

        if config.enabled && config.eager_load {
            let now = now_millis();
            for (namespace, hex_key, persisted) in persistence.load_all().await? {
                let dead = persisted.expires_at <= now && persisted.stale_until.is_none_or(|u| u <= now);
                if dead {
                    continue;
                }
                let seq = state.next_seq;
                state.next_seq += 1;
                let entry = CacheEntry::from_persisted(namespace, hex_key, persisted, seq);
                let full_key = format!("{}:{}", entry.namespace, entry.key_hash);
                state.entries.insert(full_key, entry);
            }
            tracing::info!(loaded = state.entries.len(), "eager-loaded cache entries from disk");
        }

        let cache = Self {
            inner: Arc::new(Inner {
                config,
                state: parking_lot::Mutex::new(state),
                persistence,
                strategy,
                stats: CacheStats::default(),
            }),
        };

        if cache.inner.config.enabled && !cache.inner.config.disable_background_tasks {
            cache.spawn_background_tasks();
        }

        Ok(cache)
    }

    /// Get a value from cache, or compute and store it.
    ///
    /// Concurrent calls for the same `(namespace, arguments)` pair while a
    /// computation is in flight share its result instead of each invoking
    /// `compute_fn` (promise coalescing). A stale-but-servable entry is
    /// returned immediately while a single revalidation runs in the
    /// background.
    ///
    /// # Errors
    ///
    /// Returns whatever `compute_fn` returns on a miss, or an internal
    /// error if a coalesced computation's result could not be delivered.
    pub async fn get_or_compute<F, Fut>(
        &self,
        namespace: &str,
        arguments: &Value,
        options: CacheOptions,
        compute_fn: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if !self.inner.config.enabled {
            return compute_fn().await;
        }

        let key = CacheKey::new(namespace, arguments);
        let full_key = key.full();

        match self.fast_path(&full_key) {
            FastPath::Fresh(value) => {
                self.inner.stats.record_hit();
                Ok(value)
            }
            FastPath::StaleNoRevalidate(value) => {
                self.inner.stats.record_hit();
                Ok(value)
            }
            FastPath::StaleRevalidate(value) => {
                self.inner.stats.record_hit();
                self.spawn_revalidation(key, options, compute_fn);
                Ok(value)
            }
            FastPath::AwaitPending(mut rx) => match rx.recv().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(message)) => Err(Error::Internal(message)),
                Err(_) => Err(Error::Internal("pending cache computation was dropped".to_string())),
            },
            FastPath::ConsultDisk => self.consult_disk_then_compute(key, options, compute_fn).await,
        }
    }

    fn fast_path(&self, full_key: &str) -> FastPath {
        let now = now_millis();
        let mut state = self.inner.state.lock();

        if let Some(entry) = state.entries.get_mut(full_key) {
            if entry.is_fresh(now) {
                entry.last_access = Instant::now();
                return FastPath::Fresh(entry.value.clone());
            }
            if entry.is_stale_but_servable(now) {
                entry.last_access = Instant::now();
                let value = entry.value.clone();
                if state.pending.contains_key(full_key) {
                    return FastPath::StaleNoRevalidate(value);
                }
                let (tx, _rx) = broadcast::channel(1);
                state.pending.insert(full_key.to_string(), tx);
                return FastPath::StaleRevalidate(value);
            }
            state.entries.remove(full_key);
        }

        if let Some(tx) = state.pending.get(full_key) {
            return FastPath::AwaitPending(tx.subscribe());
        }

        FastPath::ConsultDisk
    }

    /// Begin (or join) a pending computation for `key` under the state
    /// lock, guaranteeing the pending-check and pending-insert happen as
    /// one atomic step. Returns `None` if this call is the one that should
    /// run `compute_fn`.
    fn begin_pending(&self, full_key: &str) -> Option<broadcast::Receiver<ComputeOutcome>> {
        let mut state = self.inner.state.lock();
        if let Some(tx) = state.pending.get(full_key) {
            return Some(tx.subscribe());
        }
        let (tx, _rx) = broadcast::channel(1);
        state.pending.insert(full_key.to_string(), tx);
        None
    }

    async fn consult_disk_then_compute<F, Fut>(&self, key: CacheKey, options: CacheOptions, compute_fn: F) -> Result<Value>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let full_key = key.full();
        let now = now_millis();

        if let Ok(Some(persisted)) = self.inner.persistence.read_entry(&key.namespace, &key.hex).await {
            if persisted.expires_at > now || persisted.stale_until.is_some_and(|u| u > now) {
                let mut state = self.inner.state.lock();
                if !state.entries.contains_key(&full_key) {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    let entry = CacheEntry::from_persisted(key.namespace.clone(), key.hex.clone(), persisted.clone(), seq);
                    state.entries.insert(full_key.clone(), entry);
                }
                drop(state);
                self.inner.stats.record_hit();
                if self.inner.strategy.should_persist_on_get(&key.namespace) {
                    self.persist_entry(&key, &persisted).await;
                }
                return Ok(persisted.value);
            }
        }

        if let Some(mut rx) = self.begin_pending(&full_key) {
            return match rx.recv().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(message)) => Err(Error::Internal(message)),
                Err(_) => Err(Error::Internal("pending cache computation was dropped".to_string())),
            };
        }

        self.inner.stats.record_miss();
        let result = compute_fn().await;
        self.settle(key, options, result).await
    }

    fn spawn_revalidation<F, Fut>(&self, key: CacheKey, options: CacheOptions, compute_fn: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let cache = self.clone();
        tokio::spawn(async move {
            let result = compute_fn().await;
            if let Err(e) = &result {
                tracing::warn!(namespace = %key.namespace, error = %e, "background revalidation failed");
            }
            let _ = cache.settle(key, options, result).await;
        });
    }

    /// Store a computed result, notify any waiters, and run eviction.
    async fn settle(&self, key: CacheKey, options: CacheOptions, result: Result<Value>) -> Result<Value> {
        let full_key = key.full();

        let tx = {
            let mut state = self.inner.state.lock();
            state.pending.remove(&full_key)
        };

        match result {
            Ok(value) => {
                let now = now_millis();
                let ttl = options.ttl.unwrap_or(self.inner.config.default_ttl);
                let swr = options.stale_while_revalidate.unwrap_or(self.inner.config.stale_while_revalidate);
                let stale_time = options.stale_time.unwrap_or(self.inner.config.default_stale_time);

                #[allow(clippy::cast_possible_wrap)]
                let expires_at = now + ttl.as_millis() as i64;
                #[allow(clippy::cast_possible_wrap)]
                let stale_until = swr.then(|| expires_at + stale_time.as_millis() as i64);

                self.insert_and_evict(&key, value.clone(), expires_at, stale_until);

                if self.inner.strategy.should_persist_on_set(&key.namespace) {
                    self.persist_entry(&key, &entry::PersistedEntry { value: value.clone(), expires_at, stale_until })
                        .await;
                } else {
                    self.inner.state.lock().dirty.insert(full_key);
                }

                if let Some(tx) = tx {
                    let _ = tx.send(Ok(value.clone()));
                }
                Ok(value)
            }
            Err(e) => {
                self.inner.stats.record_error();
                if let Some(tx) = tx {
                    let _ = tx.send(Err(e.to_string()));
                }
                Err(e)
            }
        }
    }

    fn insert_and_evict(&self, key: &CacheKey, value: Value, expires_at: i64, stale_until: Option<i64>) {
        let mut state = self.inner.state.lock();

        let seq = state.next_seq;
        state.next_seq += 1;

        let full_key = key.full();
        state.entries.insert(
            full_key,
            CacheEntry {
                value,
                expires_at,
                stale_until,
                last_access: Instant::now(),
                insertion_seq: seq,
                namespace: key.namespace.clone(),
                key_hash: key.hex.clone(),
            },
        );

        let max_size = self.inner.config.max_size;
        if state.entries.len() > max_size {
            #[allow(clippy::cast_precision_loss)]
            let evict_count = ((max_size as f64) * 0.2).ceil() as usize;
            let mut candidates: Vec<(String, Instant, u64)> = state
                .entries
                .iter()
                .map(|(k, e)| (k.clone(), e.last_access, e.insertion_seq))
                .collect();
            candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));

            let mut evicted = 0u64;
            for (k, _, _) in candidates.into_iter().take(evict_count.max(1)) {
                state.entries.remove(&k);
                evicted += 1;
            }
            self.inner.stats.record_eviction(evicted);
        }
    }

    async fn persist_entry(&self, key: &CacheKey, persisted: &entry::PersistedEntry) {
        if let Err(e) = self.inner.persistence.write_entry(&key.namespace, &key.hex, persisted).await {
            tracing::warn!(namespace = %key.namespace, error = %e, "failed to persist cache entry");
            self.inner.stats.record_persistence_error();
        } else {
            self.inner.state.lock().dirty.remove(&key.full());
        }
    }

    fn spawn_background_tasks(&self) {
        if let Some(interval) = self.inner.strategy.persistence_interval() {
            let cache = self.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    cache.flush_dirty().await;
                }
            });
        }

        let sweep_interval = self.inner.config.sweep_interval;
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.sweep_expired();
            }
        });
    }

    async fn flush_dirty(&self) {
        let dirty_keys: Vec<(String, String, entry::PersistedEntry)> = {
            let state = self.inner.state.lock();
            state
                .dirty
                .iter()
                .filter_map(|full_key| {
                    let entry = state.entries.values().find(|e| format!("{}:{}", e.namespace, e.key_hash) == *full_key)?;
                    Some((entry.namespace.clone(), entry.key_hash.clone(), entry.to_persisted()))
                })
                .collect()
        };

        for (namespace, hex_key, persisted) in dirty_keys {
            if let Err(e) = self.inner.persistence.write_entry(&namespace, &hex_key, &persisted).await {
                tracing::warn!(namespace = %namespace, error = %e, "periodic flush failed for entry");
                self.inner.stats.record_persistence_error();
            } else {
                self.inner.state.lock().dirty.remove(&format!("{namespace}:{hex_key}"));
            }
        }
    }

    /// Remove expired entries (`expires_at <= now`) from memory.
    fn sweep_expired(&self) {
        let now = now_millis();
        let mut state = self.inner.state.lock();
        state.entries.retain(|_, e| e.expires_at > now);
    }

    /// Current in-memory size and running counters.
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        let (size, pending) = {
            let state = self.inner.state.lock();
            (state.entries.len(), state.pending.len())
        };
        self.inner.stats.snapshot(size, pending)
    }

    /// Drop an entry from memory and disk immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the on-disk file exists but could not be removed.
    pub async fn invalidate(&self, namespace: &str, arguments: &Value) -> Result<()> {
        let key = CacheKey::new(namespace, arguments);
        self.inner.state.lock().entries.remove(&key.full());
        self.inner.persistence.remove_entry(&key.namespace, &key.hex).await
    }

    /// Drop every entry in `namespace` from memory and disk immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the on-disk namespace directory exists but could
    /// not be removed.
    pub async fn clear_namespace(&self, namespace: &str) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            state.entries.retain(|_, e| e.namespace != namespace);
            state.dirty.retain(|full_key| full_key.split_once(':').is_none_or(|(ns, _)| ns != namespace));
        }
        self.inner.persistence.remove_namespace(namespace).await
    }

    /// Force every dirty entry to disk now, outside the periodic flush
    /// interval.
    pub async fn flush(&self) {
        self.flush_dirty().await;
    }

    /// Flush every dirty entry and invoke the strategy's shutdown hook.
    /// Intended to run once, at process shutdown.
    pub async fn dispose(&self) {
        self.inner.strategy.on_shutdown();
        self.flush_dirty().await;

        // `OnShutdown` never marks entries dirty incrementally; sweep every
        // entry once here so nothing computed this run is lost.
        let all: Vec<(String, String, entry::PersistedEntry)> = {
            let state = self.inner.state.lock();
            state.entries.values().map(|e| (e.namespace.clone(), e.key_hash.clone(), e.to_persisted())).collect()
        };
        for (namespace, hex_key, persisted) in all {
            if let Err(e) = self.inner.persistence.write_entry(&namespace, &hex_key, &persisted).await {
                tracing::warn!(namespace = %namespace, error = %e, "dispose flush failed for entry");
            }
        }
    }
}
