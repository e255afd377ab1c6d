//! The caching policy engine
//!
//! [`Cache::resolve`] looks an entry up, classifies it against a single clock
//! reading and then either returns it (fresh), returns it while a background
//! task refreshes it (stale), or produces a new value and writes it back
//! before returning (absent or expired).

use std::collections::HashSet;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace, warn, Instrument};

use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, CacheOptions, EntryPolicy};
use crate::error::{CacheError, Result};
use crate::freshness::Freshness;
use crate::metrics::{CacheMetrics, CacheStats, OperationTimer};
use crate::producer::{self, AnyProducer, ProduceContext, SharedProducer};
use crate::storage::{CacheEntry, CacheStorage, MemoryStorage};

/// Memoizing cache with max-age and stale-while-revalidate semantics.
///
/// Cloning is cheap and yields a handle to the same storage, metrics and
/// in-flight revalidation bookkeeping.
///
/// Stale hits spawn their revalidation onto the current Tokio runtime. Outside
/// a runtime the stale value is still returned but no revalidation runs.
pub struct Cache<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    storage: Arc<dyn CacheStorage<K, V>>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<CacheMetrics>,
    /// Keys with a running background revalidation, when deduplicating
    revalidating: Arc<Mutex<HashSet<K>>>,
    pending: Arc<PendingTasks>,
}

impl<K, V> Clone for Cache<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            config: self.config.clone(),
            clock: Arc::clone(&self.clock),
            metrics: Arc::clone(&self.metrics),
            revalidating: Arc::clone(&self.revalidating),
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<K, V> Debug for Cache<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .field("running revalidations", &self.pending.count())
            .finish()
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache over `storage` with default configuration
    pub fn new(storage: Arc<dyn CacheStorage<K, V>>) -> Self {
        Self::with_config(storage, CacheConfig::default())
    }

    /// Create a new cache with configuration
    pub fn with_config(storage: Arc<dyn CacheStorage<K, V>>, config: CacheConfig) -> Self {
        Self {
            storage,
            config,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(CacheMetrics::new()),
            revalidating: Arc::new(Mutex::new(HashSet::new())),
            pending: Arc::new(PendingTasks::default()),
        }
    }

    /// Create a cache backed by a fresh [`MemoryStorage`]
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::with_config(Arc::new(MemoryStorage::new()), config)
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Get cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get cache metrics
    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    /// Number of stored entries, whatever their freshness
    pub async fn size(&self) -> Result<usize> {
        self.storage.len().await
    }

    /// Check if an entry exists, whatever its freshness
    pub async fn has(&self, key: &K) -> Result<bool> {
        self.storage.contains(key).await
    }

    /// Read the raw entry without producing or classifying
    pub async fn peek(&self, key: &K) -> Result<Option<CacheEntry<V>>> {
        self.storage.get(key).await
    }

    /// Remove a single entry
    pub async fn delete(&self, key: &K) -> Result<bool> {
        self.storage.remove(key).await
    }

    /// Return the cached value for `key`, producing it when needed.
    ///
    /// - No entry, or an expired one: `producer` runs with
    ///   `is_revalidating = false`, the result is stored and returned. A
    ///   producer error is returned as-is and nothing is written.
    /// - Fresh entry: returned; `producer` is not called.
    /// - Stale entry: returned immediately; `producer` runs in a background
    ///   task with `is_revalidating = true` and overwrites the entry on
    ///   success. Its failures are logged and never reach a caller.
    ///
    /// `options` are merged over the cache defaults and stored on the entry.
    ///
    /// # Errors
    ///
    /// [`CacheError::MissingProducer`] when `producer` is `None`, raised
    /// before storage is touched; storage errors converted into `E`; the
    /// producer's own error on the synchronous path.
    pub async fn resolve<E>(
        &self,
        key: K,
        options: CacheOptions,
        producer: Option<SharedProducer<V, E>>,
    ) -> std::result::Result<V, E>
    where
        E: From<CacheError> + Display + Send + 'static,
    {
        let producer = producer.ok_or(CacheError::MissingProducer)?;
        let policy = self.config.resolve(&options);
        let now = self.clock.now();

        let existing = self.storage.get(&key).await?;
        let Some(entry) = existing else {
            trace!(?key, "cache miss");
            self.record(|m| m.record_miss());
            return self.produce_and_store(key, policy, now, &producer).await;
        };

        match entry.freshness(now) {
            Freshness::Fresh => {
                trace!(?key, "fresh hit");
                self.record(|m| m.record_hit());
                Ok(entry.value)
            }
            Freshness::Stale => {
                trace!(?key, "stale hit");
                self.record(|m| m.record_stale_hit());
                self.spawn_revalidation(key, policy, producer);
                Ok(entry.value)
            }
            Freshness::Expired => {
                trace!(?key, age = ?entry.age(now), "expired entry");
                self.record(|m| m.record_expiration());
                self.produce_and_store(key, policy, now, &producer).await
            }
        }
    }

    /// [`Cache::resolve`] for a type-erased producer.
    ///
    /// # Errors
    ///
    /// [`CacheError::MissingProducer`] for `None`, and
    /// [`CacheError::InvalidProducer`] when the handle does not hold a
    /// `SharedProducer<V, E>`. Both are raised before storage is touched.
    pub async fn resolve_any<E>(
        &self,
        key: K,
        options: CacheOptions,
        producer: Option<AnyProducer>,
    ) -> std::result::Result<V, E>
    where
        E: From<CacheError> + Display + Send + 'static,
    {
        let producer = producer
            .ok_or(CacheError::MissingProducer)?
            .downcast::<V, E>()?;
        self.resolve(key, options, Some(producer)).await
    }

    /// Resolve with the cache's default options
    ///
    /// ```
    /// use stash_cache::{Cache, CacheConfig, CacheError};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), CacheError> {
    /// let cache: Cache<&'static str, String> = Cache::in_memory(CacheConfig::default());
    ///
    /// let greeting = cache
    ///     .fetch("greeting", |_ctx| async { Ok::<_, CacheError>("hello".to_string()) })
    ///     .await?;
    /// assert_eq!(greeting, "hello");
    /// assert!(cache.has(&"greeting").await?);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn fetch<E, F, Fut>(&self, key: K, f: F) -> std::result::Result<V, E>
    where
        F: Fn(ProduceContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: From<CacheError> + Display + Send + 'static,
    {
        self.resolve(key, CacheOptions::default(), Some(producer::shared(f)))
            .await
    }

    /// Resolve with explicit options
    pub async fn fetch_with<E, F, Fut>(
        &self,
        key: K,
        options: CacheOptions,
        f: F,
    ) -> std::result::Result<V, E>
    where
        F: Fn(ProduceContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: From<CacheError> + Display + Send + 'static,
    {
        self.resolve(key, options, Some(producer::shared(f))).await
    }

    /// Remove every entry that is not fresh right now.
    ///
    /// Nothing sweeps automatically; callers schedule this themselves.
    pub async fn clear_stale(&self) -> Result<usize> {
        let now = self.clock.now();
        let removed = self
            .storage
            .clear_matching(&|_key: &K, entry: &CacheEntry<V>| !entry.freshness(now).is_fresh())
            .await?;

        self.record(|m| m.record_swept(removed));
        debug!(removed, "cleared stale entries");
        Ok(removed)
    }

    /// Clear all entries
    pub async fn clear(&self) -> Result<()> {
        self.storage.clear().await
    }

    /// Wait until every background revalidation spawned so far has finished.
    pub async fn wait_for_revalidations(&self) {
        self.pending.wait_idle().await;
    }

    async fn produce_and_store<E>(
        &self,
        key: K,
        policy: EntryPolicy,
        now: SystemTime,
        producer: &SharedProducer<V, E>,
    ) -> std::result::Result<V, E>
    where
        E: From<CacheError> + Send + 'static,
    {
        debug!(?key, "producing value");
        let timer = OperationTimer::start();
        let produced = producer.produce(ProduceContext::initial()).await;
        self.record(|m| m.record_production(timer.elapsed(), produced.is_ok()));

        let value = produced?;
        self.storage
            .set(key, CacheEntry::new(value.clone(), now, policy))
            .await?;
        Ok(value)
    }

    fn spawn_revalidation<E>(&self, key: K, policy: EntryPolicy, producer: SharedProducer<V, E>)
    where
        E: Display + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(?key, "no Tokio runtime available, skipping revalidation");
            self.record(|m| m.record_revalidation_skipped());
            return;
        };

        let claim = if self.config.dedupe_revalidations {
            match RevalidationClaim::acquire(&self.revalidating, &key) {
                Some(claim) => Some(claim),
                None => {
                    debug!(?key, "revalidation already running, serving stale value");
                    self.record(|m| m.record_revalidation_skipped());
                    return;
                }
            }
        } else {
            None
        };

        debug!(?key, "spawning background revalidation");
        self.record(|m| m.record_revalidation_started());

        let storage = Arc::clone(&self.storage);
        let clock = Arc::clone(&self.clock);
        let metrics = self
            .config
            .enable_metrics
            .then(|| Arc::clone(&self.metrics));
        let span = tracing::debug_span!("stash.revalidate", key = ?key);
        let pending = PendingTasks::enter(&self.pending);

        let task = async move {
            let _pending = pending;
            let _claim = claim;

            let value = match producer.produce(ProduceContext::revalidating()).await {
                Ok(value) => value,
                Err(error) => {
                    warn!(%error, "background revalidation failed, keeping stale entry");
                    if let Some(metrics) = &metrics {
                        metrics.record_revalidation_failed();
                    }
                    return;
                }
            };

            let entry = CacheEntry::new(value, clock.now(), policy);
            match storage.set(key, entry).await {
                Ok(()) => {
                    debug!("revalidated entry stored");
                    if let Some(metrics) = &metrics {
                        metrics.record_revalidation_completed();
                    }
                }
                Err(error) => {
                    warn!(%error, "failed to store revalidated entry");
                    if let Some(metrics) = &metrics {
                        metrics.record_revalidation_failed();
                    }
                }
            }
        };
        runtime.spawn(task.instrument(span));
    }

    fn record(&self, f: impl FnOnce(&CacheMetrics)) {
        if self.config.enable_metrics {
            f(&self.metrics);
        }
    }
}

/// Marks a key as having a running revalidation; released on drop, including
/// when the task panics.
struct RevalidationClaim<K: Eq + Hash> {
    key: K,
    revalidating: Arc<Mutex<HashSet<K>>>,
}

impl<K: Eq + Hash + Clone> RevalidationClaim<K> {
    fn acquire(revalidating: &Arc<Mutex<HashSet<K>>>, key: &K) -> Option<Self> {
        if !revalidating.lock().insert(key.clone()) {
            return None;
        }
        Some(Self {
            key: key.clone(),
            revalidating: Arc::clone(revalidating),
        })
    }
}

impl<K: Eq + Hash> Drop for RevalidationClaim<K> {
    fn drop(&mut self) {
        self.revalidating.lock().remove(&self.key);
    }
}

/// Counts running background tasks so they can be awaited.
#[derive(Default)]
struct PendingTasks {
    count: AtomicUsize,
    idle: Notify,
}

impl PendingTasks {
    fn enter(this: &Arc<Self>) -> PendingGuard {
        this.count.fetch_add(1, Ordering::SeqCst);
        PendingGuard {
            tasks: Arc::clone(this),
        }
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct PendingGuard {
    tasks: Arc<PendingTasks>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.tasks.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tasks.idle.notify_waiters();
        }
    }
}

/// Builder pattern for cache construction
pub struct CacheBuilder<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    config: CacheConfig,
    storage: Option<Arc<dyn CacheStorage<K, V>>>,
    clock: Option<Arc<dyn Clock>>,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a new cache builder
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            storage: None,
            clock: None,
        }
    }

    /// Set cache configuration
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the storage backend (required)
    pub fn storage(mut self, storage: Arc<dyn CacheStorage<K, V>>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the time source
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Build the cache
    pub fn build(self) -> Result<Cache<K, V>> {
        let storage = self
            .storage
            .ok_or_else(|| CacheError::storage("Storage backend is required"))?;

        let mut cache = Cache::with_config(storage, self.config);
        if let Some(clock) = self.clock {
            cache.clock = clock;
        }
        Ok(cache)
    }
}

impl<K, V> Default for CacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
