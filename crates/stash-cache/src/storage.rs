//! Cache storage backends

use std::{
    collections::HashMap,
    hash::Hash,
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{config::EntryPolicy, freshness::Freshness, Result};

/// A cached value together with the freshness windows resolved when it was
/// written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    /// The cached data
    pub value: V,
    /// When the entry was last written
    pub stored_at: SystemTime,
    /// How long the entry is fresh after `stored_at`
    #[serde(with = "crate::config::seconds")]
    pub max_age: Duration,
    /// How long after `max_age` the stale value may still be served
    #[serde(with = "crate::config::seconds")]
    pub stale_while_revalidate: Duration,
}

impl<V> CacheEntry<V> {
    /// Create a new cache entry
    pub fn new(value: V, stored_at: SystemTime, policy: EntryPolicy) -> Self {
        Self {
            value,
            stored_at,
            max_age: policy.max_age,
            stale_while_revalidate: policy.stale_while_revalidate,
        }
    }

    /// Classify this entry at `now`
    pub fn freshness(&self, now: SystemTime) -> Freshness {
        Freshness::classify(self.stored_at, self.max_age, self.stale_while_revalidate, now)
    }

    /// Age of the entry at `now`, zero if `stored_at` lies in the future
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.stored_at).unwrap_or(Duration::ZERO)
    }

    /// The windows this entry was written with
    pub fn policy(&self) -> EntryPolicy {
        EntryPolicy {
            max_age: self.max_age,
            stale_while_revalidate: self.stale_while_revalidate,
        }
    }
}

/// Predicate used by [`CacheStorage::clear_matching`].
pub type EntryPredicate<'a, K, V> = &'a (dyn Fn(&K, &CacheEntry<V>) -> bool + Send + Sync);

/// Key/value backend the cache is built on.
///
/// Storage has no notion of freshness: `get` and `contains` report raw
/// entries regardless of age. Implementations must provide read-your-writes
/// for a single caller: a `set` is visible to the next `get`/`contains`.
#[async_trait]
pub trait CacheStorage<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Number of stored entries
    async fn len(&self) -> Result<usize>;

    /// Check if key exists
    async fn contains(&self, key: &K) -> Result<bool>;

    /// Retrieve the raw entry
    async fn get(&self, key: &K) -> Result<Option<CacheEntry<V>>>;

    /// Insert or overwrite an entry
    async fn set(&self, key: K, entry: CacheEntry<V>) -> Result<()>;

    /// Remove an entry, returning whether it existed
    async fn remove(&self, key: &K) -> Result<bool>;

    /// Remove every entry the predicate accepts and return how many were
    /// removed.
    ///
    /// The sweep must observe a stable snapshot of keys: no entry may be
    /// skipped or visited twice because of concurrent mutation.
    async fn clear_matching(&self, predicate: EntryPredicate<'_, K, V>) -> Result<usize>;

    /// Clear all entries
    async fn clear(&self) -> Result<()>;
}

/// In-memory cache storage
pub struct MemoryStorage<K, V> {
    data: Arc<RwLock<HashMap<K, CacheEntry<V>>>>,
}

impl<K, V> MemoryStorage<K, V> {
    /// Create new in-memory storage
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create with initial capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::with_capacity(capacity))),
        }
    }
}

impl<K, V> Default for MemoryStorage<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for MemoryStorage<K, V> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

#[async_trait]
impl<K, V> CacheStorage<K, V> for MemoryStorage<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn len(&self) -> Result<usize> {
        let data = self.data.read().await;
        Ok(data.len())
    }

    async fn contains(&self, key: &K) -> Result<bool> {
        let data = self.data.read().await;
        Ok(data.contains_key(key))
    }

    async fn get(&self, key: &K) -> Result<Option<CacheEntry<V>>> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn set(&self, key: K, entry: CacheEntry<V>) -> Result<()> {
        let mut data = self.data.write().await;
        data.insert(key, entry);
        Ok(())
    }

    async fn remove(&self, key: &K) -> Result<bool> {
        let mut data = self.data.write().await;
        Ok(data.remove(key).is_some())
    }

    async fn clear_matching(&self, predicate: EntryPredicate<'_, K, V>) -> Result<usize> {
        // The write lock is held for the whole sweep, so no writer can
        // interleave with it.
        let mut data = self.data.write().await;
        let before = data.len();
        data.retain(|key, entry| !predicate(key, entry));
        Ok(before - data.len())
    }

    async fn clear(&self) -> Result<()> {
        let mut data = self.data.write().await;
        data.clear();
        Ok(())
    }
}
