//! Keyed cache with a per-cache expiry policy.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Expiry policy for the quest lookups made by [`crate::TaskGate`].
///
/// `None` means an entry never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub tasks_ttl: Option<Duration>,
    pub member_ttl: Option<Duration>,
    pub progress_ttl: Option<Duration>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            tasks_ttl: Some(Duration::from_secs(10 * 60)),
            member_ttl: None,
            progress_ttl: Some(Duration::from_secs(1)),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Concurrent key to value cache. Expired entries are dropped on read.
#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, Entry<V>>,
    ttl: Option<Duration>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let live = self.entries.get(key).and_then(|entry| {
            if entry.is_live(now) {
                Some(entry.value.clone())
            } else {
                None
            }
        });
        if live.is_none() {
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        }
        live
    }

    pub fn insert(&self, key: K, value: V) {
        let expires_at = self.ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.entries.insert(key, Entry { value, expires_at });
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Cached value for `key`, or the result of `load` stored on success.
    ///
    /// No lock is held while `load` runs, so concurrent misses may each load.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = load().await?;
        self.insert(key, value.clone());
        Ok(value)
    }
}
