//! In-memory key/value store with per-entry time-to-live.
//!
//! Expiry is lazy: an entry past its deadline is dropped the first time it
//! is read. `purge_expired` sweeps everything at once for callers that want
//! to bound memory between reads. When built with a capacity, inserting a
//! new key into a full cache evicts the least recently read entry.

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::debug;

/// A ttl of zero never expires.
pub const NEVER_EXPIRES: Duration = Duration::ZERO;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    deadline: Option<Instant>,
    last_access: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

pub struct TtlCache<K, V> {
    items: DashMap<K, Entry<V>>,
    capacity: Option<usize>,
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
            capacity: None,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: DashMap::with_capacity(capacity),
            capacity: Some(capacity.max(1)),
        }
    }

    pub fn add(&self, key: K, value: V, ttl: Duration) {
        let now = Instant::now();

        if let Some(cap) = self.capacity {
            if !self.items.contains_key(&key) && self.items.len() >= cap {
                self.purge_expired();
                if self.items.len() >= cap {
                    self.evict_least_recent();
                }
            }
        }

        let deadline = (ttl != NEVER_EXPIRES).then(|| now + ttl);
        self.items.insert(
            key,
            Entry {
                value,
                deadline,
                last_access: now,
            },
        );
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        if let Some(mut entry) = self.items.get_mut(key) {
            if !entry.is_expired(now) {
                entry.last_access = now;
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }

        // the guard is released above; re-check under the shard lock
        self.items.remove_if(key, |_, e| e.is_expired(now));
        None
    }

    pub fn delete(&self, key: &K) {
        self.items.remove(key);
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.items.len();
        self.items.retain(|_, e| !e.is_expired(now));
        let removed = before.saturating_sub(self.items.len());
        if removed > 0 {
            debug!("cache: purged {} expired entries", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }


    fn evict_least_recent(&self) {
        let oldest = self
            .items
            .iter()
            .min_by_key(|e| e.value().last_access)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.items.remove(&key);
        }
    }
}
