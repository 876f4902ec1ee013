//! In-memory cache implementation using moka + dashmap
//!
//! Used for local development and tests; production fleets run the Redis
//! backend so the keyspace is actually shared across pods.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use moka::Expiry;
use moka::future::Cache;
use parking_lot::Mutex;

use super::backend::CacheBackend;
use super::error::CacheError;

#[derive(Clone)]
struct CacheEntry {
    data: Vec<u8>,
    ttl: Option<Duration>,
}

struct VariableTtlExpiry;

impl Expiry<String, CacheEntry> for VariableTtlExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

struct CounterEntry {
    count: AtomicI64,
    expires_at: Instant,
}

pub struct InMemoryCache {
    cache: Cache<String, CacheEntry>,
    counters: DashMap<String, CounterEntry>,
    sets: Mutex<std::collections::HashMap<String, HashSet<String>>>,
}

impl InMemoryCache {
    pub fn new(max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(VariableTtlExpiry)
            .build();

        Self {
            cache,
            counters: DashMap::new(),
            sets: Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.cache.get(key).await.map(|e| e.data))
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.cache
            .insert(key.to_string(), CacheEntry { data: value, ttl })
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let existed = self.cache.contains_key(key);
        self.cache.invalidate(key).await;
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.cache.contains_key(key))
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CacheError> {
        let now = Instant::now();
        let ttl_duration = ttl.unwrap_or(Duration::from_secs(60));
        let expires_at = now + ttl_duration;

        let count = match self.counters.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let counter = occupied.get_mut();
                if now >= counter.expires_at {
                    counter.count.store(1, Ordering::SeqCst);
                    counter.expires_at = expires_at;
                    1
                } else {
                    counter.count.fetch_add(1, Ordering::SeqCst) + 1
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CounterEntry {
                    count: AtomicI64::new(1),
                    expires_at,
                });
                1
            }
        };
        Ok(count)
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>, CacheError> {
        let now = Instant::now();
        Ok(self.counters.get(key).and_then(|entry| {
            if now >= entry.expires_at {
                None
            } else {
                Some(entry.count.load(Ordering::SeqCst))
            }
        }))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        if let Some(entry) = self.counters.get(key) {
            let now = Instant::now();
            if entry.expires_at > now {
                return Ok(Some(entry.expires_at - now));
            }
        }
        Ok(None)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.sets
            .lock()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), CacheError> {
        if let Some(set) = self.sets.lock().get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Option<Vec<String>>, CacheError> {
        Ok(self
            .sets
            .lock()
            .get(key)
            .map(|set| set.iter().cloned().collect()))
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get_roundtrip() {
        let cache = InMemoryCache::new(1000);
        cache.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn incr_resets_after_window() {
        let cache = InMemoryCache::new(1000);
        assert_eq!(
            cache.incr("c", Some(Duration::from_millis(20))).await.unwrap(),
            1
        );
        assert_eq!(
            cache.incr("c", Some(Duration::from_millis(20))).await.unwrap(),
            2
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            cache.incr("c", Some(Duration::from_millis(20))).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn set_members_distinguishes_miss_from_empty() {
        let cache = InMemoryCache::new(1000);
        assert_eq!(cache.set_members("grp:1").await.unwrap(), None);
        cache.set_add("grp:1", "7").await.unwrap();
        cache.set_add("grp:1", "9").await.unwrap();
        let mut members = cache.set_members("grp:1").await.unwrap().unwrap();
        members.sort();
        assert_eq!(members, vec!["7".to_string(), "9".to_string()]);
        cache.set_remove("grp:1", "7").await.unwrap();
        assert_eq!(
            cache.set_members("grp:1").await.unwrap(),
            Some(vec!["9".to_string()])
        );
    }
}
