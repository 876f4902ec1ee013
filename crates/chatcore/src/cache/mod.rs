//! Cache module
//!
//! Provides caching infrastructure with pluggable backends:
//! - In-memory (default) — uses moka + dashmap, single process only
//! - Redis — uses deadpool-redis, shared across the fleet
//!
//! Also provides rate limiting and the connection/presence/group-member
//! registries built on top of the cache backend.

mod backend;
mod error;
pub mod key;
mod memory;
pub mod rate_limiter;
mod redis;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use backend::CacheBackend;
pub use error::CacheError;
pub use key::CacheKey;
pub use rate_limiter::{RateLimitBucket, RateLimitResult, RateLimiter};

use memory::InMemoryCache;

/// Which cache backend to instantiate, selected by `CACHE_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendType {
    Memory,
    Redis,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendType,
    pub max_entries: u64,
    pub redis_url: Option<String>,
}

impl CacheConfig {
    pub fn memory(max_entries: u64) -> Self {
        Self {
            backend: CacheBackendType::Memory,
            max_entries,
            redis_url: None,
        }
    }

    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            backend: CacheBackendType::Redis,
            max_entries: 0,
            redis_url: Some(url.into()),
        }
    }
}

/// Cache service providing typed access to the underlying cache backend.
///
/// Wraps a `dyn CacheBackend` and provides:
/// - Raw bytes API for flexibility
/// - Typed API using MessagePack serialization
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("backend", &self.backend.backend_name())
            .finish()
    }
}

impl CacheService {
    pub async fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        let backend: Arc<dyn CacheBackend> = match config.backend {
            CacheBackendType::Memory => {
                tracing::debug!(max_entries = config.max_entries, "initializing in-memory cache");
                Arc::new(InMemoryCache::new(config.max_entries))
            }
            CacheBackendType::Redis => {
                let url = config.redis_url.as_ref().ok_or_else(|| {
                    CacheError::Backend("redis_url required for redis backend".into())
                })?;
                Arc::new(redis::RedisCache::new(url).await?)
            }
        };

        Ok(Self { backend })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    // =========================================================================
    // Raw bytes API
    // =========================================================================

    pub async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.backend.get(key).await
    }

    pub async fn set_raw(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.backend.set(key, value, ttl).await
    }

    // =========================================================================
    // Typed API (MessagePack)
    // =========================================================================

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get_raw(key).await? {
            Some(bytes) => {
                let value = rmp_serde::from_slice(&bytes)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let bytes =
            rmp_serde::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set_raw(key, bytes, ttl).await
    }

    // =========================================================================
    // Other operations
    // =========================================================================

    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.backend.delete(key).await
    }

    /// Delete a key, logging but not propagating failures. Use for
    /// invalidate-on-write where a stale entry just means an extra DB hit on
    /// next read, not a correctness problem.
    pub async fn invalidate_key(&self, key: &str) {
        if let Err(e) = self.backend.delete(key).await {
            tracing::warn!(key = %key, error = %e, "cache invalidation failed");
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.backend.exists(key).await
    }

    pub async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CacheError> {
        self.backend.incr(key, ttl).await
    }

    pub async fn get_counter(&self, key: &str) -> Result<Option<i64>, CacheError> {
        self.backend.get_counter(key).await
    }

    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        self.backend.ttl(key).await
    }

    pub async fn set_add(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.backend.set_add(key, member).await
    }

    pub async fn set_remove(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.backend.set_remove(key, member).await
    }

    pub async fn set_members(&self, key: &str) -> Result<Option<Vec<String>>, CacheError> {
        self.backend.set_members(key).await
    }

    pub async fn health_check(&self) -> Result<(), CacheError> {
        self.backend.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CacheConfig {
        CacheConfig::memory(1000)
    }

    #[tokio::test]
    async fn backend_name_reflects_config() {
        let service = CacheService::new(&test_config()).await.unwrap();
        assert_eq!(service.backend_name(), "memory");
    }

    #[tokio::test]
    async fn typed_get_set_roundtrips() {
        let service = CacheService::new(&test_config()).await.unwrap();

        #[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
        struct Probe {
            id: i64,
            name: String,
        }

        let probe = Probe {
            id: 1,
            name: "a".to_string(),
        };

        service.set("probe:1", &probe, None).await.unwrap();
        let fetched: Option<Probe> = service.get("probe:1").await.unwrap();
        assert_eq!(fetched, Some(probe));
    }

    #[tokio::test]
    async fn health_check_passes_for_memory_backend() {
        let service = CacheService::new(&test_config()).await.unwrap();
        assert!(service.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn group_member_set_survives_add_remove() {
        let service = CacheService::new(&test_config()).await.unwrap();
        let key = CacheKey::group_members(1);

        assert_eq!(service.set_members(&key).await.unwrap(), None);
        service.set_add(&key, "1").await.unwrap();
        service.set_add(&key, "2").await.unwrap();
        service.set_remove(&key, "1").await.unwrap();
        assert_eq!(service.set_members(&key).await.unwrap(), Some(vec!["2".to_string()]));
    }
}
