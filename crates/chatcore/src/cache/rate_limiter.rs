//! Rate limiter using the cache backend
//!
//! Implements a fixed window counter algorithm with burst allowance.
//!
//! # Algorithm
//!
//! Fixed time windows (default 60 seconds) with atomic counters. Each window
//! starts when the first request arrives and resets after the window
//! duration expires.
//!
//! # Known limitations
//!
//! Fixed window algorithms allow up to 2x the limit at window boundaries
//! (e.g. the full burst at the last second of one window, then again at the
//! first second of the next). Acceptable here since the limiter guards
//! per-IP WebSocket upgrade attempts, not a shared resource.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::CacheService;
use super::key::CacheKey;
use crate::constants::DEFAULT_RATE_LIMIT_WINDOW_SECS;

#[derive(Debug, Clone)]
pub struct RateLimitBucket {
    pub name: &'static str,
    pub requests_per_window: u32,
    pub window_secs: u64,
    pub burst: u32,
}

impl RateLimitBucket {
    /// Per-IP WebSocket upgrade attempts per minute (§6.3 `WS_RATE_LIMIT`).
    pub fn ws(rpm: u32) -> Self {
        Self {
            name: "ws",
            requests_per_window: rpm,
            window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
            burst: rpm / 10, // 10% burst
        }
    }

    pub fn total_limit(&self) -> u32 {
        self.requests_per_window.saturating_add(self.burst)
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
    pub reset_at: u64,
    pub retry_after: Option<u64>,
}

pub struct RateLimiter {
    cache: Arc<CacheService>,
}

impl RateLimiter {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self { cache }
    }

    pub async fn check(&self, bucket: &RateLimitBucket, identifier: &str) -> RateLimitResult {
        let key = CacheKey::rate_limit(bucket.name, identifier);
        let window_duration = Duration::from_secs(bucket.window_secs);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "system clock is before unix epoch");
                0
            });

        let count = match self.cache.incr(&key, Some(window_duration)).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(
                    bucket = bucket.name,
                    %identifier,
                    error = %e,
                    "rate limit cache increment failed, allowing request"
                );
                1
            }
        };

        let limit = bucket.total_limit();
        let limit_i64 = i64::from(limit);
        let allowed = count <= limit_i64;
        let remaining = limit_i64.saturating_sub(count).try_into().unwrap_or(0u32);

        let ttl = self.cache.ttl(&key).await.ok().flatten();
        let reset_at = now.saturating_add(ttl.map(|d| d.as_secs()).unwrap_or(bucket.window_secs));

        tracing::trace!(
            bucket = bucket.name,
            %identifier,
            count,
            limit,
            allowed,
            "rate limit check"
        );

        RateLimitResult {
            allowed,
            remaining,
            limit,
            reset_at,
            retry_after: if allowed {
                None
            } else {
                Some(reset_at.saturating_sub(now))
            },
        }
    }

    /// Check if identifier is over budget WITHOUT consuming it.
    pub async fn is_blocked(&self, bucket: &RateLimitBucket, identifier: &str) -> bool {
        let key = CacheKey::rate_limit(bucket.name, identifier);

        let count = match self.cache.get_counter(&key).await {
            Ok(Some(c)) => c,
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(
                    bucket = bucket.name,
                    %identifier,
                    error = %e,
                    "rate limit cache read failed, assuming not blocked"
                );
                0
            }
        };

        count > i64::from(bucket.total_limit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;

    async fn test_cache() -> Arc<CacheService> {
        Arc::new(CacheService::new(&CacheConfig::memory(1000)).await.unwrap())
    }

    #[tokio::test]
    async fn allows_requests_under_limit() {
        let cache = test_cache().await;
        let limiter = RateLimiter::new(cache);
        let bucket = RateLimitBucket::ws(100);

        for i in 0..50 {
            let result = limiter.check(&bucket, "conn-1").await;
            assert!(result.allowed, "request {i} should be allowed");
            assert!(result.retry_after.is_none());
        }
    }

    #[tokio::test]
    async fn blocks_requests_over_limit() {
        let cache = test_cache().await;
        let limiter = RateLimiter::new(cache);
        let bucket = RateLimitBucket {
            name: "test",
            requests_per_window: 5,
            window_secs: 60,
            burst: 0,
        };

        for _ in 0..5 {
            assert!(limiter.check(&bucket, "conn-2").await.allowed);
        }
        let blocked = limiter.check(&bucket, "conn-2").await;
        assert!(!blocked.allowed);
        assert!(blocked.retry_after.is_some());
    }

    #[tokio::test]
    async fn is_blocked_does_not_consume_budget() {
        let cache = test_cache().await;
        let limiter = RateLimiter::new(cache);
        let bucket = RateLimitBucket {
            name: "test2",
            requests_per_window: 2,
            window_secs: 60,
            burst: 0,
        };

        assert!(!limiter.is_blocked(&bucket, "conn-3").await);
        assert!(limiter.check(&bucket, "conn-3").await.allowed);
        assert!(limiter.check(&bucket, "conn-3").await.allowed);
        assert!(limiter.is_blocked(&bucket, "conn-3").await);
    }
}
