//! Cache backend trait definition
//!
//! Defines the interface for cache implementations. Both the in-memory and
//! Redis backends implement this trait; callers depend only on this trait,
//! never on a concrete backend.
//!
//! # Consistency notes
//!
//! Operations on individual keys are atomic, but the return values of some
//! operations (`delete`, `exists`) may be stale under concurrent access.
//! That's acceptable for the connection registry and presence registry,
//! both of which are eventually-consistent by construction (TTL-bounded).

use std::time::Duration;

use async_trait::async_trait;

use super::error::CacheError;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value from the cache.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Set a value in the cache with an optional TTL.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
    -> Result<(), CacheError>;

    /// Delete a key. Returns `true` if the key existed before deletion.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Atomic increment with TTL (creates the key at 1 if absent). Used for
    /// rate limiting; must be atomic to avoid a check-then-act race.
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CacheError>;

    /// Read the current counter value without incrementing.
    async fn get_counter(&self, key: &str) -> Result<Option<i64>, CacheError>;

    /// Remaining TTL for a key, if any.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// Add a member to a set stored at `key` (used for the group-member cache).
    async fn set_add(&self, key: &str, member: &str) -> Result<(), CacheError>;

    /// Remove a member from a set stored at `key`.
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), CacheError>;

    /// Read all members of a set stored at `key`. `None` means the key is
    /// absent (a cache miss, distinct from an empty set).
    async fn set_members(&self, key: &str) -> Result<Option<Vec<String>>, CacheError>;

    /// Health check (validates connectivity).
    async fn health_check(&self) -> Result<(), CacheError>;

    /// Backend name, for logging.
    fn backend_name(&self) -> &'static str;
}
