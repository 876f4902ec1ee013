//! Cache error types

use std::fmt;

#[derive(Debug)]
pub enum CacheError {
    Connection(String),
    Serialization(String),
    Timeout,
    Backend(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Connection(msg) => write!(f, "cache connection error: {msg}"),
            CacheError::Serialization(msg) => write!(f, "cache serialization error: {msg}"),
            CacheError::Timeout => write!(f, "cache operation timed out"),
            CacheError::Backend(msg) => write!(f, "cache backend error: {msg}"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        CacheError::Connection(err.to_string())
    }
}

impl From<deadpool_redis::redis::RedisError> for CacheError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}
