//! Broker error types

use std::fmt;

#[derive(Debug)]
pub enum BrokerError {
    ChannelClosed,
    BufferFull,
    Lagged(u64),
    Connection(String),
    Serialization(String),
    Stream(String),
    ConsumerGroup(String),
    Config(String),
}

impl std::error::Error for BrokerError {}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::ChannelClosed => write!(f, "channel closed"),
            BrokerError::BufferFull => write!(f, "buffer full"),
            BrokerError::Lagged(n) => write!(f, "receiver lagged by {n} messages"),
            BrokerError::Connection(msg) => write!(f, "connection error: {msg}"),
            BrokerError::Serialization(msg) => write!(f, "serialization error: {msg}"),
            BrokerError::Stream(msg) => write!(f, "stream error: {msg}"),
            BrokerError::ConsumerGroup(msg) => write!(f, "consumer group error: {msg}"),
            BrokerError::Config(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl From<tokio::sync::broadcast::error::RecvError> for BrokerError {
    fn from(err: tokio::sync::broadcast::error::RecvError) -> Self {
        match err {
            tokio::sync::broadcast::error::RecvError::Closed => BrokerError::ChannelClosed,
            tokio::sync::broadcast::error::RecvError::Lagged(n) => BrokerError::Lagged(n),
        }
    }
}

impl From<deadpool_redis::PoolError> for BrokerError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        BrokerError::Connection(err.to_string())
    }
}

impl From<deadpool_redis::redis::RedisError> for BrokerError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        BrokerError::Stream(err.to_string())
    }
}
