//! Broker backend trait definition
//!
//! Two delivery semantics, mirroring the cache backend's memory/Redis split:
//! - Broadcast (Pub/Sub): fire-and-forget, all active subscribers receive
//! - Stream: at-least-once, one consumer per message, ack required

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::error::BrokerError;

#[derive(Debug, Clone)]
pub struct StreamMessage {
    /// Redis stream ID or memory sequence number, as a string.
    pub id: String,
    pub payload: Vec<u8>,
}

pub struct BroadcastSubscription {
    pub receiver: Pin<Box<dyn Stream<Item = Result<Vec<u8>, BrokerError>> + Send>>,
}

pub struct StreamSubscription {
    pub receiver: Pin<Box<dyn Stream<Item = Result<StreamMessage, BrokerError>> + Send>>,
}

#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub length: u64,
    pub pending: u64,
    pub consumers: u64,
    pub oldest_pending_ms: Option<u64>,
}

/// Pluggable broker backend. Both the in-memory and Redis backends implement
/// this; callers depend only on the trait, never on a concrete backend.
///
/// - **Broadcast topics**: `publish`/`subscribe`. Best-effort, no persistence
///   — if there are no subscribers, the message is dropped. Used for the
///   delivery fanout channel and per-user private channel.
/// - **Stream topics**: `stream_publish`/`stream_subscribe`/`stream_ack`/
///   `stream_claim`. At-least-once with acknowledgment; messages persist
///   until acked. Used for the ingress queue, receipt and typing buses, and
///   the push dead-letter-capable queue.
#[async_trait]
pub trait BrokerBackend: Send + Sync {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), BrokerError>;

    async fn subscribe(&self, channel: &str) -> Result<BroadcastSubscription, BrokerError>;

    async fn stream_publish(&self, stream: &str, payload: &[u8]) -> Result<String, BrokerError>;

    async fn stream_subscribe(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<StreamSubscription, BrokerError>;

    async fn stream_ack(&self, stream: &str, group: &str, id: &str) -> Result<(), BrokerError>;

    async fn stream_ack_batch(
        &self,
        stream: &str,
        group: &str,
        ids: &[String],
    ) -> Result<(), BrokerError>;

    /// Claim pending messages idle longer than `min_idle_ms` (consumer crash
    /// recovery). Returns messages now owned by `consumer`.
    async fn stream_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamMessage>, BrokerError>;

    async fn stream_stats(&self, stream: &str, group: &str) -> Result<StreamStats, BrokerError>;

    async fn health_check(&self) -> Result<(), BrokerError>;

    fn backend_name(&self) -> &'static str;
}
