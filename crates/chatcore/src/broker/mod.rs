//! Message broker
//!
//! Provides the durable queues and the broadcast fanout channels the chat
//! system runs on, over a pluggable backend:
//! - In-memory (default) — local-only, for development and tests
//! - Redis — Streams for queues, Pub/Sub for broadcast, for the
//!   horizontally-scaled deployment
//!
//! Two topic shapes, both typed over `Serialize + DeserializeOwned` and
//! encoded with MessagePack:
//!
//! - [`StreamTopic`]: at-least-once, consumer-group delivery with explicit
//!   ack/claim. Used for `chat.ingress`, `read.receipts`, `typing.events`,
//!   and `push.shared`.
//! - [`BroadcastTopic`]: fire-and-forget fanout. Used for the per-chat
//!   delivery channel and the per-user private channel.

mod backend;
mod error;
mod memory;
mod pubsub;
mod redis;

use std::marker::PhantomData;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use backend::{BroadcastSubscription, BrokerBackend, StreamMessage, StreamStats, StreamSubscription};
pub use error::BrokerError;
use memory::MemoryBroker;

use crate::cache::{CacheBackendType, CacheConfig};

/// Broker service: holds the backend and mints typed topic handles.
///
/// Mirrors the cache service's backend selection (`CacheBackendType` also
/// gates the broker, per the shared `memory`/`redis` switch).
pub struct BrokerService {
    backend: Arc<dyn BrokerBackend>,
}

impl std::fmt::Debug for BrokerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerService")
            .field("backend", &self.backend.backend_name())
            .finish()
    }
}

impl BrokerService {
    pub fn memory() -> Self {
        Self {
            backend: Arc::new(MemoryBroker::new()),
        }
    }

    pub async fn from_cache_config(cache_config: &CacheConfig) -> Result<Self, BrokerError> {
        let backend: Arc<dyn BrokerBackend> = match cache_config.backend {
            CacheBackendType::Memory => Arc::new(MemoryBroker::new()),
            CacheBackendType::Redis => {
                let url = cache_config.redis_url.as_ref().ok_or_else(|| {
                    BrokerError::Config("redis_url required for redis backend".into())
                })?;
                Arc::new(redis::RedisBroker::new(url).await?)
            }
        };

        Ok(Self { backend })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// A stream topic for at-least-once, consumer-group delivery.
    pub fn stream_topic<T>(&self, name: &str) -> StreamTopic<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        StreamTopic {
            name: name.to_string(),
            backend: Arc::clone(&self.backend),
            _phantom: PhantomData,
        }
    }

    /// A broadcast topic for fire-and-forget fanout.
    pub fn broadcast_topic<T>(&self, name: &str) -> BroadcastTopic<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        BroadcastTopic {
            name: name.to_string(),
            backend: Arc::clone(&self.backend),
            _phantom: PhantomData,
        }
    }

    pub async fn stream_stats(&self, stream: &str, group: &str) -> Result<StreamStats, BrokerError> {
        self.backend.stream_stats(stream, group).await
    }

    pub async fn health_check(&self) -> Result<(), BrokerError> {
        self.backend.health_check().await
    }
}

/// Stream topic for at-least-once delivery with consumer-group fan-out.
pub struct StreamTopic<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    name: String,
    backend: Arc<dyn BrokerBackend>,
    _phantom: PhantomData<T>,
}

impl<T> StreamTopic<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub async fn publish(&self, msg: &T) -> Result<String, BrokerError> {
        let payload =
            rmp_serde::to_vec(msg).map_err(|e| BrokerError::Serialization(e.to_string()))?;
        self.backend.stream_publish(&self.name, &payload).await
    }

    pub async fn subscribe(
        &self,
        group: &str,
        consumer: &str,
    ) -> Result<StreamTopicSubscriber<T>, BrokerError> {
        let subscription = self.backend.stream_subscribe(&self.name, group, consumer).await?;
        Ok(StreamTopicSubscriber {
            name: self.name.clone(),
            group: group.to_string(),
            backend: Arc::clone(&self.backend),
            subscription,
            _phantom: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Acker for a stream topic's consumer group, independently cloneable and
/// `Send + Sync` so it can be handed to a task that processes messages
/// concurrently with the subscriber loop.
#[derive(Clone)]
pub struct StreamAcker {
    name: String,
    group: String,
    backend: Arc<dyn BrokerBackend>,
}

impl StreamAcker {
    pub async fn ack(&self, id: &str) -> Result<(), BrokerError> {
        self.backend.stream_ack(&self.name, &self.group, id).await
    }

    pub async fn ack_batch(&self, ids: &[String]) -> Result<(), BrokerError> {
        self.backend.stream_ack_batch(&self.name, &self.group, ids).await
    }
}

/// Claimer for recovering messages abandoned by a crashed consumer.
#[derive(Clone)]
pub struct StreamClaimer {
    name: String,
    group: String,
    backend: Arc<dyn BrokerBackend>,
}

impl StreamClaimer {
    pub async fn claim(
        &self,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamMessage>, BrokerError> {
        self.backend
            .stream_claim(&self.name, &self.group, consumer, min_idle_ms, count)
            .await
    }
}

pub struct StreamTopicSubscriber<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    name: String,
    group: String,
    backend: Arc<dyn BrokerBackend>,
    subscription: StreamSubscription,
    _phantom: PhantomData<T>,
}

impl<T> StreamTopicSubscriber<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Returns `(message_id, message)`. Ack with `acker().ack(message_id)`
    /// after processing.
    pub async fn recv(&mut self) -> Result<(String, T), BrokerError> {
        if let Some(result) = self.subscription.receiver.next().await {
            let msg = result?;
            let decoded: T = rmp_serde::from_slice(&msg.payload)
                .map_err(|e| BrokerError::Serialization(e.to_string()))?;
            Ok((msg.id, decoded))
        } else {
            Err(BrokerError::ChannelClosed)
        }
    }

    pub fn acker(&self) -> StreamAcker {
        StreamAcker {
            name: self.name.clone(),
            group: self.group.clone(),
            backend: Arc::clone(&self.backend),
        }
    }

    pub fn claimer(&self) -> StreamClaimer {
        StreamClaimer {
            name: self.name.clone(),
            group: self.group.clone(),
            backend: Arc::clone(&self.backend),
        }
    }
}

/// Broadcast topic for fire-and-forget fanout.
pub struct BroadcastTopic<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    name: String,
    backend: Arc<dyn BrokerBackend>,
    _phantom: PhantomData<T>,
}

impl<T> BroadcastTopic<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub async fn publish(&self, msg: &T) -> Result<(), BrokerError> {
        let payload =
            rmp_serde::to_vec(msg).map_err(|e| BrokerError::Serialization(e.to_string()))?;
        self.backend.publish(&self.name, &payload).await
    }

    pub async fn subscribe(&self) -> Result<BroadcastTopicSubscriber<T>, BrokerError> {
        let subscription = self.backend.subscribe(&self.name).await?;
        Ok(BroadcastTopicSubscriber {
            subscription,
            _phantom: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct BroadcastTopicSubscriber<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    subscription: BroadcastSubscription,
    _phantom: PhantomData<T>,
}

impl<T> BroadcastTopicSubscriber<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub async fn recv(&mut self) -> Result<T, BrokerError> {
        if let Some(result) = self.subscription.receiver.next().await {
            let payload = result?;
            let decoded: T = rmp_serde::from_slice(&payload)
                .map_err(|e| BrokerError::Serialization(e.to_string()))?;
            Ok(decoded)
        } else {
            Err(BrokerError::ChannelClosed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Probe {
        value: i64,
    }

    #[tokio::test]
    async fn broadcast_topic_roundtrips_typed_payload() {
        let service = BrokerService::memory();
        let topic = service.broadcast_topic::<Probe>("chat.1");
        let mut sub = topic.subscribe().await.unwrap();

        topic.publish(&Probe { value: 42 }).await.unwrap();

        let received = sub.recv().await.unwrap();
        assert_eq!(received, Probe { value: 42 });
    }

    #[tokio::test]
    async fn stream_topic_ack_removes_pending() {
        let service = BrokerService::memory();
        let topic = service.stream_topic::<Probe>("chat.ingress");

        topic.publish(&Probe { value: 7 }).await.unwrap();

        let mut sub = topic.subscribe("chat-workers", "worker-1").await.unwrap();
        let (id, msg) = sub.recv().await.unwrap();
        assert_eq!(msg, Probe { value: 7 });

        sub.acker().ack(&id).await.unwrap();

        let stats = service.stream_stats("chat.ingress", "chat-workers").await.unwrap();
        assert_eq!(stats.pending, 0);
    }
}
