//! In-memory broker backend
//!
//! - Broadcast: `tokio::sync::broadcast` channels (fire-and-forget)
//! - Stream: `VecDeque` with per-group pending tracking (simulated consumer
//!   groups)
//!
//! Single-process only: a crash loses every unacknowledged stream message,
//! and there is no cross-process consumer coordination. Use the Redis
//! backend for anything that must survive a process restart or run on more
//! than one node.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{Notify, broadcast};

use super::backend::{
    BroadcastSubscription, BrokerBackend, StreamMessage, StreamStats, StreamSubscription,
};
use super::error::BrokerError;

const DEFAULT_BROADCAST_CAPACITY: usize = 10_000;
const DEFAULT_STREAM_MAX_LEN: usize = 100_000;

#[derive(Clone)]
struct StreamEntry {
    id: u64,
    payload: Vec<u8>,
}

#[derive(Clone, Default)]
struct ConsumerGroup {
    last_delivered: HashMap<String, u64>,
    pending: HashMap<u64, (String, Instant)>,
}

#[derive(Clone)]
struct StreamState {
    messages: VecDeque<StreamEntry>,
    groups: HashMap<String, ConsumerGroup>,
    next_id: u64,
    max_len: usize,
}

impl Default for StreamState {
    fn default() -> Self {
        Self {
            messages: VecDeque::new(),
            groups: HashMap::new(),
            next_id: 1,
            max_len: DEFAULT_STREAM_MAX_LEN,
        }
    }
}

struct SharedState {
    broadcast_channels: RwLock<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    streams: RwLock<HashMap<String, StreamState>>,
    stream_notifiers: RwLock<HashMap<String, Arc<Notify>>>,
    broadcast_capacity: usize,
}

pub struct MemoryBroker {
    state: Arc<SharedState>,
}

impl Clone for MemoryBroker {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SharedState {
                broadcast_channels: RwLock::new(HashMap::new()),
                streams: RwLock::new(HashMap::new()),
                stream_notifiers: RwLock::new(HashMap::new()),
                broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            }),
        }
    }

    fn get_or_create_broadcast(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        let channels = self.state.broadcast_channels.read();
        if let Some(sender) = channels.get(channel) {
            return sender.clone();
        }
        drop(channels);

        let mut channels = self.state.broadcast_channels.write();
        if let Some(sender) = channels.get(channel) {
            return sender.clone();
        }

        let (sender, _) = broadcast::channel(self.state.broadcast_capacity);
        channels.insert(channel.to_string(), sender.clone());
        sender
    }

    fn trim_stream(stream: &mut StreamState) {
        while stream.messages.len() > stream.max_len {
            if let Some(entry) = stream.messages.pop_front() {
                for group in stream.groups.values_mut() {
                    group.pending.remove(&entry.id);
                }
            }
        }
    }

    fn get_or_create_notifier(&self, stream: &str) -> Arc<Notify> {
        {
            let notifiers = self.state.stream_notifiers.read();
            if let Some(n) = notifiers.get(stream) {
                return Arc::clone(n);
            }
        }
        let mut notifiers = self.state.stream_notifiers.write();
        if let Some(n) = notifiers.get(stream) {
            return Arc::clone(n);
        }
        let n = Arc::new(Notify::new());
        notifiers.insert(stream.to_string(), Arc::clone(&n));
        n
    }
}

#[async_trait]
impl BrokerBackend for MemoryBroker {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let sender = self.get_or_create_broadcast(channel);
        let _ = sender.send(payload.to_vec());
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BroadcastSubscription, BrokerError> {
        let sender = self.get_or_create_broadcast(channel);
        let mut receiver = sender.subscribe();

        let stream = stream! {
            loop {
                match receiver.recv().await {
                    Ok(payload) => yield Ok(payload),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        yield Err(BrokerError::Lagged(n));
                    }
                }
            }
        };

        Ok(BroadcastSubscription {
            receiver: Box::pin(stream),
        })
    }

    async fn stream_publish(&self, stream: &str, payload: &[u8]) -> Result<String, BrokerError> {
        let id = {
            let mut streams = self.state.streams.write();
            let state = streams.entry(stream.to_string()).or_default();

            let id = state.next_id;
            state.next_id += 1;

            state.messages.push_back(StreamEntry {
                id,
                payload: payload.to_vec(),
            });

            Self::trim_stream(state);
            id
        };

        self.get_or_create_notifier(stream).notify_one();

        Ok(id.to_string())
    }

    async fn stream_subscribe(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<StreamSubscription, BrokerError> {
        {
            let mut streams = self.state.streams.write();
            let state = streams.entry(stream.to_string()).or_default();
            state.groups.entry(group.to_string()).or_default();
        }

        let stream_name = stream.to_string();
        let group = group.to_string();
        let consumer = consumer.to_string();
        let state = Arc::clone(&self.state);
        let notifier = self.get_or_create_notifier(&stream_name);

        let out = stream! {
            let mut last_seen: u64 = 0;

            {
                let streams = state.streams.read();
                if let Some(stream_state) = streams.get(&stream_name)
                    && let Some(cg) = stream_state.groups.get(&group)
                    && let Some(&last) = cg.last_delivered.get(&consumer)
                {
                    last_seen = last;
                }
            }

            loop {
                let (maybe_msg, stream_exists) = {
                    let mut streams = state.streams.write();
                    match streams.get_mut(&stream_name) {
                        None => (None, false),
                        Some(stream_state) => {
                            let cg = stream_state.groups.entry(group.clone()).or_default();

                            let mut found = None;
                            for entry in &stream_state.messages {
                                if entry.id > last_seen && !cg.pending.contains_key(&entry.id) {
                                    found = Some(entry.clone());
                                    break;
                                }
                            }

                            let msg = if let Some(entry) = found {
                                cg.pending.insert(entry.id, (consumer.clone(), Instant::now()));
                                cg.last_delivered.insert(consumer.clone(), entry.id);
                                last_seen = entry.id;
                                Some(StreamMessage {
                                    id: entry.id.to_string(),
                                    payload: entry.payload,
                                })
                            } else {
                                None
                            };
                            (msg, true)
                        }
                    }
                };

                if !stream_exists {
                    notifier.notified().await;
                    continue;
                }

                if let Some(msg) = maybe_msg {
                    yield Ok(msg);
                } else {
                    notifier.notified().await;
                }
            }
        };

        Ok(StreamSubscription {
            receiver: Box::pin(out),
        })
    }

    async fn stream_ack(&self, stream: &str, group: &str, id: &str) -> Result<(), BrokerError> {
        let id: u64 = id
            .parse()
            .map_err(|_| BrokerError::Stream(format!("invalid message id: {id}")))?;

        let mut streams = self.state.streams.write();
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| BrokerError::Stream(format!("stream not found: {stream}")))?;

        let cg = state
            .groups
            .get_mut(group)
            .ok_or_else(|| BrokerError::ConsumerGroup(format!("consumer group not found: {group}")))?;

        cg.pending.remove(&id);
        Ok(())
    }

    async fn stream_ack_batch(
        &self,
        stream: &str,
        group: &str,
        ids: &[String],
    ) -> Result<(), BrokerError> {
        for id in ids {
            self.stream_ack(stream, group, id).await?;
        }
        Ok(())
    }

    async fn stream_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamMessage>, BrokerError> {
        let mut streams = self.state.streams.write();
        let state = match streams.get_mut(stream) {
            Some(s) => s,
            None => return Ok(vec![]),
        };

        let cg = match state.groups.get_mut(group) {
            Some(g) => g,
            None => return Ok(vec![]),
        };

        let now = Instant::now();
        let min_idle = std::time::Duration::from_millis(min_idle_ms);

        let idle_ids: Vec<u64> = cg
            .pending
            .iter()
            .filter(|(_, (_, delivery_time))| now.duration_since(*delivery_time) >= min_idle)
            .map(|(&id, _)| id)
            .take(count)
            .collect();

        let mut claimed = Vec::new();
        for id in idle_ids {
            if let Some(entry) = state.messages.iter().find(|e| e.id == id) {
                cg.pending.insert(id, (consumer.to_string(), Instant::now()));
                claimed.push(StreamMessage {
                    id: id.to_string(),
                    payload: entry.payload.clone(),
                });
            }
        }

        Ok(claimed)
    }

    async fn stream_stats(&self, stream: &str, group: &str) -> Result<StreamStats, BrokerError> {
        let streams = self.state.streams.read();
        let state = match streams.get(stream) {
            Some(s) => s,
            None => return Ok(StreamStats::default()),
        };

        let cg = match state.groups.get(group) {
            Some(g) => g,
            None => {
                return Ok(StreamStats {
                    length: state.messages.len() as u64,
                    ..Default::default()
                });
            }
        };

        let now = Instant::now();
        let oldest_pending_ms = cg
            .pending
            .values()
            .map(|(_, delivery_time)| now.duration_since(*delivery_time).as_millis() as u64)
            .max();

        Ok(StreamStats {
            length: state.messages.len() as u64,
            pending: cg.pending.len() as u64,
            consumers: cg.last_delivered.len() as u64,
            oldest_pending_ms,
        })
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn broadcast_publish_reaches_subscriber() {
        let backend = MemoryBroker::new();

        let sub = backend.subscribe("test").await.unwrap();
        let mut receiver = sub.receiver;

        backend.publish("test", b"hello").await.unwrap();

        let msg = tokio::time::timeout(tokio::time::Duration::from_millis(100), receiver.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(msg, b"hello");
    }

    #[tokio::test]
    async fn stream_publish_subscribe_ack_clears_pending() {
        let backend = MemoryBroker::new();

        let id = backend.stream_publish("stream", b"msg1").await.unwrap();
        assert_eq!(id, "1");

        let sub = backend
            .stream_subscribe("stream", "group1", "consumer1")
            .await
            .unwrap();
        let mut receiver = sub.receiver;

        let msg = tokio::time::timeout(tokio::time::Duration::from_millis(500), receiver.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(msg.id, "1");
        assert_eq!(msg.payload, b"msg1");

        backend.stream_ack("stream", "group1", &msg.id).await.unwrap();

        let stats = backend.stream_stats("stream", "group1").await.unwrap();
        assert_eq!(stats.length, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn unacked_message_becomes_claimable() {
        let backend = MemoryBroker::new();
        backend.stream_publish("s", b"m").await.unwrap();

        let sub = backend.stream_subscribe("s", "g", "c1").await.unwrap();
        let mut receiver = sub.receiver;
        let msg = tokio::time::timeout(tokio::time::Duration::from_millis(500), receiver.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let claimed = backend.stream_claim("s", "g", "c2", 0, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, msg.id);
    }

    #[test]
    fn backend_name_is_memory() {
        assert_eq!(MemoryBroker::new().backend_name(), "memory");
    }
}
