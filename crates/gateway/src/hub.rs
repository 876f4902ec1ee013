//! Pod-local subscriber index and broker fan-out (§4.1 binding lifecycle,
//! §4.2 Fan-out from broker, §5 per-resource ownership).
//!
//! Two kinds of logical channel share one mechanism here: `chat.<id>` (the
//! delivery topic) and `user.<id>` (the private per-user channel the chat
//! worker addresses error and presence frames to). Both are reference-
//! counted broadcast subscriptions: the first local connection to join a
//! channel spawns a task that forwards every message on that channel to
//! whichever local connections are currently subscribed; the last one to
//! leave tears the task down again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chatcore::broker::BrokerService;
use chatcore::wire::ServerFrame;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::outbound::OutboundQueue;

pub type ConnId = Uuid;

struct ChannelState {
    subscribers: HashSet<ConnId>,
    task: JoinHandle<()>,
}

pub struct Hub {
    broker: Arc<BrokerService>,
    channels: RwLock<HashMap<String, ChannelState>>,
    connections: RwLock<HashMap<ConnId, Arc<OutboundQueue>>>,
}

impl Hub {
    pub fn new(broker: Arc<BrokerService>) -> Arc<Self> {
        Arc::new(Self {
            broker,
            channels: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
        })
    }

    pub fn register_connection(&self, conn_id: ConnId, queue: Arc<OutboundQueue>) {
        self.connections.write().insert(conn_id, queue);
    }

    /// Subscribe `conn_id` to `channel` (`chat.<id>` or `user.<id>`).
    /// Idempotent: joining a channel already joined by this connection is a
    /// no-op.
    pub fn subscribe(self: &Arc<Self>, conn_id: ConnId, channel: &str) {
        let mut channels = self.channels.write();
        if let Some(state) = channels.get_mut(channel) {
            state.subscribers.insert(conn_id);
            return;
        }

        let mut subscribers = HashSet::new();
        subscribers.insert(conn_id);
        let task = self.spawn_fanout_task(channel.to_string());
        channels.insert(channel.to_string(), ChannelState { subscribers, task });
    }

    /// Leave `channel`. When the local subscriber count drops to zero, the
    /// pod's broker subscription for that channel is torn down.
    pub fn unsubscribe(&self, conn_id: ConnId, channel: &str) {
        let mut channels = self.channels.write();
        let Some(state) = channels.get_mut(channel) else {
            return;
        };
        state.subscribers.remove(&conn_id);
        if state.subscribers.is_empty() {
            if let Some(state) = channels.remove(channel) {
                state.task.abort();
            }
        }
    }

    /// Remove a connection entirely: drop it from every channel it was
    /// subscribed to (tearing down now-empty channels) and from the
    /// connection registry.
    pub fn remove_connection(&self, conn_id: ConnId) {
        let mut channels = self.channels.write();
        let mut emptied = Vec::new();
        for (name, state) in channels.iter_mut() {
            state.subscribers.remove(&conn_id);
            if state.subscribers.is_empty() {
                emptied.push(name.clone());
            }
        }
        for name in emptied {
            if let Some(state) = channels.remove(&name) {
                state.task.abort();
            }
        }
        drop(channels);
        self.connections.write().remove(&conn_id);
    }

    fn snapshot(&self, channel: &str) -> Vec<ConnId> {
        self.channels
            .read()
            .get(channel)
            .map(|s| s.subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Push `frame` onto every local connection currently subscribed to
    /// `channel`. Per-connection order is preserved because each
    /// connection's write pump is the sole consumer of its queue;
    /// cross-connection order is unspecified. A connection whose queue is
    /// still full after the oldest droppable frame is evicted gets closed
    /// (backpressure policy, §4.2) rather than silently starved.
    fn fanout_local(&self, channel: &str, frame: ServerFrame) {
        let targets = self.snapshot(channel);
        if targets.is_empty() {
            return;
        }
        let connections = self.connections.read();
        for conn_id in targets {
            if let Some(queue) = connections.get(&conn_id)
                && !queue.push(frame.clone())
            {
                queue.close();
            }
        }
    }

    fn spawn_fanout_task(self: &Arc<Self>, channel: String) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        let topic = self.broker.broadcast_topic::<ServerFrame>(&channel);
        tokio::spawn(async move {
            let mut subscriber = match topic.subscribe().await {
                Ok(s) => s,
                Err(err) => {
                    tracing::error!(channel = %channel, error = %err, "fanout subscribe failed");
                    return;
                }
            };
            loop {
                match subscriber.recv().await {
                    Ok(frame) => hub.fanout_local(&channel, frame),
                    Err(err) => {
                        tracing::warn!(channel = %channel, error = %err, "fanout channel closed");
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatcore::broker::BrokerService;
    use std::time::Duration;

    fn frame(chat_id: i64) -> ServerFrame {
        ServerFrame::Typing { chat_id, user_id: 1 }
    }

    #[tokio::test]
    async fn subscribed_connection_receives_broker_publish() {
        let broker = Arc::new(BrokerService::memory());
        let hub = Hub::new(Arc::clone(&broker));
        let conn = Uuid::new_v4();
        let queue = Arc::new(OutboundQueue::new());
        hub.register_connection(conn, Arc::clone(&queue));
        hub.subscribe(conn, "chat.1");

        let topic = broker.broadcast_topic::<ServerFrame>("chat.1");
        // give the fan-out task a tick to subscribe before publishing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        topic.publish(&frame(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let received = queue.pop().await;
        assert_eq!(received, Some(frame(1)));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let broker = Arc::new(BrokerService::memory());
        let hub = Hub::new(Arc::clone(&broker));
        let conn = Uuid::new_v4();
        let queue = Arc::new(OutboundQueue::new());
        hub.register_connection(conn, Arc::clone(&queue));
        hub.subscribe(conn, "chat.2");
        tokio::time::sleep(Duration::from_millis(20)).await;

        hub.unsubscribe(conn, "chat.2");

        let topic = broker.broadcast_topic::<ServerFrame>("chat.2");
        topic.publish(&frame(2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(queue.len_for_test(), 0);
    }
}
