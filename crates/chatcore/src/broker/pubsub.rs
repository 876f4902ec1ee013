//! Pub/Sub bridge management
//!
//! Used by the Redis backend for distributed broadcast. Not used by the
//! memory backend, which talks to `tokio::sync::broadcast` directly.
//!
//! Provides lifecycle management for broadcast channel subscriptions:
//! - one bridge task per channel, not one per subscriber
//! - reference counting for automatic cleanup when the last subscriber drops
//! - graceful shutdown support
//!
//! Message flow (Redis): `publish()` → Redis `PUBLISH` → bridge task → local
//! broadcast → subscribers. `publish()` never writes to the local broadcast
//! directly, which would otherwise double-deliver to same-process
//! subscribers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

const DEFAULT_BROADCAST_CAPACITY: usize = 10_000;

pub struct PubSubManager {
    bridges: RwLock<HashMap<String, Arc<PubSubBridge>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    broadcast_capacity: usize,
}

impl Default for PubSubManager {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl PubSubManager {
    pub fn new(broadcast_capacity: usize) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            bridges: RwLock::new(HashMap::new()),
            shutdown_tx,
            shutdown_rx,
            broadcast_capacity,
        }
    }

    /// Returns `(bridge, is_new)`. The caller starts the bridge task (Redis
    /// only) when `is_new` is true.
    pub fn get_or_create_bridge(&self, channel: &str) -> (Arc<PubSubBridge>, bool) {
        {
            let bridges = self.bridges.read();
            if let Some(bridge) = bridges.get(channel) {
                return (Arc::clone(bridge), false);
            }
        }

        let mut bridges = self.bridges.write();
        if let Some(bridge) = bridges.get(channel) {
            return (Arc::clone(bridge), false);
        }

        let bridge = Arc::new(PubSubBridge::new(
            channel.to_string(),
            self.broadcast_capacity,
            self.shutdown_rx.clone(),
        ));
        bridges.insert(channel.to_string(), Arc::clone(&bridge));

        (bridge, true)
    }

    pub fn remove_bridge(&self, channel: &str) {
        let mut bridges = self.bridges.write();
        if let Some(bridge) = bridges.get(channel)
            && bridge.subscriber_count() == 0
        {
            bridge.stop();
            bridges.remove(channel);
            tracing::debug!(channel, "removed idle pub/sub bridge");
        }
    }

    pub fn get_bridge(&self, channel: &str) -> Option<Arc<PubSubBridge>> {
        self.bridges.read().get(channel).cloned()
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let bridges: Vec<Arc<PubSubBridge>> = {
            let guard = self.bridges.read();
            guard.values().cloned().collect()
        };

        for bridge in bridges {
            bridge.wait_for_stop().await;
        }

        self.bridges.write().clear();
        tracing::debug!("pub/sub manager shutdown complete");
    }
}

pub struct PubSubBridge {
    channel: String,
    sender: broadcast::Sender<Vec<u8>>,
    subscriber_count: AtomicU64,
    task_handle: Mutex<Option<JoinHandle<()>>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl PubSubBridge {
    fn new(channel: String, capacity: usize, shutdown_rx: watch::Receiver<bool>) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        let (stop_tx, stop_rx) = watch::channel(false);

        Self {
            channel,
            sender,
            subscriber_count: AtomicU64::new(0),
            task_handle: Mutex::new(None),
            stop_tx,
            stop_rx,
            shutdown_rx,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn subscriber_count(&self) -> u64 {
        self.subscriber_count.load(Ordering::SeqCst)
    }

    pub fn add_subscriber(&self) -> u64 {
        self.subscriber_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn remove_subscriber(&self) -> u64 {
        let prev = self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
        prev.saturating_sub(1)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.sender.subscribe()
    }

    pub fn send(&self, payload: Vec<u8>) -> Result<usize, broadcast::error::SendError<Vec<u8>>> {
        self.sender.send(payload)
    }

    pub fn is_task_running(&self) -> bool {
        self.task_handle.lock().is_some()
    }

    pub fn set_task(&self, handle: JoinHandle<()>) {
        let mut guard = self.task_handle.lock();
        if let Some(old) = guard.take() {
            tracing::warn!(channel = %self.channel, "bridge task already set, replacing");
            old.abort();
        }
        *guard = Some(handle);
    }

    pub fn stop_rx(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub async fn wait_for_stop(&self) {
        let handle = self.task_handle.lock().take();
        if let Some(h) = handle {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), h).await;
        }
    }
}

/// A subscription that cleans up on drop: decrements the bridge's subscriber
/// count, and schedules bridge removal once the last subscriber is gone.
pub struct ManagedSubscription {
    receiver: broadcast::Receiver<Vec<u8>>,
    bridge: Arc<PubSubBridge>,
    manager: Arc<PubSubManager>,
}

impl ManagedSubscription {
    pub fn new(
        receiver: broadcast::Receiver<Vec<u8>>,
        bridge: Arc<PubSubBridge>,
        manager: Arc<PubSubManager>,
    ) -> Self {
        Self {
            receiver,
            bridge,
            manager,
        }
    }

    pub async fn recv(&mut self) -> Result<Vec<u8>, broadcast::error::RecvError> {
        self.receiver.recv().await
    }
}

impl Drop for ManagedSubscription {
    fn drop(&mut self) {
        let remaining = self.bridge.remove_subscriber();
        let channel = self.bridge.channel().to_string();

        tracing::trace!(channel, remaining, "subscription dropped");

        if remaining == 0 {
            let manager = Arc::clone(&self.manager);
            tokio::spawn(async move {
                // Brief delay so a quick re-subscribe doesn't thrash the bridge.
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                manager.remove_bridge(&channel);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bridge_lifecycle_tracks_subscriber_count() {
        let manager = Arc::new(PubSubManager::new(100));

        let (bridge, is_new) = manager.get_or_create_bridge("test");
        assert!(is_new);
        bridge.add_subscriber();
        assert_eq!(bridge.subscriber_count(), 1);

        let (bridge2, is_new2) = manager.get_or_create_bridge("test");
        assert!(!is_new2);
        bridge2.add_subscriber();
        assert_eq!(bridge.subscriber_count(), 2);

        bridge.remove_subscriber();
        assert_eq!(bridge.subscriber_count(), 1);
        bridge.remove_subscriber();
        assert_eq!(bridge.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn managed_subscription_removes_idle_bridge_on_drop() {
        let manager = Arc::new(PubSubManager::new(100));

        let (bridge, _) = manager.get_or_create_bridge("test");
        bridge.add_subscriber();
        let receiver = bridge.subscribe();

        let sub = ManagedSubscription::new(receiver, bridge, Arc::clone(&manager));
        assert!(manager.get_bridge("test").is_some());

        drop(sub);
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;

        assert!(manager.get_bridge("test").is_none());
    }

    #[tokio::test]
    async fn shutdown_clears_all_bridges() {
        let manager = Arc::new(PubSubManager::new(100));

        let (bridge1, _) = manager.get_or_create_bridge("channel1");
        bridge1.add_subscriber();
        let (bridge2, _) = manager.get_or_create_bridge("channel2");
        bridge2.add_subscriber();

        manager.shutdown().await;

        assert!(manager.get_bridge("channel1").is_none());
        assert!(manager.get_bridge("channel2").is_none());
    }
}
