//! Presence registry (§3 Presence entry, §4.4 Presence updater).
//!
//! Owns the `pres:<user>` cache semantics: a signed unix timestamp, positive
//! while online (TTL 60 s) or negative at the instant of an explicit
//! disconnect. Called in-process by the Gateway on connect/ping/disconnect,
//! and by nothing else — there is no separate presence-worker binary for
//! this half of §4.4, only the read-receipt/typing pipelines run as
//! standalone consumers.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::broker::BrokerService;
use crate::cache::{CacheKey, CacheService};
use crate::constants::PRESENCE_ONLINE_TTL_SECS;
use crate::wire::ServerFrame;

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A user's presence as read back from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presence {
    pub online: bool,
    pub last_seen: i64,
}

pub struct PresenceRegistry {
    cache: Arc<CacheService>,
    broker: Arc<BrokerService>,
}

impl PresenceRegistry {
    pub fn new(cache: Arc<CacheService>, broker: Arc<BrokerService>) -> Self {
        Self { cache, broker }
    }

    /// Mark a user online (connect, ping). Writes a positive timestamp with
    /// a 60 s TTL — the key's own expiry is what makes a pod death look
    /// like a disconnect even without the gateway running any cleanup.
    pub async fn mark_online(&self, user_id: i64) {
        let key = CacheKey::presence(user_id);
        let now = now_unix();
        if let Err(e) = self
            .cache
            .set(&key, &now, Some(Duration::from_secs(PRESENCE_ONLINE_TTL_SECS)))
            .await
        {
            tracing::warn!(user_id, error = %e, "failed to mark presence online");
        }
    }

    /// Mark a user explicitly offline (graceful disconnect). Writes a
    /// negative timestamp so a reader can distinguish "never connected /
    /// expired" from "told us they left" without a third cache field.
    pub async fn mark_offline(&self, user_id: i64) {
        let key = CacheKey::presence(user_id);
        let now = -now_unix();
        if let Err(e) = self
            .cache
            .set(&key, &now, Some(Duration::from_secs(PRESENCE_ONLINE_TTL_SECS)))
            .await
        {
            tracing::warn!(user_id, error = %e, "failed to mark presence offline");
        }
    }

    /// A user is online iff the key exists, the stored value is positive,
    /// and it is within the TTL window (redundant with the cache's own TTL
    /// expiry, but cheap and keeps the invariant explicit at the call site).
    pub async fn get(&self, user_id: i64) -> Presence {
        let key = CacheKey::presence(user_id);
        match self.cache.get::<i64>(&key).await {
            Ok(Some(value)) => {
                let online = value > 0 && now_unix() - value < PRESENCE_ONLINE_TTL_SECS as i64;
                Presence {
                    online,
                    last_seen: value.abs(),
                }
            }
            Ok(None) => Presence {
                online: false,
                last_seen: 0,
            },
            Err(e) => {
                tracing::warn!(user_id, error = %e, "presence read failed, assuming offline");
                Presence {
                    online: false,
                    last_seen: 0,
                }
            }
        }
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        self.get(user_id).await.online
    }

    /// Best-effort fan-out of a `Presence` event to every chat in
    /// `chat_ids` (§4.4, §9 "explicit-offline presence" decision). Each
    /// publish is attempted independently; a saturated broker drops that
    /// one chat's tick rather than blocking the caller (typically the
    /// disconnect path), matching the spec's tolerance for a missed tick.
    pub async fn fanout(&self, user_id: i64, online: bool, last_seen: i64, chat_ids: &[i64]) {
        let frame = ServerFrame::Presence {
            user_id,
            online,
            last_seen,
        };
        for chat_id in chat_ids {
            let topic = self.broker.broadcast_topic::<ServerFrame>(&crate::constants::delivery_channel(*chat_id));
            if let Err(e) = topic.publish(&frame).await {
                tracing::debug!(user_id, chat_id, error = %e, "presence fanout publish dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerService;
    use crate::cache::{CacheConfig, CacheService};

    async fn registry() -> PresenceRegistry {
        let cache = Arc::new(CacheService::new(&CacheConfig::memory(1000)).await.unwrap());
        let broker = Arc::new(BrokerService::memory());
        PresenceRegistry::new(cache, broker)
    }

    #[tokio::test]
    async fn unknown_user_is_offline() {
        let reg = registry().await;
        assert_eq!(reg.get(99).await, Presence { online: false, last_seen: 0 });
    }

    #[tokio::test]
    async fn mark_online_then_get_reports_online() {
        let reg = registry().await;
        reg.mark_online(1).await;
        assert!(reg.is_online(1).await);
    }

    #[tokio::test]
    async fn mark_offline_reports_offline_with_positive_last_seen() {
        let reg = registry().await;
        reg.mark_online(1).await;
        reg.mark_offline(1).await;
        let presence = reg.get(1).await;
        assert!(!presence.online);
        assert!(presence.last_seen > 0);
    }

    #[tokio::test]
    async fn fanout_does_not_panic_without_subscribers() {
        let reg = registry().await;
        reg.fanout(1, true, now_unix(), &[7, 8]).await;
    }
}
