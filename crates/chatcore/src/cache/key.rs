//! Type-safe cache key builder with versioning

use crate::constants::CACHE_KEY_VERSION;

/// Type-safe cache key builder.
///
/// All keys (except rate-limit counters) are prefixed with a version so a
/// schema change can invalidate the whole keyspace by bumping
/// [`CACHE_KEY_VERSION`].
pub struct CacheKey;

impl CacheKey {
    /// Connection registry entry for one device of a user.
    pub fn conn(user_id: i64, device_id: &str) -> String {
        format!("{CACHE_KEY_VERSION}:conn:{user_id}:{device_id}")
    }

    /// Presence registry entry for a user (TTL'd online marker).
    pub fn presence(user_id: i64) -> String {
        format!("{CACHE_KEY_VERSION}:pres:{user_id}")
    }

    /// Cached set of member user ids for a chat, used to fan out deliveries
    /// without a database round trip on every message.
    pub fn group_members(chat_id: i64) -> String {
        format!("{CACHE_KEY_VERSION}:grp:{chat_id}")
    }

    /// Cached last-read receipt snapshot for a user in a chat.
    pub fn receipt(chat_id: i64, user_id: i64) -> String {
        format!("{CACHE_KEY_VERSION}:receipt:{chat_id}:{user_id}")
    }

    /// Rate limit counter key. Not versioned: counter semantics don't change
    /// across cache-key schema versions.
    pub fn rate_limit(bucket: &str, identifier: &str) -> String {
        format!("rl:{bucket}:{identifier}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_key_scopes_by_device() {
        assert_eq!(CacheKey::conn(42, "dev-1"), "v1:conn:42:dev-1");
    }

    #[test]
    fn presence_key_is_per_user() {
        assert_eq!(CacheKey::presence(42), "v1:pres:42");
    }

    #[test]
    fn group_members_key_is_per_chat() {
        assert_eq!(CacheKey::group_members(7), "v1:grp:7");
    }

    #[test]
    fn rate_limit_key_is_unversioned() {
        assert_eq!(CacheKey::rate_limit("ws", "42"), "rl:ws:42");
    }
}
