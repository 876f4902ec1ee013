//! Central home for env var names, default values, and cache-key versioning.
//!
//! Mirrors the teacher's `core::constants` convention: every environment
//! variable the crate reads gets a named constant, and every tunable default
//! lives next to the constant that can override it.

// =============================================================================
// App identity
// =============================================================================

pub const APP_NAME: &str = "chat-core";

// =============================================================================
// Server
// =============================================================================

pub const ENV_HOST: &str = "HOST";
pub const ENV_PORT: &str = "PORT";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

pub const ENV_LOG: &str = "RUST_LOG";
pub const DEFAULT_LOG_FILTER: &str = "info";

// =============================================================================
// Postgres
// =============================================================================

pub const ENV_DSN: &str = "DSN";
pub const ENV_DB_MAX_OPEN_CONNS: &str = "DB_MAX_OPEN_CONNS";
pub const ENV_DB_MAX_IDLE_CONNS: &str = "DB_MAX_IDLE_CONNS";
pub const ENV_DB_CONN_MAX_LIFETIME: &str = "DB_CONN_MAX_LIFETIME";

pub const POSTGRES_DEFAULT_MAX_CONNECTIONS: u32 = 20;
pub const POSTGRES_DEFAULT_MIN_CONNECTIONS: u32 = 2;
pub const POSTGRES_DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;
pub const POSTGRES_DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const POSTGRES_DEFAULT_MAX_LIFETIME_SECS: u64 = 1800;
pub const POSTGRES_DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 5;

// =============================================================================
// Cache / broker backend
// =============================================================================

pub const ENV_CACHE_BACKEND: &str = "CACHE_BACKEND";
pub const ENV_BROKER_BACKEND: &str = "BROKER_BACKEND";
pub const ENV_REDIS_ADDR: &str = "REDIS_ADDR";
pub const ENV_REDIS_PASSWORD: &str = "REDIS_PASSWORD";
pub const ENV_REDIS_DB: &str = "REDIS_DB";
pub const ENV_REDIS_TIMEOUT: &str = "REDIS_TIMEOUT";
pub const DEFAULT_REDIS_TIMEOUT_SECS: u64 = 2;

pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 100_000;

/// Cache key schema version. Bump to invalidate all versioned keys at once.
pub const CACHE_KEY_VERSION: &str = "v1";

// =============================================================================
// JWT
// =============================================================================

pub const ENV_JWT_PUBLIC_KEY_PATH: &str = "JWT_PUBLIC_KEY_PATH";
pub const ENV_CHAT_JWT_ISSUER: &str = "CHAT_JWT_ISSUER";
pub const DEFAULT_JWT_ISSUER: &str = "chat-auth";

// =============================================================================
// Connection / presence TTLs
// =============================================================================

pub const ENV_CONN_TTL: &str = "CONN_TTL";
pub const ENV_PING_INTERVAL: &str = "PING_INTERVAL";
pub const DEFAULT_CONN_TTL_SECS: u64 = 35;
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 30;
pub const PRESENCE_ONLINE_TTL_SECS: u64 = 60;

// =============================================================================
// Rate limiting
// =============================================================================

pub const ENV_WS_RATE_LIMIT: &str = "WS_RATE_LIMIT";
pub const DEFAULT_WS_RATE_LIMIT_RPM: u32 = 120;
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

// =============================================================================
// Receipt batching
// =============================================================================

pub const ENV_RECEIPT_BATCH_MAX: &str = "RECEIPT_BATCH_MAX";
pub const ENV_RECEIPT_BATCH_INTERVAL_MS: &str = "RECEIPT_BATCH_INTERVAL_MS";
pub const DEFAULT_RECEIPT_BATCH_MAX: usize = 100;
pub const DEFAULT_RECEIPT_BATCH_INTERVAL_MS: u64 = 50;

// =============================================================================
// Worker retry / dead-letter
// =============================================================================

pub const ENV_PUSH_DEAD_LETTER_MAX_ATTEMPTS: &str = "PUSH_DEAD_LETTER_MAX_ATTEMPTS";
pub const DEFAULT_MAX_REDELIVER_ATTEMPTS: u32 = 5;

// =============================================================================
// Telemetry (recognized but inert unless configured)
// =============================================================================

pub const ENV_OTEL_COLLECTOR_URL: &str = "OTEL_COLLECTOR_URL";

// =============================================================================
// Broker channel/stream names
// =============================================================================

pub const STREAM_CHAT_INGRESS: &str = "chat.ingress";
pub const STREAM_READ_RECEIPTS: &str = "read.receipts";
pub const STREAM_TYPING_EVENTS: &str = "typing.events";
pub const STREAM_PUSH_SHARED: &str = "push.shared";

pub const GROUP_CHAT_WORKERS: &str = "chat-workers";
pub const GROUP_RECEIPT_BATCHERS: &str = "receipt-batchers";
pub const GROUP_TYPING_RELAYS: &str = "typing-relays";
pub const GROUP_PUSH_WORKERS: &str = "push-workers";

/// Delivery channel name for a given chat id.
pub fn delivery_channel(chat_id: i64) -> String {
    format!("chat.{chat_id}")
}

/// Delivery channel name for a given user's private channel (errors, presence).
pub fn user_channel(user_id: i64) -> String {
    format!("user.{user_id}")
}
