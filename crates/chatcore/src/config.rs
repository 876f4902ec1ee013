//! Environment configuration, shared by all four binaries.
//!
//! Loaded via `clap` (`derive` + `env`) so every option can be passed as a
//! flag or an environment variable, plus `dotenvy` for local `.env` loading
//! — the same split the teacher's `core::cli` + `core::config` uses,
//! flattened here into a single struct since this crate's config surface
//! doesn't need the teacher's layered file-based config.

use clap::Parser;

use crate::cache::CacheBackendType;
use crate::constants::*;

#[derive(Parser, Debug, Clone)]
#[command(name = "chat-backend", version, about = "Real-time chat delivery plane")]
pub struct Cli {
    #[arg(long, env = ENV_HOST, default_value = DEFAULT_HOST)]
    pub host: String,

    #[arg(long, env = ENV_PORT, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[arg(long, env = ENV_DSN)]
    pub dsn: String,

    #[arg(long, env = ENV_DB_MAX_OPEN_CONNS, default_value_t = POSTGRES_DEFAULT_MAX_CONNECTIONS)]
    pub db_max_open_conns: u32,

    #[arg(long, env = ENV_DB_MAX_IDLE_CONNS, default_value_t = POSTGRES_DEFAULT_MIN_CONNECTIONS)]
    pub db_max_idle_conns: u32,

    #[arg(long, env = ENV_DB_CONN_MAX_LIFETIME, default_value_t = POSTGRES_DEFAULT_MAX_LIFETIME_SECS)]
    pub db_conn_max_lifetime: u64,

    #[arg(long, env = ENV_CACHE_BACKEND, default_value = "memory", value_parser = parse_backend)]
    pub cache_backend: CacheBackendType,

    #[arg(long, env = ENV_BROKER_BACKEND, default_value = "memory", value_parser = parse_backend)]
    pub broker_backend: CacheBackendType,

    #[arg(long, env = ENV_REDIS_ADDR)]
    pub redis_addr: Option<String>,

    #[arg(long, env = ENV_REDIS_PASSWORD)]
    pub redis_password: Option<String>,

    #[arg(long, env = ENV_REDIS_DB, default_value_t = 0)]
    pub redis_db: u32,

    #[arg(long, env = ENV_REDIS_TIMEOUT, default_value_t = DEFAULT_REDIS_TIMEOUT_SECS)]
    pub redis_timeout: u64,

    #[arg(long, env = ENV_JWT_PUBLIC_KEY_PATH)]
    pub jwt_public_key_path: String,

    #[arg(long, env = ENV_CHAT_JWT_ISSUER, default_value = DEFAULT_JWT_ISSUER)]
    pub chat_jwt_issuer: String,

    #[arg(long, env = ENV_CONN_TTL, default_value_t = DEFAULT_CONN_TTL_SECS)]
    pub conn_ttl_secs: u64,

    #[arg(long, env = ENV_PING_INTERVAL, default_value_t = DEFAULT_PING_INTERVAL_SECS)]
    pub ping_interval_secs: u64,

    #[arg(long, env = ENV_WS_RATE_LIMIT, default_value_t = DEFAULT_WS_RATE_LIMIT_RPM)]
    pub ws_rate_limit: u32,

    #[arg(long, env = ENV_RECEIPT_BATCH_MAX, default_value_t = DEFAULT_RECEIPT_BATCH_MAX)]
    pub receipt_batch_max: usize,

    #[arg(long, env = ENV_RECEIPT_BATCH_INTERVAL_MS, default_value_t = DEFAULT_RECEIPT_BATCH_INTERVAL_MS)]
    pub receipt_batch_interval_ms: u64,

    #[arg(long, env = ENV_PUSH_DEAD_LETTER_MAX_ATTEMPTS, default_value_t = DEFAULT_MAX_REDELIVER_ATTEMPTS)]
    pub push_dead_letter_max_attempts: u32,

    #[arg(long, env = ENV_OTEL_COLLECTOR_URL)]
    pub otel_collector_url: Option<String>,
}

fn parse_backend(s: &str) -> Result<CacheBackendType, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(CacheBackendType::Memory),
        "redis" => Ok(CacheBackendType::Redis),
        _ => Err(format!("invalid backend '{s}', expected 'memory' or 'redis'")),
    }
}

impl Cli {
    /// Parse CLI args/env, loading a local `.env` file first if present.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Cli::parse()
    }

    /// Compose the `redis://` URL the cache/broker Redis backends expect
    /// from the discrete `REDIS_*` options, mirroring the teacher's
    /// `CacheConfig` wiring one level up.
    pub fn redis_url(&self) -> Option<String> {
        let addr = self.redis_addr.as_ref()?;
        let auth = self
            .redis_password
            .as_ref()
            .map(|p| format!(":{p}@"))
            .unwrap_or_default();
        Some(format!("redis://{auth}{addr}/{}", self.redis_db))
    }

    pub fn cache_config(&self) -> crate::cache::CacheConfig {
        match self.cache_backend {
            CacheBackendType::Memory => crate::cache::CacheConfig::memory(DEFAULT_CACHE_MAX_ENTRIES),
            CacheBackendType::Redis => crate::cache::CacheConfig::redis(
                self.redis_url().expect("REDIS_ADDR required for CACHE_BACKEND=redis"),
            ),
        }
    }

    /// Broker reuses the cache config shape (backend + redis_url); the two
    /// are independently switchable per §6.3, so build a second config
    /// keyed off `broker_backend` rather than assuming they match.
    pub fn broker_cache_config(&self) -> crate::cache::CacheConfig {
        match self.broker_backend {
            CacheBackendType::Memory => crate::cache::CacheConfig::memory(DEFAULT_CACHE_MAX_ENTRIES),
            CacheBackendType::Redis => crate::cache::CacheConfig::redis(
                self.redis_url().expect("REDIS_ADDR required for BROKER_BACKEND=redis"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_includes_password_when_set() {
        let mut cli = Cli::try_parse_from([
            "chat-backend",
            "--dsn",
            "postgres://x",
            "--jwt-public-key-path",
            "/tmp/key.pem",
        ])
        .unwrap();
        cli.redis_addr = Some("localhost:6379".into());
        cli.redis_password = Some("secret".into());
        cli.redis_db = 2;
        assert_eq!(cli.redis_url().as_deref(), Some("redis://:secret@localhost:6379/2"));
    }

    #[test]
    fn redis_url_omits_auth_when_no_password() {
        let mut cli = Cli::try_parse_from([
            "chat-backend",
            "--dsn",
            "postgres://x",
            "--jwt-public-key-path",
            "/tmp/key.pem",
        ])
        .unwrap();
        cli.redis_addr = Some("localhost:6379".into());
        assert_eq!(cli.redis_url().as_deref(), Some("redis://localhost:6379/0"));
    }

    #[test]
    fn redis_url_none_without_addr() {
        let cli = Cli::try_parse_from([
            "chat-backend",
            "--dsn",
            "postgres://x",
            "--jwt-public-key-path",
            "/tmp/key.pem",
        ])
        .unwrap();
        assert_eq!(cli.redis_url(), None);
    }
}
