//! Shared application state handed to every axum handler (§4.2, §5).

use std::sync::Arc;
use std::time::Duration;

use chatcore::broker::BrokerService;
use chatcore::cache::{CacheKey, CacheService, RateLimitBucket, RateLimiter};
use chatcore::config::Cli;
use chatcore::constants::DEFAULT_CACHE_MAX_ENTRIES;
use chatcore::db::{ChatRepository, PostgresConfig, PostgresService};
use chatcore::jwt::TokenVerifier;
use chatcore::presence::PresenceRegistry;
use chatcore::shutdown::ShutdownService;

use crate::hub::Hub;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<ChatRepository>,
    pub postgres: Arc<PostgresService>,
    pub cache: Arc<CacheService>,
    pub broker: Arc<BrokerService>,
    pub presence: Arc<PresenceRegistry>,
    pub verifier: Arc<TokenVerifier>,
    pub rate_limiter: Arc<RateLimiter>,
    pub hub: Arc<Hub>,
    pub shutdown: Arc<ShutdownService>,
    /// Identifies this pod in the `conn:<user>:<device>` registry so a
    /// stale entry left by a crashed pod can be told apart from a live one.
    pub pod_id: String,
    pub conn_ttl: Duration,
    pub ping_interval: Duration,
    pub ws_rate_limit: RateLimitBucket,
}

impl AppState {
    pub async fn build(cli: &Cli, shutdown: Arc<ShutdownService>) -> anyhow::Result<Self> {
        let cache = Arc::new(CacheService::new(&cli.cache_config()).await?);
        let broker = Arc::new(BrokerService::from_cache_config(&cli.broker_cache_config()).await?);
        let presence = Arc::new(PresenceRegistry::new(Arc::clone(&cache), Arc::clone(&broker)));
        let verifier = Arc::new(TokenVerifier::from_pem_file(
            &cli.jwt_public_key_path,
            cli.chat_jwt_issuer.clone(),
        )?);
        let rate_limiter = Arc::new(RateLimiter::new(Arc::clone(&cache)));

        let pg_config = PostgresConfig {
            dsn: cli.dsn.clone(),
            max_connections: cli.db_max_open_conns,
            min_connections: cli.db_max_idle_conns,
            max_lifetime_secs: cli.db_conn_max_lifetime,
        };
        let postgres = Arc::new(PostgresService::connect(&pg_config).await?);
        let repo = Arc::new(ChatRepository::new(postgres.pool().clone()));

        let hub = Hub::new(Arc::clone(&broker));
        let pod_id = uuid::Uuid::new_v4().to_string();

        Ok(Self {
            repo,
            postgres,
            cache,
            broker,
            presence,
            verifier,
            rate_limiter,
            hub,
            shutdown,
            pod_id,
            conn_ttl: Duration::from_secs(cli.conn_ttl_secs),
            ping_interval: Duration::from_secs(cli.ping_interval_secs),
            ws_rate_limit: RateLimitBucket::ws(cli.ws_rate_limit),
        })
    }

    /// Register `conn:<user>:<device>` with this pod's id, TTL'd to
    /// `conn_ttl` (§4.2 post-upgrade bootstrap step 1).
    pub async fn register_conn(&self, user_id: i64, device: &str) {
        let key = CacheKey::conn(user_id, device);
        if let Err(e) = self.cache.set(&key, &self.pod_id, Some(self.conn_ttl)).await {
            tracing::warn!(user_id, device, error = %e, "failed to register connection entry");
        }
    }

    pub async fn unregister_conn(&self, user_id: i64, device: &str) {
        self.cache.invalidate_key(&CacheKey::conn(user_id, device)).await;
    }

    /// `max_entries` default used by the in-memory cache backend, for
    /// binaries that don't need to read `Cli` directly.
    pub fn default_cache_entries() -> u64 {
        DEFAULT_CACHE_MAX_ENTRIES
    }
}
