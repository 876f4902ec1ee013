use std::sync::Arc;

use anyhow::Context;
use chatcore::broker::BrokerService;
use chatcore::cache::{CacheKey, CacheService};
use chatcore::config::Cli;
use chatcore::constants::{GROUP_PUSH_WORKERS, STREAM_PUSH_SHARED};
use chatcore::db::{ChatRepository, PostgresConfig, PostgresService};
use chatcore::presence::PresenceRegistry;
use chatcore::shutdown::ShutdownService;
use chatcore::wire::PushCandidate;
use push_worker::sink::{LoggingPushSink, PushNotification, PushSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chatcore::telemetry::init("push-worker");

    let cli = Cli::load();
    let shutdown = ShutdownService::new();
    shutdown.install_signal_handlers();

    let cache = Arc::new(CacheService::new(&cli.cache_config()).await?);
    let broker = Arc::new(BrokerService::from_cache_config(&cli.broker_cache_config()).await?);
    let presence = Arc::new(PresenceRegistry::new(Arc::clone(&cache), Arc::clone(&broker)));

    let pg_config = PostgresConfig {
        dsn: cli.dsn.clone(),
        max_connections: cli.db_max_open_conns,
        min_connections: cli.db_max_idle_conns,
        max_lifetime_secs: cli.db_conn_max_lifetime,
    };
    let postgres = PostgresService::connect(&pg_config)
        .await
        .context("failed to connect to postgres")?;
    let repo = Arc::new(ChatRepository::new(postgres.pool().clone()));

    let sink: Arc<dyn PushSink> = Arc::new(LoggingPushSink);

    let mut shutdown_rx = shutdown.subscribe();
    let handle = tokio::spawn(async move {
        if let Err(e) = run(broker, repo, cache, presence, sink, &mut shutdown_rx).await {
            tracing::error!(error = %e, "push worker loop exited with error");
        }
    });
    shutdown.register(handle).await;

    shutdown.wait().await;
    shutdown.drain().await;
    postgres.close().await;
    Ok(())
}

async fn run(
    broker: Arc<BrokerService>,
    repo: Arc<ChatRepository>,
    cache: Arc<CacheService>,
    presence: Arc<PresenceRegistry>,
    sink: Arc<dyn PushSink>,
    shutdown_rx: &mut tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let topic = broker.stream_topic::<PushCandidate>(STREAM_PUSH_SHARED);
    let mut subscriber = topic.subscribe(GROUP_PUSH_WORKERS, "push-worker-1").await?;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return Ok(());
                }
            }
            received = subscriber.recv() => {
                let (msg_id, candidate) = received?;
                dispatch(&repo, &cache, &presence, &sink, &candidate).await;
                subscriber.acker().ack(&msg_id).await.ok();
            }
        }
    }
}

async fn dispatch(
    repo: &Arc<ChatRepository>,
    cache: &Arc<CacheService>,
    presence: &Arc<PresenceRegistry>,
    sink: &Arc<dyn PushSink>,
    candidate: &PushCandidate,
) {
    let members = match resolve_members(repo, cache, candidate.chat_id).await {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(chat_id = candidate.chat_id, error = %e, "failed to resolve chat members");
            return;
        }
    };

    for user_id in members {
        if user_id == candidate.sender_id {
            continue;
        }
        if presence.is_online(user_id).await {
            continue;
        }

        let tokens = match repo.list_device_tokens(user_id).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "failed to load device tokens");
                continue;
            }
        };

        for device in tokens {
            sink.send(PushNotification {
                device_token: &device.token,
                platform: &device.platform,
                body: &candidate.body,
            })
            .await;
        }
    }
}

/// Member set lookup: prefer the cached group-member set, fall back to the
/// repository on a miss and populate the cache for next time.
async fn resolve_members(
    repo: &Arc<ChatRepository>,
    cache: &Arc<CacheService>,
    chat_id: i64,
) -> anyhow::Result<Vec<i64>> {
    let key = CacheKey::group_members(chat_id);
    if let Some(members) = cache.set_members(&key).await? {
        return Ok(members.into_iter().filter_map(|m| m.parse().ok()).collect());
    }

    let member_ids = repo.list_member_ids(chat_id).await?;
    for id in &member_ids {
        let _ = cache.set_add(&key, &id.to_string()).await;
    }
    Ok(member_ids)
}
