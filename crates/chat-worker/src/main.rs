//! Chat worker: consumes `chat.ingress`, persists idempotently, fans the
//! result out to the delivery exchange and the push path (§4.3).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chatcore::broker::BrokerService;
use chatcore::config::Cli;
use chatcore::constants::{
    GROUP_CHAT_WORKERS, STREAM_CHAT_INGRESS, STREAM_PUSH_SHARED, delivery_channel, user_channel,
};
use chatcore::db::{ChatRepository, PostgresConfig, PostgresService};
use chatcore::shutdown::ShutdownService;
use chatcore::wire::{IngressMessage, PushCandidate, ServerFrame};

const MAX_PERSIST_ATTEMPTS: u32 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chatcore::telemetry::init("chat-worker");

    let cli = Cli::load();
    let shutdown = ShutdownService::new();
    shutdown.install_signal_handlers();

    let broker = Arc::new(BrokerService::from_cache_config(&cli.broker_cache_config()).await?);

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

    let mut shutdown_rx = shutdown.subscribe();
    let worker_broker = Arc::clone(&broker);
    let worker_repo = Arc::clone(&repo);
    let handle = tokio::spawn(async move {
        if let Err(e) = run(worker_broker, worker_repo, &mut shutdown_rx).await {
            tracing::error!(error = %e, "chat worker loop exited with error");
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
    shutdown_rx: &mut tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let ingress = broker.stream_topic::<IngressMessage>(STREAM_CHAT_INGRESS);
    let mut subscriber = ingress.subscribe(GROUP_CHAT_WORKERS, "chat-worker-1").await?;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return Ok(());
                }
            }
            received = subscriber.recv() => {
                let (msg_id, msg) = received?;
                if process(&broker, &repo, &msg).await {
                    subscriber.acker().ack(&msg_id).await.ok();
                } else {
                    tracing::debug!(chat_id = msg.chat_id, uuid = %msg.client_uuid, "leaving ingress delivery unacked for redelivery");
                }
            }
        }
    }
}

/// Returns whether the ingress delivery should be acked. `false` leaves it
/// unacked for redelivery (§4.3 step 5: ack only after the delivery publish
/// in step 3 succeeds); every other exit path is a terminal outcome for this
/// message (rejected, or dead-lettered after retries) and is acked so it is
/// not requeued forever.
async fn process(broker: &Arc<BrokerService>, repo: &Arc<ChatRepository>, msg: &IngressMessage) -> bool {
    match repo.is_member(msg.chat_id, msg.user_id).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(chat_id = msg.chat_id, user_id = msg.user_id, "rejecting: not a member");
            publish_error(broker, msg.user_id, "NOT_MEMBER", "not a member of this chat").await;
            return true;
        }
        Err(e) => {
            tracing::error!(chat_id = msg.chat_id, error = %e, "membership check failed");
            publish_error(broker, msg.user_id, "DB_TIMEOUT", "could not validate membership").await;
            return true;
        }
    }

    let persisted = persist_with_retry(repo, msg).await;
    let Some(message) = persisted else {
        tracing::error!(chat_id = msg.chat_id, uuid = %msg.client_uuid, "dead-lettering message after max retries");
        publish_error(broker, msg.user_id, "DB_TIMEOUT", "message could not be saved").await;
        return true;
    };

    let frame = ServerFrame::Message {
        id: message.id,
        chat_id: message.chat_id,
        user_id: message.sender_id,
        body: message.body.clone(),
        created_at: message.created_at,
    };
    let delivery = broker.broadcast_topic::<ServerFrame>(&delivery_channel(message.chat_id));
    if let Err(e) = delivery.publish(&frame).await {
        tracing::warn!(chat_id = message.chat_id, error = %e, "delivery publish failed, leaving unacked for redelivery");
        publish_error(broker, msg.user_id, "PUBLISH_FAILED", "message saved but delivery failed").await;
        return false;
    }

    let push = broker.stream_topic::<PushCandidate>(STREAM_PUSH_SHARED);
    let candidate = PushCandidate {
        id: message.id,
        chat_id: message.chat_id,
        sender_id: message.sender_id,
        body: message.body,
        created_at: message.created_at,
    };
    if let Err(e) = push.publish(&candidate).await {
        tracing::warn!(chat_id = message.chat_id, error = %e, "push.shared publish failed");
    }

    true
}

/// Retry persistence up to [`MAX_PERSIST_ATTEMPTS`] with exponential
/// backoff (§4.3 step 5, §7 transient-infra policy), returning `None` once
/// exhausted so the caller can dead-letter.
async fn persist_with_retry(
    repo: &Arc<ChatRepository>,
    msg: &IngressMessage,
) -> Option<chatcore::db::Message> {
    let mut delay = Duration::from_millis(100);
    for attempt in 1..=MAX_PERSIST_ATTEMPTS {
        match repo
            .create_message(msg.chat_id, msg.user_id, &msg.body, &msg.client_uuid, None, None)
            .await
        {
            Ok(message) => return Some(message),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "persist attempt failed");
                if attempt == MAX_PERSIST_ATTEMPTS {
                    return None;
                }
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
    None
}

async fn publish_error(broker: &Arc<BrokerService>, user_id: i64, code: &str, message: &str) {
    let topic = broker.broadcast_topic::<ServerFrame>(&user_channel(user_id));
    let _ = topic.publish(&ServerFrame::error(code, message)).await;
}
