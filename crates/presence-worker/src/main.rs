//! Presence worker: read-receipt batching and stateless typing rebroadcast.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chatcore::broker::BrokerService;
use chatcore::config::Cli;
use chatcore::constants::{
    GROUP_RECEIPT_BATCHERS, GROUP_TYPING_RELAYS, STREAM_READ_RECEIPTS, STREAM_TYPING_EVENTS,
    delivery_channel,
};
use chatcore::db::{ChatRepository, PostgresConfig, PostgresService, ReceiptStatus};
use chatcore::shutdown::ShutdownService;
use chatcore::wire::{ReadEvent, ServerFrame, TypingEvent};

const RECEIPT_CHANNEL_CAPACITY: usize = 1000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chatcore::telemetry::init("presence-worker");

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

    let (tx, rx) = tokio::sync::mpsc::channel::<ReadEvent>(RECEIPT_CHANNEL_CAPACITY);

    let batch_max = cli.receipt_batch_max;
    let batch_interval = Duration::from_millis(cli.receipt_batch_interval_ms);

    let batcher_repo = Arc::clone(&repo);
    let batcher_broker = Arc::clone(&broker);
    let batcher_shutdown_rx = shutdown.subscribe();
    let batcher_handle = tokio::spawn(async move {
        run_batcher(rx, batcher_repo, batcher_broker, batch_max, batch_interval, batcher_shutdown_rx).await;
    });
    shutdown.register(batcher_handle).await;

    let receipt_broker = Arc::clone(&broker);
    let receipt_shutdown_rx = shutdown.subscribe();
    let receipt_handle = tokio::spawn(async move {
        if let Err(e) = run_receipt_consumer(receipt_broker, tx, receipt_shutdown_rx).await {
            tracing::error!(error = %e, "receipt consumer exited with error");
        }
    });
    shutdown.register(receipt_handle).await;

    let typing_broker = Arc::clone(&broker);
    let typing_shutdown_rx = shutdown.subscribe();
    let typing_handle = tokio::spawn(async move {
        if let Err(e) = run_typing_relay(typing_broker, typing_shutdown_rx).await {
            tracing::error!(error = %e, "typing relay exited with error");
        }
    });
    shutdown.register(typing_handle).await;

    shutdown.wait().await;
    shutdown.drain().await;
    postgres.close().await;
    Ok(())
}

/// Stage A: pull `read.receipts` and enqueue onto the bounded in-process
/// channel. A full channel is the sole backpressure signal to the broker —
/// `try_send` failing means we skip acking this delivery so it gets
/// redelivered rather than blocking on a full batcher.
async fn run_receipt_consumer(
    broker: Arc<BrokerService>,
    tx: tokio::sync::mpsc::Sender<ReadEvent>,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let topic = broker.stream_topic::<ReadEvent>(STREAM_READ_RECEIPTS);
    let mut subscriber = topic.subscribe(GROUP_RECEIPT_BATCHERS, "receipt-batcher-1").await?;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return Ok(());
                }
            }
            received = subscriber.recv() => {
                let (msg_id, event) = received?;
                match tx.try_send(event) {
                    Ok(()) => {
                        subscriber.acker().ack(&msg_id).await.ok();
                    }
                    Err(_) => {
                        tracing::debug!("receipt batcher channel full, leaving delivery unacked for redelivery");
                    }
                }
            }
        }
    }
}

/// Stage B: the single batcher task. Flushes on size >= `batch_max` or
/// `batch_interval` elapsed since the first buffered element, whichever
/// comes first (§4.4, §9 "batching as a design primitive").
async fn run_batcher(
    mut rx: tokio::sync::mpsc::Receiver<ReadEvent>,
    repo: Arc<ChatRepository>,
    broker: Arc<BrokerService>,
    batch_max: usize,
    batch_interval: Duration,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) {
    let mut buffer: Vec<ReadEvent> = Vec::with_capacity(batch_max);
    let mut deadline: Option<Instant> = None;

    loop {
        let sleep = match deadline {
            Some(d) => tokio::time::sleep_until(d.into()),
            None => tokio::time::sleep(Duration::from_secs(3600)),
        };

        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    flush(&repo, &broker, &mut buffer).await;
                    return;
                }
            }
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        if buffer.is_empty() {
                            deadline = Some(Instant::now() + batch_interval);
                        }
                        buffer.push(event);
                        if buffer.len() >= batch_max {
                            flush(&repo, &broker, &mut buffer).await;
                            deadline = None;
                        }
                    }
                    None => {
                        flush(&repo, &broker, &mut buffer).await;
                        return;
                    }
                }
            }
            _ = sleep, if deadline.is_some() => {
                flush(&repo, &broker, &mut buffer).await;
                deadline = None;
            }
        }
    }
}

async fn flush(repo: &Arc<ChatRepository>, broker: &Arc<BrokerService>, buffer: &mut Vec<ReadEvent>) {
    if buffer.is_empty() {
        return;
    }
    tracing::debug!(count = buffer.len(), "flushing read-receipt batch");

    for event in buffer.drain(..) {
        if let Err(e) = repo.upsert_receipt(event.msg_id, event.user_id, ReceiptStatus::Read).await {
            tracing::warn!(chat_id = event.chat_id, user_id = event.user_id, error = %e, "receipt upsert failed");
            continue;
        }
        if let Err(e) = repo.advance_last_read(event.chat_id, event.user_id, event.msg_id).await {
            tracing::warn!(chat_id = event.chat_id, user_id = event.user_id, error = %e, "advance_last_read failed");
        }

        let topic = broker.broadcast_topic::<ServerFrame>(&delivery_channel(event.chat_id));
        let frame = ServerFrame::Read {
            chat_id: event.chat_id,
            user_id: event.user_id,
            msg_id: event.msg_id,
        };
        let _ = topic.publish(&frame).await;
    }
}

/// Typing events are rebroadcast without persistence (§4.4, §9 "typing
/// events carry no broker-level TTL hint" decision).
async fn run_typing_relay(
    broker: Arc<BrokerService>,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let topic = broker.stream_topic::<TypingEvent>(STREAM_TYPING_EVENTS);
    let mut subscriber = topic.subscribe(GROUP_TYPING_RELAYS, "typing-relay-1").await?;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return Ok(());
                }
            }
            received = subscriber.recv() => {
                let (msg_id, event) = received?;
                let delivery = broker.broadcast_topic::<ServerFrame>(&delivery_channel(event.chat_id));
                let frame = ServerFrame::Typing { chat_id: event.chat_id, user_id: event.user_id };
                let _ = delivery.publish(&frame).await;
                subscriber.acker().ack(&msg_id).await.ok();
            }
        }
    }
}
