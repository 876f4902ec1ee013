//! Per-connection bootstrap, read pump, and write pump (§4.2).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chatcore::constants::{delivery_channel, user_channel};
use chatcore::wire::{ClientFrame, IngressMessage, ReadEvent, ServerFrame, TypingEvent};
use chrono::Utc;
use futures::stream::StreamExt;
use uuid::Uuid;

use crate::hub::ConnId;
use crate::outbound::OutboundQueue;
use crate::state::AppState;

const READ_DEADLINE: Duration = Duration::from_secs(60);
const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Drive one upgraded WebSocket connection for an authenticated `user_id`
/// end to end: bootstrap, spawn read/write pumps, wait for either to exit,
/// then tear down.
pub async fn handle_socket(state: AppState, socket: WebSocket, user_id: i64, device: String) {
    let conn_id: ConnId = Uuid::new_v4();
    let queue = Arc::new(OutboundQueue::new());

    bootstrap(&state, conn_id, user_id, &device, Arc::clone(&queue)).await;

    let (ws_tx, ws_rx) = socket.split();
    let mut write_task = tokio::spawn(write_pump(
        state.clone(),
        Arc::clone(&queue),
        ws_tx,
        user_id,
        device.clone(),
    ));
    let mut read_task = tokio::spawn(read_pump(
        state.clone(),
        ws_rx,
        Arc::clone(&queue),
        conn_id,
        user_id,
        device.clone(),
    ));

    // Either pump exiting means the connection is done; abort the other.
    tokio::select! {
        _ = &mut write_task => {},
        _ = &mut read_task => {},
    }
    queue.close();
    write_task.abort();
    read_task.abort();

    teardown(&state, conn_id, user_id, &device).await;
}

async fn bootstrap(
    state: &AppState,
    conn_id: ConnId,
    user_id: i64,
    device: &str,
    queue: Arc<OutboundQueue>,
) {
    state.register_conn(user_id, device).await;
    state.presence.mark_online(user_id).await;

    state.hub.register_connection(conn_id, queue);
    state.hub.subscribe(conn_id, &user_channel(user_id));

    match state.repo.list_user_chats(user_id).await {
        Ok(chats) => {
            for chat in &chats {
                state.hub.subscribe(conn_id, &delivery_channel(chat.id));
            }
            state
                .presence
                .fanout(user_id, true, Utc::now().timestamp(), &chats.iter().map(|c| c.id).collect::<Vec<_>>())
                .await;
        }
        Err(e) => {
            tracing::warn!(user_id, error = %e, "failed to resolve chat memberships on connect");
        }
    }
}

async fn teardown(state: &AppState, conn_id: ConnId, user_id: i64, device: &str) {
    let chat_ids = match state.repo.list_user_chats(user_id).await {
        Ok(chats) => chats.into_iter().map(|c| c.id).collect::<Vec<_>>(),
        Err(_) => Vec::new(),
    };

    state.hub.remove_connection(conn_id);
    state.unregister_conn(user_id, device).await;
    state.presence.mark_offline(user_id).await;
    state
        .presence
        .fanout(user_id, false, Utc::now().timestamp(), &chat_ids)
        .await;
}

/// One reader per connection (§4.2 Read pump). Parse failures and unknown
/// frame types are dropped, not treated as connection errors; only a
/// transport-level failure ends this task.
async fn read_pump(
    state: AppState,
    mut ws_rx: futures::stream::SplitStream<WebSocket>,
    queue: Arc<OutboundQueue>,
    conn_id: ConnId,
    user_id: i64,
    device: String,
) {
    loop {
        let next = tokio::time::timeout(READ_DEADLINE, ws_rx.next()).await;
        let message = match next {
            Ok(Some(Ok(m))) => m,
            Ok(Some(Err(e))) => {
                tracing::debug!(user_id, error = %e, "websocket read error, closing");
                return;
            }
            Ok(None) => return,
            Err(_) => {
                tracing::debug!(user_id, "read deadline exceeded, closing");
                return;
            }
        };

        let text = match message {
            Message::Text(t) => t,
            Message::Close(_) => return,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => continue,
        };

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!(user_id, error = %e, "dropping unparseable frame");
                continue;
            }
        };

        dispatch(&state, &queue, conn_id, user_id, &device, frame).await;
    }
}

async fn dispatch(
    state: &AppState,
    queue: &Arc<OutboundQueue>,
    conn_id: ConnId,
    user_id: i64,
    device: &str,
    frame: ClientFrame,
) {
    match frame {
        ClientFrame::SendMessage { chat_id, body, uuid } => {
            let ingress = IngressMessage {
                chat_id,
                user_id,
                body,
                client_uuid: uuid,
                ts: Utc::now(),
            };
            let topic = state.broker.stream_topic::<IngressMessage>(chatcore::constants::STREAM_CHAT_INGRESS);
            if let Err(e) = topic.publish(&ingress).await {
                tracing::warn!(user_id, chat_id, error = %e, "ingress publish failed");
                if !queue.push(ServerFrame::error("PUBLISH_FAILED", "could not send message")) {
                    queue.close();
                }
            }
        }
        ClientFrame::Typing { chat_id } => {
            let topic = state.broker.stream_topic::<TypingEvent>(chatcore::constants::STREAM_TYPING_EVENTS);
            let _ = topic.publish(&TypingEvent { chat_id, user_id }).await;
        }
        ClientFrame::Read { chat_id, msg_id } => {
            let topic = state.broker.stream_topic::<ReadEvent>(chatcore::constants::STREAM_READ_RECEIPTS);
            let _ = topic.publish(&ReadEvent { chat_id, user_id, msg_id }).await;
        }
        ClientFrame::Ping => {
            state.register_conn(user_id, device).await;
            state.presence.mark_online(user_id).await;
            if !queue.push(ServerFrame::Pong) {
                queue.close();
            }
        }
        ClientFrame::Unknown => {
            tracing::debug!(user_id, conn = %conn_id, "ignoring unrecognized frame type");
        }
    }
}

/// One writer per connection (§4.2 Write pump): sole mutator of the
/// socket, so per-connection ordering falls out of having a single reader
/// of the outbound queue. Also owns the periodic keepalive: every
/// `ping_interval` it refreshes the connection/presence TTLs and sends a
/// native WS ping, keeping both alive for quiet-but-healthy sockets.
async fn write_pump(
    state: AppState,
    queue: Arc<OutboundQueue>,
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
    user_id: i64,
    device: String,
) {
    use futures::SinkExt;

    let mut ping_ticker = tokio::time::interval(state.ping_interval);
    ping_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_ticker.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            frame = queue.pop() => {
                let Some(frame) = frame else {
                    let _ = ws_tx.close().await;
                    return;
                };

                let payload = match serde_json::to_string(&frame) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize outbound frame");
                        continue;
                    }
                };

                let sent = tokio::time::timeout(WRITE_DEADLINE, ws_tx.send(Message::Text(payload))).await;
                match sent {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(error = %e, "write failed, closing connection");
                        return;
                    }
                    Err(_) => {
                        tracing::debug!("write deadline exceeded, closing connection");
                        return;
                    }
                }
            }
            _ = ping_ticker.tick() => {
                state.register_conn(user_id, &device).await;
                state.presence.mark_online(user_id).await;

                let sent = tokio::time::timeout(WRITE_DEADLINE, ws_tx.send(Message::Ping(axum::body::Bytes::new()))).await;
                match sent {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(error = %e, "keepalive ping failed, closing connection");
                        return;
                    }
                    Err(_) => {
                        tracing::debug!("keepalive ping deadline exceeded, closing connection");
                        return;
                    }
                }
            }
        }
    }
}
