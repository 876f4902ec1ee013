//! Integration coverage for the fan-out path that doesn't need Postgres:
//! Hub subscription plus broker-level delivery (§8 scenarios 1 and 3).

use std::sync::Arc;
use std::time::Duration;

use chatcore::broker::BrokerService;
use chatcore::constants::delivery_channel;
use chatcore::wire::ServerFrame;
use gateway::hub::Hub;
use gateway::outbound::OutboundQueue;
use uuid::Uuid;

async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn two_user_direct_delivery_reaches_both_subscribers() {
    let broker = Arc::new(BrokerService::memory());
    let hub = Hub::new(Arc::clone(&broker));

    let conn_a = Uuid::new_v4();
    let conn_b = Uuid::new_v4();
    let queue_a = Arc::new(OutboundQueue::new());
    let queue_b = Arc::new(OutboundQueue::new());
    hub.register_connection(conn_a, Arc::clone(&queue_a));
    hub.register_connection(conn_b, Arc::clone(&queue_b));
    hub.subscribe(conn_a, &delivery_channel(7));
    hub.subscribe(conn_b, &delivery_channel(7));
    settle().await;

    let topic = broker.broadcast_topic::<ServerFrame>(&delivery_channel(7));
    let frame = ServerFrame::Message {
        id: 1,
        chat_id: 7,
        user_id: 1,
        body: "hi".to_string(),
        created_at: chrono::Utc::now(),
    };
    topic.publish(&frame).await.unwrap();
    settle().await;

    assert_eq!(queue_a.pop().await, Some(frame.clone()));
    assert_eq!(queue_b.pop().await, Some(frame));
}

#[tokio::test]
async fn typing_fanout_reaches_other_members_only() {
    let broker = Arc::new(BrokerService::memory());
    let hub = Hub::new(Arc::clone(&broker));

    let conn_a = Uuid::new_v4();
    let conn_b = Uuid::new_v4();
    let queue_a = Arc::new(OutboundQueue::new());
    let queue_b = Arc::new(OutboundQueue::new());
    hub.register_connection(conn_a, Arc::clone(&queue_a));
    hub.register_connection(conn_b, Arc::clone(&queue_b));
    hub.subscribe(conn_a, &delivery_channel(7));
    hub.subscribe(conn_b, &delivery_channel(7));
    settle().await;

    let topic = broker.broadcast_topic::<ServerFrame>(&delivery_channel(7));
    let frame = ServerFrame::Typing { chat_id: 7, user_id: 1 };
    topic.publish(&frame).await.unwrap();
    settle().await;

    assert_eq!(queue_a.pop().await, Some(frame.clone()));
    assert_eq!(queue_b.pop().await, Some(frame));
}

#[tokio::test]
async fn unsubscribed_pod_does_not_receive_further_broadcasts() {
    let broker = Arc::new(BrokerService::memory());
    let hub = Hub::new(Arc::clone(&broker));

    let conn_a = Uuid::new_v4();
    let queue_a = Arc::new(OutboundQueue::new());
    hub.register_connection(conn_a, Arc::clone(&queue_a));
    hub.subscribe(conn_a, &delivery_channel(9));
    settle().await;
    hub.unsubscribe(conn_a, &delivery_channel(9));
    settle().await;

    let topic = broker.broadcast_topic::<ServerFrame>(&delivery_channel(9));
    topic
        .publish(&ServerFrame::Typing { chat_id: 9, user_id: 2 })
        .await
        .unwrap();
    settle().await;

    assert_eq!(queue_a.len_for_test(), 0);
}
