//! Integration tests for the in-memory broker.
//!
//! These exercise the AMQP-like behaviour the messaging core relies on:
//! routing, prefetch, requeue, dead-lettering, and what happens to
//! unacknowledged deliveries when channels and connections go away.

#![cfg(feature = "memory")]

use std::time::Duration;

use peril_broker::{
    BrokerError, Channel, Connection, Consumer, Delivery, ExchangeKind, MemoryBroker,
    MemoryChannel, MemoryConsumer, MemoryDelivery, OutboundMessage, QueueOptions,
};

// =========================================================================
// Helpers
// =========================================================================

fn durable() -> QueueOptions {
    QueueOptions {
        durable: true,
        ..QueueOptions::default()
    }
}

fn transient() -> QueueOptions {
    QueueOptions {
        durable: false,
        auto_delete: true,
        exclusive: true,
        dead_letter_exchange: None,
    }
}

fn text(body: &str) -> OutboundMessage {
    OutboundMessage::new("text/plain", body.as_bytes().to_vec())
}

async fn setup_topic(broker: &MemoryBroker) -> MemoryChannel {
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();
    ch.declare_exchange("peril_topic", ExchangeKind::Topic, true)
        .await
        .unwrap();
    ch
}

async fn next_now(consumer: &mut MemoryConsumer) -> MemoryDelivery {
    tokio::time::timeout(Duration::from_secs(1), consumer.next())
        .await
        .expect("delivery should arrive")
        .expect("stream should be open")
        .expect("delivery should be ok")
}

async fn nothing_pending(consumer: &mut MemoryConsumer) -> bool {
    tokio::time::timeout(Duration::from_millis(50), consumer.next())
        .await
        .is_err()
}

// =========================================================================
// Routing
// =========================================================================

#[tokio::test]
async fn test_topic_exchange_routes_by_pattern() {
    let broker = MemoryBroker::new();
    let ch = setup_topic(&broker).await;
    ch.declare_queue("moves", durable()).await.unwrap();
    ch.bind_queue("moves", "peril_topic", "army_moves.*")
        .await
        .unwrap();

    ch.publish("peril_topic", "army_moves.alice", text("a"))
        .await
        .unwrap();
    ch.publish("peril_topic", "war.alice", text("b")).await.unwrap();

    assert_eq!(broker.queue_depth("moves").await, Some(1));

    let mut consumer = ch.consume("moves").await.unwrap();
    let d = next_now(&mut consumer).await;
    assert_eq!(d.payload(), b"a");
    assert_eq!(d.routing_key(), "army_moves.alice");
    assert_eq!(d.content_type(), Some("text/plain"));
    assert!(!d.redelivered());
    d.ack().await.unwrap();
}

#[tokio::test]
async fn test_direct_exchange_requires_exact_key() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();
    ch.declare_exchange("peril_direct", ExchangeKind::Direct, true)
        .await
        .unwrap();
    ch.declare_queue("pause.alice", transient()).await.unwrap();
    ch.bind_queue("pause.alice", "peril_direct", "pause")
        .await
        .unwrap();

    ch.publish("peril_direct", "pause", text("p")).await.unwrap();
    ch.publish("peril_direct", "pause.extra", text("x"))
        .await
        .unwrap();

    assert_eq!(broker.queue_depth("pause.alice").await, Some(1));
}

#[tokio::test]
async fn test_default_exchange_routes_to_queue_by_name() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();
    ch.declare_queue("direct_to_me", durable()).await.unwrap();

    ch.publish("", "direct_to_me", text("hi")).await.unwrap();
    ch.publish("", "nobody_home", text("lost")).await.unwrap();

    assert_eq!(broker.queue_depth("direct_to_me").await, Some(1));
}

#[tokio::test]
async fn test_publish_to_unknown_exchange_fails() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    let err = ch.publish("missing", "key", text("x")).await.unwrap_err();
    assert!(matches!(err, BrokerError::NotFound { kind: "exchange", .. }));
}

#[tokio::test]
async fn test_bind_to_unknown_exchange_fails() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();
    ch.declare_queue("q", durable()).await.unwrap();

    let err = ch.bind_queue("q", "missing", "k").await.unwrap_err();
    assert!(matches!(err, BrokerError::NotFound { kind: "exchange", .. }));
}

// =========================================================================
// Declarations
// =========================================================================

#[tokio::test]
async fn test_redeclare_identical_queue_is_idempotent() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.declare_queue("war", durable()).await.unwrap();
    let info = ch.declare_queue("war", durable()).await.unwrap();
    assert_eq!(info.name, "war");
}

#[tokio::test]
async fn test_redeclare_with_different_durability_is_rejected() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    ch.declare_queue("war", durable()).await.unwrap();
    let err = ch
        .declare_queue(
            "war",
            QueueOptions {
                durable: false,
                ..QueueOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_exclusive_queue_is_locked_to_its_connection() {
    let broker = MemoryBroker::new();
    let owner = broker.connect().await;
    let other = broker.connect().await;
    let owner_ch = owner.create_channel().await.unwrap();
    let other_ch = other.create_channel().await.unwrap();

    owner_ch
        .declare_queue("pause.alice", transient())
        .await
        .unwrap();

    let err = other_ch
        .declare_queue("pause.alice", transient())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::ResourceLocked(_)));

    let err = other_ch.consume("pause.alice").await.err().unwrap();
    assert!(matches!(err, BrokerError::ResourceLocked(_)));
}

#[tokio::test]
async fn test_empty_queue_name_gets_server_generated_name() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();

    let info = ch.declare_queue("", transient()).await.unwrap();
    assert!(info.name.starts_with("amq.gen-"));
    assert!(broker.queue_exists(&info.name).await);
}

#[tokio::test]
async fn test_handles_are_debug_printable() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();
    ch.declare_queue("debug", durable()).await.unwrap();
    let consumer = ch.consume("debug").await.unwrap();

    assert!(format!("{conn:?}").starts_with("MemoryConnection"));
    assert!(format!("{ch:?}").starts_with("MemoryChannel"));
    assert!(format!("{consumer:?}").starts_with("MemoryConsumer"));

    // A failed call that would have returned a channel still unwraps.
    conn.close().await.unwrap();
    let err = conn.create_channel().await.unwrap_err();
    assert!(matches!(err, BrokerError::ConnectionClosed));
}

// =========================================================================
// Acknowledgment
// =========================================================================

#[tokio::test]
async fn test_nack_requeue_redelivers_with_flag() {
    let broker = MemoryBroker::new();
    let ch = setup_topic(&broker).await;
    ch.declare_queue("war", durable()).await.unwrap();
    ch.bind_queue("war", "peril_topic", "war.*").await.unwrap();
    ch.publish("peril_topic", "war.alice", text("w")).await.unwrap();

    let mut consumer = ch.consume("war").await.unwrap();
    let first = next_now(&mut consumer).await;
    assert!(!first.redelivered());
    first.nack(true).await.unwrap();

    let second = next_now(&mut consumer).await;
    assert!(second.redelivered());
    assert_eq!(second.payload(), b"w");
    second.ack().await.unwrap();

    assert_eq!(broker.queue_depth("war").await, Some(0));
    assert_eq!(broker.unacked_count("war").await, 0);
}

#[tokio::test]
async fn test_nack_discard_routes_to_dead_letter_exchange() {
    let broker = MemoryBroker::new();
    let ch = setup_topic(&broker).await;
    ch.declare_exchange("peril_dlx", ExchangeKind::Fanout, true)
        .await
        .unwrap();
    ch.declare_queue("peril_dlq", durable()).await.unwrap();
    ch.bind_queue("peril_dlq", "peril_dlx", "").await.unwrap();

    let with_dlx = QueueOptions {
        dead_letter_exchange: Some("peril_dlx".into()),
        ..durable()
    };
    ch.declare_queue("war", with_dlx).await.unwrap();
    ch.bind_queue("war", "peril_topic", "war.*").await.unwrap();
    ch.publish("peril_topic", "war.bob", text("poison"))
        .await
        .unwrap();

    let mut consumer = ch.consume("war").await.unwrap();
    next_now(&mut consumer).await.nack(false).await.unwrap();

    assert_eq!(broker.queue_depth("war").await, Some(0));
    assert_eq!(broker.queue_depth("peril_dlq").await, Some(1));
    assert!(nothing_pending(&mut consumer).await);
}

#[tokio::test]
async fn test_nack_discard_without_dead_letter_drops_message() {
    let broker = MemoryBroker::new();
    let ch = setup_topic(&broker).await;
    ch.declare_queue("war", durable()).await.unwrap();
    ch.bind_queue("war", "peril_topic", "war.*").await.unwrap();
    ch.publish("peril_topic", "war.bob", text("x")).await.unwrap();

    let mut consumer = ch.consume("war").await.unwrap();
    next_now(&mut consumer).await.nack(false).await.unwrap();

    assert_eq!(broker.queue_depth("war").await, Some(0));
    assert_eq!(broker.unacked_count("war").await, 0);
    assert!(nothing_pending(&mut consumer).await);
}

// =========================================================================
// Prefetch
// =========================================================================

#[tokio::test]
async fn test_prefetch_bounds_unacked_deliveries() {
    let broker = MemoryBroker::new();
    let ch = setup_topic(&broker).await;
    ch.declare_queue("game_logs", durable()).await.unwrap();
    ch.bind_queue("game_logs", "peril_topic", "game_logs.*")
        .await
        .unwrap();
    for i in 0..5 {
        ch.publish("peril_topic", "game_logs.bob", text(&i.to_string()))
            .await
            .unwrap();
    }

    ch.set_prefetch(2).await.unwrap();
    let mut consumer = ch.consume("game_logs").await.unwrap();

    let a = next_now(&mut consumer).await;
    let b = next_now(&mut consumer).await;
    assert!(nothing_pending(&mut consumer).await);
    assert_eq!(broker.unacked_count("game_logs").await, 2);
    assert_eq!(broker.queue_depth("game_logs").await, Some(3));

    a.ack().await.unwrap();
    let c = next_now(&mut consumer).await;
    assert_eq!(c.payload(), b"2");
    b.ack().await.unwrap();
    c.ack().await.unwrap();
}

#[tokio::test]
async fn test_competing_consumers_share_a_queue() {
    let broker = MemoryBroker::new();
    let ch = setup_topic(&broker).await;
    ch.declare_queue("war", durable()).await.unwrap();
    ch.bind_queue("war", "peril_topic", "war.*").await.unwrap();

    let mut first = ch.consume("war").await.unwrap();
    let mut second = ch.consume("war").await.unwrap();

    ch.publish("peril_topic", "war.a", text("1")).await.unwrap();
    ch.publish("peril_topic", "war.b", text("2")).await.unwrap();

    let d1 = next_now(&mut first).await;
    let d2 = next_now(&mut second).await;
    assert_ne!(d1.payload(), d2.payload());
    d1.ack().await.unwrap();
    d2.ack().await.unwrap();
}

// =========================================================================
// Channel / connection lifecycle
// =========================================================================

#[tokio::test]
async fn test_closing_channel_requeues_unacked_and_ends_stream() {
    let broker = MemoryBroker::new();
    let publisher = setup_topic(&broker).await;
    publisher.declare_queue("war", durable()).await.unwrap();
    publisher
        .bind_queue("war", "peril_topic", "war.*")
        .await
        .unwrap();
    publisher
        .publish("peril_topic", "war.a", text("held"))
        .await
        .unwrap();

    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();
    let mut consumer = ch.consume("war").await.unwrap();
    let held = next_now(&mut consumer).await;

    ch.close().await.unwrap();

    assert!(consumer.next().await.is_none());
    assert!(matches!(held.ack().await, Err(BrokerError::ChannelClosed)));
    assert_eq!(broker.queue_depth("war").await, Some(1));
    assert!(matches!(
        ch.publish("peril_topic", "war.a", text("x")).await,
        Err(BrokerError::ChannelClosed)
    ));
}

#[tokio::test]
async fn test_closing_connection_deletes_exclusive_queues() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();
    ch.declare_queue("pause.alice", transient()).await.unwrap();
    ch.declare_queue("war", durable()).await.unwrap();

    conn.close().await.unwrap();

    assert!(!broker.queue_exists("pause.alice").await);
    assert!(broker.queue_exists("war").await);
    assert!(matches!(
        conn.create_channel().await,
        Err(BrokerError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_auto_delete_queue_removed_after_last_consumer() {
    let broker = MemoryBroker::new();
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();
    let consumer_ch = conn.create_channel().await.unwrap();
    ch.declare_queue("army_moves.alice", transient())
        .await
        .unwrap();

    let _consumer = consumer_ch.consume("army_moves.alice").await.unwrap();
    assert_eq!(broker.consumer_count("army_moves.alice").await, 1);

    consumer_ch.close().await.unwrap();
    assert!(!broker.queue_exists("army_moves.alice").await);
}

#[tokio::test]
async fn test_restart_keeps_only_durable_queues() {
    let broker = MemoryBroker::new();
    let ch = setup_topic(&broker).await;
    ch.declare_queue("game_logs", durable()).await.unwrap();
    ch.bind_queue("game_logs", "peril_topic", "game_logs.*")
        .await
        .unwrap();
    ch.declare_queue(
        "scratch",
        QueueOptions {
            durable: false,
            ..QueueOptions::default()
        },
    )
    .await
    .unwrap();
    ch.publish("peril_topic", "game_logs.bob", text("log"))
        .await
        .unwrap();

    broker.restart().await;

    assert!(broker.queue_exists("game_logs").await);
    assert!(!broker.queue_exists("scratch").await);
    assert_eq!(broker.queue_depth("game_logs").await, Some(1));

    // Binding to the durable exchange survived the restart.
    let conn = broker.connect().await;
    let ch = conn.create_channel().await.unwrap();
    ch.publish("peril_topic", "game_logs.bob", text("again"))
        .await
        .unwrap();
    assert_eq!(broker.queue_depth("game_logs").await, Some(2));
}
