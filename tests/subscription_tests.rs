// Subscription runtime tests
//
// Subscriptions run on their own threads against the in-memory broker and are
// stopped through their cancellation tokens.

mod common;

use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use kafka_delivery::kafka::consumer::ChannelDeadLetterSink;
use kafka_delivery::{
    DeliveryGuarantee, HandlerError, InMemoryBroker, IsolationLevel, OutboundMessage,
    PoisonedRecord, Subscription, SubscriptionHandle,
};
use tokio_util::sync::CancellationToken;

use common::{consumer_settings, producer, text_engine};

const WAIT: Duration = Duration::from_secs(5);

/// Start a subscription forwarding every payload to the returned channel
fn start(broker: &InMemoryBroker, group: &str, isolation: IsolationLevel) -> (SubscriptionHandle, Receiver<String>) {
    let (tx, rx) = unbounded();
    let (sink, _dead) = ChannelDeadLetterSink::unbounded();
    let engine = text_engine(
        move |msg: String| {
            tx.send(msg).ok();
            Ok::<(), HandlerError>(())
        },
        sink,
    );

    let settings = consumer_settings(group).isolation_level(isolation);
    let consumer = broker.consumer(&settings).unwrap();
    let handle = Subscription::new("events", consumer, engine, settings.poll_timeout())
        .spawn(CancellationToken::new())
        .unwrap();
    (handle, rx)
}

fn collect(rx: &Receiver<String>, count: usize) -> Vec<String> {
    (0..count).map(|_| rx.recv_timeout(WAIT).unwrap()).collect()
}

#[test]
fn test_delivers_in_partition_order() {
    let broker = InMemoryBroker::new();
    let producer = producer(&broker, DeliveryGuarantee::Idempotent);
    for i in 0..10 {
        producer
            .send(OutboundMessage::new("events", format!("m{}", i)))
            .unwrap();
    }

    let (handle, rx) = start(&broker, "readers", IsolationLevel::ReadCommitted);
    let received = collect(&rx, 10);

    let expected: Vec<_> = (0..10).map(|i| format!("m{}", i)).collect();
    assert_eq!(received, expected);

    handle.cancel();
    let report = handle.join().unwrap();
    assert_eq!(report.topic, "events");
    assert_eq!(report.stats.committed, 10);
    assert_eq!(broker.committed_offset("readers", "events", 0), Some(10));
}

#[test]
fn test_restart_resumes_after_committed_offset() {
    let broker = InMemoryBroker::new();
    let producer = producer(&broker, DeliveryGuarantee::Idempotent);
    producer.send(OutboundMessage::new("events", "first")).unwrap();

    let (handle, rx) = start(&broker, "readers", IsolationLevel::ReadCommitted);
    assert_eq!(collect(&rx, 1), vec!["first"]);
    handle.cancel();
    handle.join().unwrap();

    producer.send(OutboundMessage::new("events", "second")).unwrap();

    let (handle, rx) = start(&broker, "readers", IsolationLevel::ReadCommitted);
    assert_eq!(collect(&rx, 1), vec!["second"]);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    handle.cancel();
    handle.join().unwrap();
}

#[test]
fn test_uncommitted_record_is_redelivered_after_restart() {
    let broker = InMemoryBroker::new();
    let producer = producer(&broker, DeliveryGuarantee::Idempotent);
    producer.send(OutboundMessage::new("events", "once")).unwrap();
    // the first consumer "crashes" before its commit lands
    broker.fail_next_commits(1);

    let (handle, rx) = start(&broker, "readers", IsolationLevel::ReadCommitted);
    assert_eq!(collect(&rx, 1), vec!["once"]);
    handle.cancel();
    let report = handle.join().unwrap();
    assert_eq!(report.stats.commit_failures, 1);

    let (handle, rx) = start(&broker, "readers", IsolationLevel::ReadCommitted);
    assert_eq!(collect(&rx, 1), vec!["once"]);
    handle.cancel();
    handle.join().unwrap();
}

#[test]
fn test_read_committed_hides_aborted_transactions() {
    let broker = InMemoryBroker::new();
    let producer = producer(&broker, DeliveryGuarantee::Transactional);

    producer.send(OutboundMessage::new("events", "committed-1")).unwrap();
    producer
        .send_in_transaction(OutboundMessage::new("events", "aborted"), |_| {
            Err("rolled back")
        })
        .unwrap_err();
    producer.send(OutboundMessage::new("events", "committed-2")).unwrap();

    let (handle, rx) = start(&broker, "committed", IsolationLevel::ReadCommitted);
    assert_eq!(collect(&rx, 2), vec!["committed-1", "committed-2"]);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    handle.cancel();
    handle.join().unwrap();

    let (handle, rx) = start(&broker, "uncommitted", IsolationLevel::ReadUncommitted);
    assert_eq!(collect(&rx, 3), vec!["committed-1", "aborted", "committed-2"]);
    handle.cancel();
    handle.join().unwrap();
}

#[test]
fn test_cancellation_is_bounded_by_poll_timeout() {
    let broker = InMemoryBroker::new();
    broker.create_topic("events", 1);

    let (handle, _rx) = start(&broker, "idle", IsolationLevel::ReadCommitted);
    std::thread::sleep(Duration::from_millis(20));
    assert!(!handle.is_finished());

    let started = Instant::now();
    handle.cancel();
    let report = handle.join().unwrap();

    // poll timeout is 5ms; leave room for a slow scheduler
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(report.stats.received, 0);
}

#[test]
fn test_dropping_handle_stops_the_thread() {
    let broker = InMemoryBroker::new();
    let (sink, _dead) = ChannelDeadLetterSink::unbounded();
    let engine = text_engine(|_: String| Ok::<(), HandlerError>(()), sink);
    let settings = consumer_settings("dropped");
    let token = CancellationToken::new();

    let handle = Subscription::new("events", broker.consumer(&settings).unwrap(), engine, settings.poll_timeout())
        .spawn(token.clone())
        .unwrap();
    drop(handle);

    assert!(token.is_cancelled());
}

#[test]
fn test_multi_partition_topic_is_fully_consumed() {
    let broker = InMemoryBroker::new();
    broker.create_topic("events", 3);
    let producer = producer(&broker, DeliveryGuarantee::Idempotent);
    for i in 0..30 {
        producer
            .send(OutboundMessage::new("events", format!("m{}", i)).key_str(&format!("k{}", i)))
            .unwrap();
    }

    let (handle, rx) = start(&broker, "readers", IsolationLevel::ReadCommitted);
    let mut received = collect(&rx, 30);
    handle.cancel();
    handle.join().unwrap();

    received.sort();
    let mut expected: Vec<_> = (0..30).map(|i| format!("m{}", i)).collect();
    expected.sort();
    assert_eq!(received, expected);

    let committed: i64 = (0..3)
        .map(|p| broker.committed_offset("readers", "events", p).unwrap_or(0))
        .sum();
    assert_eq!(committed, 30);
}

#[test]
fn test_undecodable_records_are_reported_to_the_subscriber() {
    let broker = InMemoryBroker::new();
    let producer = producer(&broker, DeliveryGuarantee::Idempotent);
    producer
        .send(OutboundMessage::new("events", vec![0xc3u8, 0x28]))
        .unwrap();
    producer.send(OutboundMessage::new("events", "valid")).unwrap();

    let (tx, rx) = unbounded();
    let (poisoned_tx, poisoned_rx) = unbounded();
    let (sink, dead) = ChannelDeadLetterSink::unbounded();
    let engine = text_engine(
        move |msg: String| {
            tx.send(msg).ok();
            Ok::<(), HandlerError>(())
        },
        sink,
    );
    let settings = consumer_settings("readers");
    let consumer = broker.consumer(&settings).unwrap();
    let handle = Subscription::new("events", consumer, engine, settings.poll_timeout())
        .report_poisoned(poisoned_tx)
        .spawn(CancellationToken::new())
        .unwrap();

    let poisoned: PoisonedRecord = poisoned_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(poisoned.topic, "events");
    assert_eq!((poisoned.partition, poisoned.offset), (0, 0));
    assert_eq!(collect(&rx, 1), vec!["valid"]);
    assert_eq!(dead.recv_timeout(WAIT).unwrap().attempts, 0);

    handle.cancel();
    let report = handle.join().unwrap();
    assert_eq!(report.stats.poisoned, 1);
    assert_eq!(broker.committed_offset("readers", "events", 0), Some(2));
}
