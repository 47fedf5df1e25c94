//! Aborted transactions under both isolation levels

use kafka_delivery::{DeliveryError, DeliveryGuarantee, IsolationLevel, OutboundMessage, ProducerSettings};

use crate::common::{create_producer, create_producer_with, read_topic, TestResult, QUIET_PERIOD, TEST_TIMEOUT};
use crate::setup::TestContext;

/// Work failing between produce and commit aborts the transaction
pub async fn test_aborted_transaction_hidden() -> TestResult {
    println!("=== Test: Aborted Transaction Isolation ===\n");

    let ctx = TestContext::new().await?;
    let topic = ctx.unique_topic("txn-abort").await?;
    let producer = create_producer(DeliveryGuarantee::Transactional)?;

    producer.send(OutboundMessage::new(topic.as_str(), "before"))?;
    let err = producer
        .send_in_transaction(OutboundMessage::new(topic.as_str(), "aborted"), |_| {
            Err("simulated failure after produce")
        })
        .unwrap_err();
    assert!(matches!(err, DeliveryError::TransactionAborted { .. }), "unexpected: {}", err);
    println!("✅ Transaction aborted: {}", err);
    producer.send(OutboundMessage::new(topic.as_str(), "after"))?;

    let committed = read_topic(&topic, IsolationLevel::ReadCommitted, 3, QUIET_PERIOD)?;
    let values: Vec<String> = committed.iter().map(|r| r.value_str()).collect();
    assert_eq!(values, vec!["before", "after"], "read-committed saw aborted data");
    println!("✅ read_committed skips the aborted record");

    let uncommitted = read_topic(&topic, IsolationLevel::ReadUncommitted, 3, TEST_TIMEOUT)?;
    let values: Vec<String> = uncommitted.iter().map(|r| r.value_str()).collect();
    assert_eq!(values, vec!["before", "aborted", "after"]);
    println!("✅ read_uncommitted still sees it");

    ctx.cleanup().await?;
    println!("\n✅ Aborted transaction isolation test PASSED\n");
    Ok(())
}

/// A coordinator handshake that cannot finish aborts without writing
pub async fn test_failed_handshake_aborts() -> TestResult {
    println!("=== Test: Handshake Timeout ===\n");

    let ctx = TestContext::new().await?;
    let topic = ctx.unique_topic("txn-handshake").await?;

    // an unroutable broker cannot host a transaction coordinator
    let settings = ProducerSettings::for_guarantee("127.0.0.1:1", DeliveryGuarantee::Transactional)
        .transaction_timeout_ms(1_000);
    let producer = create_producer_with(settings)?;

    let err = producer
        .send(OutboundMessage::new(topic.as_str(), "never"))
        .unwrap_err();
    assert!(matches!(err, DeliveryError::TransactionAborted { .. }), "unexpected: {}", err);
    println!("✅ Send failed with {}", err);

    let records = read_topic(&topic, IsolationLevel::ReadUncommitted, 1, QUIET_PERIOD)?;
    assert!(records.is_empty());
    println!("✅ Nothing written");

    ctx.cleanup().await?;
    println!("\n✅ Handshake timeout test PASSED\n");
    Ok(())
}
