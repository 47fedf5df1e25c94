//! Committed transactions

use kafka_delivery::{DeliveryGuarantee, Headers, IsolationLevel, OutboundMessage, ProducerSettings};

use crate::common::{bootstrap_servers, create_producer, create_producer_with, read_topic, TestResult, TEST_TIMEOUT};
use crate::setup::TestContext;

pub async fn test_transaction_commit() -> TestResult {
    println!("=== Test: Transaction Commit ===\n");

    let ctx = TestContext::new().await?;
    let topic = ctx.unique_topic("txn-commit").await?;
    let producer = create_producer(DeliveryGuarantee::Transactional)?;

    for i in 0..3 {
        let report = producer.send(OutboundMessage::new(topic.as_str(), format!("txn-{}", i)))?;
        println!("  committed offset {}", report.offset);
    }

    let records = read_topic(&topic, IsolationLevel::ReadCommitted, 3, TEST_TIMEOUT)?;
    let values: Vec<String> = records.iter().map(|r| r.value_str()).collect();
    assert_eq!(values, vec!["txn-0", "txn-1", "txn-2"]);
    println!("✅ All committed records visible");

    ctx.cleanup().await?;
    println!("\n✅ Transaction commit test PASSED\n");
    Ok(())
}

pub async fn test_transaction_headers() -> TestResult {
    println!("=== Test: Transaction Headers ===\n");

    let ctx = TestContext::new().await?;
    let topic = ctx.unique_topic("txn-headers").await?;
    let transactional_id = format!("kafka-test-{}", ctx.test_id);
    let settings = ProducerSettings::for_guarantee(&bootstrap_servers(), DeliveryGuarantee::Transactional)
        .transactional_id(&transactional_id);
    let producer = create_producer_with(settings)?;

    let headers: Headers = [("traceparent", "00-abc-def-01"), ("tenant", "acme")]
        .into_iter()
        .collect();
    producer.send_with_headers(OutboundMessage::new(topic.as_str(), "with-headers"), headers)?;

    let records = read_topic(&topic, IsolationLevel::ReadCommitted, 1, TEST_TIMEOUT)?;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.header("traceparent"), Some("00-abc-def-01"));
    assert_eq!(record.header("tenant"), Some("acme"));
    assert_eq!(record.header("transactionId"), Some(transactional_id.as_str()));
    println!("✅ Caller headers and transactionId present");

    ctx.cleanup().await?;
    println!("\n✅ Transaction headers test PASSED\n");
    Ok(())
}
