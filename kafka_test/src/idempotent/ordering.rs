//! Idempotent producer ordering and deduplication
//!
//! With one request in flight and broker-side sequence checks, a burst of
//! sends to one key must land exactly once each, in send order.

use kafka_delivery::{DeliveryGuarantee, IsolationLevel, OutboundMessage};

use crate::common::{create_producer, read_topic, TestResult, QUIET_PERIOD, TEST_TIMEOUT};
use crate::setup::TestContext;

const MESSAGE_COUNT: usize = 50;

pub async fn test_idempotent_ordering_without_duplicates() -> TestResult {
    println!("=== Test: Idempotent Ordering ===\n");

    let ctx = TestContext::new().await?;
    let topic = ctx.unique_topic_with_partitions("idempotent", 3).await?;
    let producer = create_producer(DeliveryGuarantee::Idempotent)?;

    println!("Sending {} messages with one key...", MESSAGE_COUNT);
    for i in 0..MESSAGE_COUNT {
        producer.send(OutboundMessage::new(topic.as_str(), format!("{:03}", i)).key_str("account-7"))?;
    }
    producer.flush()?;

    let records = read_topic(&topic, IsolationLevel::ReadCommitted, MESSAGE_COUNT, TEST_TIMEOUT)?;
    assert_eq!(records.len(), MESSAGE_COUNT, "missing records");

    // a keyed burst shares one partition
    let partition = records[0].partition;
    assert!(records.iter().all(|r| r.partition == partition));

    let values: Vec<String> = records.iter().map(|r| r.value_str()).collect();
    let expected: Vec<String> = (0..MESSAGE_COUNT).map(|i| format!("{:03}", i)).collect();
    assert_eq!(values, expected, "records out of order");
    println!("✅ {} records in send order", MESSAGE_COUNT);

    let extra = read_topic(&topic, IsolationLevel::ReadCommitted, MESSAGE_COUNT + 1, QUIET_PERIOD)?;
    assert_eq!(extra.len(), MESSAGE_COUNT, "duplicates present");
    println!("✅ No duplicates");

    ctx.cleanup().await?;
    println!("\n✅ Idempotent ordering test PASSED\n");
    Ok(())
}
