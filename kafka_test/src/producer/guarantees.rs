//! Every delivery guarantee against a live broker
//!
//! The guarantee changes durability and retry behavior, never the API shape,
//! so each one must deliver a keyed record end to end.

use kafka_delivery::{DeliveryGuarantee, IsolationLevel, OutboundMessage};

use crate::common::{create_producer, read_topic, TestResult, TEST_TIMEOUT};
use crate::setup::TestContext;

const GUARANTEES: [DeliveryGuarantee; 5] = [
    DeliveryGuarantee::None,
    DeliveryGuarantee::Leader,
    DeliveryGuarantee::All,
    DeliveryGuarantee::Idempotent,
    DeliveryGuarantee::Transactional,
];

/// Produce one keyed record per guarantee and read it back read-committed
pub async fn test_guarantee_round_trip() -> TestResult {
    println!("=== Test: Delivery Guarantee Round Trip ===\n");

    let ctx = TestContext::new().await?;

    for guarantee in GUARANTEES {
        let topic = ctx.unique_topic(&format!("guarantee-{}", guarantee)).await?;
        let producer = create_producer(guarantee)?;

        let report = producer.send(
            OutboundMessage::new(topic.as_str(), format!("payload-{}", guarantee))
                .key_str("order-42"),
        )?;
        producer.flush()?;
        println!(
            "  {} -> partition {} offset {} ({} attempt(s))",
            guarantee, report.partition, report.offset, report.attempts
        );

        let records = read_topic(&topic, IsolationLevel::ReadCommitted, 1, TEST_TIMEOUT)?;
        assert_eq!(records.len(), 1, "{}: record not visible", guarantee);
        assert_eq!(records[0].key.as_deref(), Some("order-42"));
        assert_eq!(records[0].value_str(), format!("payload-{}", guarantee));
        println!("✅ {} delivered", guarantee);
    }

    ctx.cleanup().await?;
    println!("\n✅ Delivery guarantee round trip test PASSED\n");
    Ok(())
}

/// Acknowledged sends report increasing offsets
pub async fn test_plain_send_reports_offsets() -> TestResult {
    println!("=== Test: Acknowledged Offsets ===\n");

    let ctx = TestContext::new().await?;
    let topic = ctx.unique_topic("offsets").await?;
    let producer = create_producer(DeliveryGuarantee::All)?;

    let mut offsets = Vec::new();
    for i in 0..5 {
        let report = producer.send(OutboundMessage::new(topic.as_str(), format!("m{}", i)))?;
        offsets.push(report.offset);
    }
    println!("  offsets: {:?}", offsets);

    assert_eq!(offsets, vec![0, 1, 2, 3, 4], "offsets should be sequential");

    ctx.cleanup().await?;
    println!("✅ Acknowledged offsets test PASSED\n");
    Ok(())
}
