//! A handler that recovers within the budget commits once and never dead-letters

use std::sync::mpsc;
use std::sync::Arc;

use kafka_delivery::kafka::constants::DEFAULT_DEAD_LETTER_SUFFIX;
use kafka_delivery::{
    Codec, DeliveryGuarantee, IsolationLevel, KafkaConsumerBackend, OutboundMessage, RetryEngine,
    RetryPolicy, Subscription, TopicDeadLetterSink, Utf8Codec,
};
use tokio_util::sync::CancellationToken;

use crate::common::{consumer_settings, create_producer, read_topic, TestResult, QUIET_PERIOD, TEST_TIMEOUT};
use crate::setup::TestContext;

pub async fn test_recovery_before_budget_exhausted() -> TestResult {
    println!("=== Test: Recovery On Third Attempt ===\n");

    let ctx = TestContext::new().await?;
    let topic = ctx.unique_topic("retry-recover").await?;
    let dlq_topic = ctx.dead_letter_topic(&topic, DEFAULT_DEAD_LETTER_SUFFIX).await?;
    let group = ctx.unique_group("retry-recover");

    create_producer(DeliveryGuarantee::Idempotent)?
        .send(OutboundMessage::new(topic.as_str(), "flaky"))?;

    let (tx, rx) = mpsc::channel();
    let mut attempts = 0;
    let codec: Arc<dyn Codec<String>> = Arc::new(Utf8Codec);
    let settings = consumer_settings(&group);
    let engine = RetryEngine::new(
        codec,
        move |msg: String| -> Result<(), &'static str> {
            attempts += 1;
            tx.send((attempts, msg)).ok();
            if attempts < 3 {
                Err("transient downstream failure")
            } else {
                Ok(())
            }
        },
        TopicDeadLetterSink::new(create_producer(DeliveryGuarantee::Idempotent)?),
        RetryPolicy::from_settings(&settings),
    );

    let backend = KafkaConsumerBackend::new(&settings)?;
    let handle = Subscription::new(topic.as_str(), backend, engine, settings.poll_timeout())
        .spawn(CancellationToken::new())?;

    let calls = tokio::task::spawn_blocking(move || {
        (0..3)
            .map(|_| rx.recv_timeout(TEST_TIMEOUT))
            .collect::<Result<Vec<_>, _>>()
    })
    .await??;
    handle.cancel();
    let report = tokio::task::spawn_blocking(move || handle.join()).await??;

    assert_eq!(
        calls,
        vec![(1, "flaky".to_string()), (2, "flaky".to_string()), (3, "flaky".to_string())]
    );
    assert_eq!(report.stats.redelivered, 2);
    assert_eq!(report.stats.committed, 1);
    assert_eq!(report.stats.dead_lettered, 0);
    println!("✅ Same record redelivered twice, then committed");

    let dead = read_topic(&dlq_topic, IsolationLevel::ReadCommitted, 1, QUIET_PERIOD)?;
    assert!(dead.is_empty(), "recovered record was dead-lettered");
    println!("✅ Nothing dead-lettered");

    ctx.cleanup().await?;
    println!("\n✅ Recovery test PASSED\n");
    Ok(())
}
