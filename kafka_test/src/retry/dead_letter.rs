//! Exhausted retry budget escalates to the dead-letter topic

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kafka_delivery::kafka::constants::{DEFAULT_DEAD_LETTER_SUFFIX, DEFAULT_MAX_REDELIVERIES};
use kafka_delivery::{
    Codec, DeliveryGuarantee, IsolationLevel, KafkaConsumerBackend, OutboundMessage, RetryEngine,
    RetryPolicy, Subscription, TopicDeadLetterSink, Utf8Codec,
};
use tokio_util::sync::CancellationToken;

use crate::common::{consumer_settings, create_producer, read_topic, TestResult, QUIET_PERIOD, TEST_TIMEOUT};
use crate::setup::TestContext;

pub async fn test_dead_letter_after_max_redeliveries() -> TestResult {
    println!("=== Test: Dead Letter After Max Redeliveries ===\n");

    let ctx = TestContext::new().await?;
    let topic = ctx.unique_topic("retry-dlq").await?;
    let dlq_topic = ctx.dead_letter_topic(&topic, DEFAULT_DEAD_LETTER_SUFFIX).await?;
    let group = ctx.unique_group("retry-dlq");

    create_producer(DeliveryGuarantee::Idempotent)?
        .send(OutboundMessage::new(topic.as_str(), "poison").key_str("k-1"))?;

    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();
    let codec: Arc<dyn Codec<String>> = Arc::new(Utf8Codec);
    let settings = consumer_settings(&group);
    let engine = RetryEngine::new(
        codec,
        move |_: String| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("downstream unavailable")
        },
        TopicDeadLetterSink::new(create_producer(DeliveryGuarantee::Idempotent)?),
        RetryPolicy::from_settings(&settings),
    );

    let backend = KafkaConsumerBackend::new(&settings)?;
    let handle = Subscription::new(topic.as_str(), backend, engine, settings.poll_timeout())
        .spawn(CancellationToken::new())?;

    println!("Waiting for the dead-letter record...");
    let dead = read_topic(&dlq_topic, IsolationLevel::ReadCommitted, 1, TEST_TIMEOUT)?;
    handle.cancel();
    let report = tokio::task::spawn_blocking(move || handle.join()).await??;

    assert_eq!(dead.len(), 1, "no dead-letter record");
    let record = &dead[0];
    assert_eq!(record.key.as_deref(), Some("k-1"));
    assert_eq!(record.value_str(), "poison");
    assert_eq!(record.header("x-dlq-reason"), Some("downstream unavailable"));
    assert_eq!(
        record.header("x-dlq-attempts"),
        Some(DEFAULT_MAX_REDELIVERIES.to_string().as_str())
    );
    assert_eq!(record.header("x-dlq-source-topic"), Some(topic.as_str()));
    println!("✅ Dead-letter record carries failure context");

    let expected_calls = DEFAULT_MAX_REDELIVERIES as usize + 1;
    assert_eq!(invocations.load(Ordering::SeqCst), expected_calls);
    assert_eq!(report.stats.redelivered, DEFAULT_MAX_REDELIVERIES as u64);
    assert_eq!(report.stats.dead_lettered, 1);
    assert_eq!(report.stats.committed, 1);
    println!("✅ {} handler calls, then escalation", expected_calls);

    let more = read_topic(&dlq_topic, IsolationLevel::ReadCommitted, 2, QUIET_PERIOD)?;
    assert_eq!(more.len(), 1, "record dead-lettered twice");

    ctx.cleanup().await?;
    println!("\n✅ Dead letter test PASSED\n");
    Ok(())
}
