//! Restarted subscriptions resume from the committed offset

use std::sync::mpsc;
use std::time::Duration;

use kafka_delivery::{Config, HandlerError, MessageBus, SubscriptionHandle};
use tokio_util::sync::CancellationToken;

use crate::common::{bootstrap_servers, TestResult, TEST_TIMEOUT};
use crate::setup::TestContext;

fn start(
    bus: &MessageBus<kafka_delivery::KafkaConnector>,
    topic: &str,
    group: &str,
) -> Result<(SubscriptionHandle, mpsc::Receiver<String>), Box<dyn std::error::Error>> {
    let (tx, rx) = mpsc::channel();
    let handle = bus.consume(
        topic,
        move |msg: String| {
            tx.send(msg).ok();
            Ok::<(), HandlerError>(())
        },
        Some(group),
        CancellationToken::new(),
    )?;
    Ok((handle, rx))
}

async fn stop(handle: SubscriptionHandle) -> TestResult {
    handle.cancel();
    tokio::task::spawn_blocking(move || handle.join()).await??;
    Ok(())
}

pub async fn test_resume_after_restart() -> TestResult {
    println!("=== Test: Resume After Restart ===\n");

    let ctx = TestContext::new().await?;
    let topic = ctx.unique_topic("resume").await?;
    let group = ctx.unique_group("resume");

    let config = Config {
        bootstrap_servers: bootstrap_servers(),
        topic: topic.clone(),
        poll_timeout_ms: 100,
        ..Config::default()
    };
    let bus = MessageBus::kafka(config)?;

    bus.produce(&topic, &"first".to_string()).await?;
    let (handle, rx) = start(&bus, &topic, &group)?;
    assert_eq!(rx.recv_timeout(TEST_TIMEOUT)?, "first");
    stop(handle).await?;
    println!("✅ First subscription consumed and committed");

    bus.produce(&topic, &"second".to_string()).await?;
    let (handle, rx) = start(&bus, &topic, &group)?;
    assert_eq!(rx.recv_timeout(TEST_TIMEOUT)?, "second");
    assert!(
        rx.recv_timeout(Duration::from_secs(2)).is_err(),
        "committed record was delivered again"
    );
    stop(handle).await?;
    println!("✅ Restart resumed after the committed offset");

    ctx.cleanup().await?;
    println!("\n✅ Resume after restart test PASSED\n");
    Ok(())
}
