//! Test environment setup and teardown
//!
//! Provides TestContext for test isolation with automatic cleanup via RAII.

use std::sync::Arc;
use std::time::Duration;

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::common::{bootstrap_servers, TestResult};

/// Test context providing isolation and automatic cleanup
///
/// Each test should create its own TestContext which:
/// - Generates unique topic/group names to prevent collisions
/// - Creates topics up front so consumers never race auto-creation
/// - Deletes its topics on drop
pub struct TestContext {
    /// Unique identifier for this test run
    pub test_id: String,
    admin: Arc<AdminClient<DefaultClientContext>>,
    /// Topics created during this test
    topics_created: Arc<Mutex<Vec<String>>>,
}

impl TestContext {
    pub async fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers())
            .create()?;

        Ok(Self {
            test_id: Uuid::new_v4().simple().to_string()[..8].to_string(),
            admin: Arc::new(admin),
            topics_created: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Create a unique single-partition topic
    pub async fn unique_topic(&self, base: &str) -> Result<String, Box<dyn std::error::Error>> {
        self.unique_topic_with_partitions(base, 1).await
    }

    pub async fn unique_topic_with_partitions(
        &self,
        base: &str,
        partitions: i32,
    ) -> Result<String, Box<dyn std::error::Error>> {
        let name = format!("{}-{}-{}", base, self.test_id, &Uuid::new_v4().simple().to_string()[..8]);
        self.create_topic(&name, partitions).await?;
        Ok(name)
    }

    /// Create the dead-letter topic belonging to `topic`
    pub async fn dead_letter_topic(&self, topic: &str, suffix: &str) -> Result<String, Box<dyn std::error::Error>> {
        let name = format!("{}{}", topic, suffix);
        self.create_topic(&name, 1).await?;
        Ok(name)
    }

    /// Generate a unique consumer group ID for this test
    pub fn unique_group(&self, base: &str) -> String {
        format!("{}-{}-{}", base, self.test_id, &Uuid::new_v4().simple().to_string()[..8])
    }

    async fn create_topic(&self, name: &str, partitions: i32) -> TestResult {
        let topic = NewTopic::new(name, partitions, TopicReplication::Fixed(1));
        let options = AdminOptions::new().operation_timeout(Some(Duration::from_secs(10)));
        for result in self.admin.create_topics(&[topic], &options).await? {
            result.map_err(|(topic, code)| format!("failed to create {}: {}", topic, code))?;
        }
        self.topics_created.lock().await.push(name.to_string());
        Ok(())
    }

    /// Manually trigger cleanup (also called automatically on drop)
    pub async fn cleanup(&self) -> TestResult {
        let topics = std::mem::take(&mut *self.topics_created.lock().await);
        delete_topics(&self.admin, &topics).await;
        Ok(())
    }
}

async fn delete_topics(admin: &AdminClient<DefaultClientContext>, topics: &[String]) {
    if topics.is_empty() {
        return;
    }
    let names: Vec<&str> = topics.iter().map(String::as_str).collect();
    if let Err(e) = admin.delete_topics(&names, &AdminOptions::new()).await {
        eprintln!("Topic cleanup failed: {}", e);
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        // Best-effort: nothing is cleaned if the runtime is shutting down
        let topics = self.topics_created.clone();
        let admin = self.admin.clone();

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let topics = std::mem::take(&mut *topics.lock().await);
                delete_topics(&admin, &topics).await;
            });
        }
    }
}

/// Verify that the cluster is reachable
pub async fn verify_broker_ready() -> TestResult {
    use rdkafka::producer::{FutureProducer, Producer};

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", bootstrap_servers())
        .set("message.timeout.ms", "5000")
        .create()?;

    producer
        .client()
        .fetch_metadata(None, Duration::from_secs(5))?;

    Ok(())
}
