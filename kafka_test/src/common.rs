//! Common utilities shared across E2E test modules
//!
//! Client factories for the crate under test plus a raw rdkafka consumer used
//! to verify what actually landed on the broker.

use std::env;
use std::time::{Duration, Instant};

use kafka_delivery::{
    AutoOffsetReset, ConsumerSettings, DeliveryGuarantee, IsolationLevel, KafkaProducerBackend, ProducerSettings,
    ReliableProducer,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::message::{Headers as _, Message};

/// Test result type alias for cleaner function signatures
pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Broker list from KAFKA_BOOTSTRAP_SERVERS or the local default
pub fn bootstrap_servers() -> String {
    env::var("KAFKA_BOOTSTRAP_SERVERS").unwrap_or_else(|_| "localhost:9092".to_string())
}

/// Reliable producer against the live cluster
pub fn create_producer(
    guarantee: DeliveryGuarantee,
) -> Result<ReliableProducer<KafkaProducerBackend>, Box<dyn std::error::Error>> {
    let settings = ProducerSettings::for_guarantee(&bootstrap_servers(), guarantee)
        .client_id("kafka-test");
    create_producer_with(settings)
}

pub fn create_producer_with(
    settings: ProducerSettings,
) -> Result<ReliableProducer<KafkaProducerBackend>, Box<dyn std::error::Error>> {
    let backend = KafkaProducerBackend::new(&settings)?;
    Ok(ReliableProducer::new(backend, settings)?)
}

/// Consumer settings for the retry engine with a short poll timeout
pub fn consumer_settings(group_id: &str) -> ConsumerSettings {
    ConsumerSettings::new(&bootstrap_servers(), group_id)
        .auto_offset_reset(AutoOffsetReset::Earliest)
        .poll_timeout_ms(POLL_TIMEOUT.as_millis() as u64)
}

/// A record as seen by the verification consumer
#[derive(Debug, Clone)]
pub struct ObservedRecord {
    pub key: Option<String>,
    pub value: Vec<u8>,
    pub headers: Vec<(String, String)>,
    pub partition: i32,
    pub offset: i64,
}

impl ObservedRecord {
    pub fn value_str(&self) -> String {
        String::from_utf8_lossy(&self.value).to_string()
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Read `topic` from the beginning under `isolation`
///
/// Returns once `expected` records arrived or `timeout` elapsed, whichever is
/// first; waiting out the timeout is how tests assert that nothing else shows up.
pub fn read_topic(
    topic: &str,
    isolation: IsolationLevel,
    expected: usize,
    timeout: Duration,
) -> Result<Vec<ObservedRecord>, Box<dyn std::error::Error>> {
    let group = format!("verify-{}", uuid::Uuid::new_v4().simple());
    let consumer: BaseConsumer = ClientConfig::new()
        .set("bootstrap.servers", bootstrap_servers())
        .set("group.id", &group)
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "false")
        .set("isolation.level", isolation.as_config_value())
        .create()?;
    consumer.subscribe(&[topic])?;

    let mut records = Vec::new();
    let deadline = Instant::now() + timeout;
    while records.len() < expected && Instant::now() < deadline {
        let Some(result) = consumer.poll(POLL_TIMEOUT) else {
            continue;
        };
        let msg = result?;
        let headers = msg
            .headers()
            .map(|h| {
                h.iter()
                    .map(|header| {
                        (
                            header.key.to_string(),
                            header
                                .value
                                .map(|v| String::from_utf8_lossy(v).to_string())
                                .unwrap_or_default(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        records.push(ObservedRecord {
            key: msg.key().map(|k| String::from_utf8_lossy(k).to_string()),
            value: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            headers,
            partition: msg.partition(),
            offset: msg.offset(),
        });
    }

    Ok(records)
}

/// Default poll timeout for consumer operations
pub const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Default test timeout duration
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait when asserting that nothing more arrives
pub const QUIET_PERIOD: Duration = Duration::from_secs(3);
