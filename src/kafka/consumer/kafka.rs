//! rdkafka consumer backend over `BaseConsumer`
//!
//! `BaseConsumer::poll` blocks the calling thread, which is what the
//! subscription worker wants: one dedicated thread per subscription.

use std::time::Duration;

use bytes::Bytes;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::error::KafkaError as RdKafkaError;
use rdkafka::message::{BorrowedMessage, Headers as _, Message};
use rdkafka::{Offset, TopicPartitionList};

use super::backend::{ConsumerBackend, PollOutcome};
use crate::config::ConsumerSettings;
use crate::kafka::constants::SEEK_TIMEOUT_MS;
use crate::kafka::envelope::{Envelope, Headers};
use crate::kafka::error::{DeliveryError, DeliveryResult};

pub struct KafkaConsumerBackend {
    consumer: BaseConsumer,
    topic: Option<String>,
}

impl KafkaConsumerBackend {
    pub fn new(settings: &ConsumerSettings) -> DeliveryResult<Self> {
        settings.validate()?;

        let consumer: BaseConsumer = settings
            .to_client_config()
            .create()
            .map_err(|e| DeliveryError::Consumer(format!("Failed to create consumer: {}", e)))?;

        tracing::debug!(
            bootstrap_servers = %settings.bootstrap_servers,
            group_id = %settings.group_id,
            client_id = %settings.client_id,
            isolation_level = settings.isolation_level.as_config_value(),
            "Kafka consumer created"
        );

        Ok(Self {
            consumer,
            topic: None,
        })
    }
}

fn to_envelope(message: &BorrowedMessage<'_>) -> Envelope {
    let mut headers = Headers::new();
    if let Some(borrowed) = message.headers() {
        for header in borrowed.iter() {
            headers.insert(
                header.key,
                Bytes::copy_from_slice(header.value.unwrap_or_default()),
            );
        }
    }

    Envelope {
        key: message.key().map(Bytes::copy_from_slice),
        value: message
            .payload()
            .map(Bytes::copy_from_slice)
            .unwrap_or_default(),
        headers,
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
    }
}

impl ConsumerBackend for KafkaConsumerBackend {
    fn subscribe(&mut self, topic: &str) -> DeliveryResult<()> {
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| DeliveryError::Consumer(format!("Subscribe to {} failed: {}", topic, e)))?;
        self.topic = Some(topic.to_string());
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> DeliveryResult<PollOutcome> {
        match self.consumer.poll(timeout) {
            None => Ok(PollOutcome::Idle),
            Some(Ok(message)) => Ok(PollOutcome::Record(to_envelope(&message))),
            Some(Err(RdKafkaError::PartitionEOF(partition))) => Ok(PollOutcome::PartitionEof {
                topic: self.topic.clone().unwrap_or_default(),
                partition,
            }),
            Some(Err(e)) => Err(DeliveryError::from_rdkafka(&e)),
        }
    }

    fn seek(&mut self, topic: &str, partition: i32, offset: i64) -> DeliveryResult<()> {
        self.consumer
            .seek(
                topic,
                partition,
                Offset::Offset(offset),
                Duration::from_millis(SEEK_TIMEOUT_MS),
            )
            .map_err(|e| DeliveryError::Consumer(format!("Seek {}[{}]@{} failed: {}", topic, partition, offset, e)))
    }

    fn store_offset(&mut self, topic: &str, partition: i32, offset: i64) -> DeliveryResult<()> {
        self.consumer
            .store_offset(topic, partition, offset)
            .map_err(|e| DeliveryError::OffsetCommit {
                topic: topic.to_string(),
                partition,
                offset,
                reason: e.to_string(),
            })
    }

    fn commit(&mut self, topic: &str, partition: i32, offset: i64) -> DeliveryResult<()> {
        let commit_error = |reason: String| DeliveryError::OffsetCommit {
            topic: topic.to_string(),
            partition,
            offset,
            reason,
        };

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset))
            .map_err(|e| commit_error(e.to_string()))?;

        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| commit_error(e.to_string()))
    }

    fn close(&mut self) -> DeliveryResult<()> {
        if self.topic.take().is_some() {
            self.consumer.unsubscribe();
        }
        Ok(())
    }
}
