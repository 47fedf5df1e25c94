//! Dead-letter sinks
//!
//! A [`DeadLetterRecord`] leaves the retry engine through a [`DeadLetterSink`].
//! The engine commits the source offset whether or not the sink succeeds.

use crossbeam_channel::{Receiver, Sender};

use crate::kafka::constants::{
    DEFAULT_DEAD_LETTER_SUFFIX, DLQ_ATTEMPTS_HEADER, DLQ_REASON_HEADER,
    DLQ_SOURCE_OFFSET_HEADER, DLQ_SOURCE_PARTITION_HEADER, DLQ_SOURCE_TOPIC_HEADER,
};
use crate::kafka::envelope::{DeadLetterRecord, OutboundMessage};
use crate::kafka::error::{DeliveryError, DeliveryResult};
use crate::kafka::producer::{ProducerBackend, ReliableProducer};

pub trait DeadLetterSink: Send {
    fn publish(&self, record: &DeadLetterRecord) -> DeliveryResult<()>;
}

impl<S: DeadLetterSink + ?Sized> DeadLetterSink for Box<S> {
    fn publish(&self, record: &DeadLetterRecord) -> DeliveryResult<()> {
        (**self).publish(record)
    }
}

/// Republishes to `{topic}{suffix}` with the original key, value and headers
///
/// Failure context travels in `x-dlq-*` headers appended after the originals.
pub struct TopicDeadLetterSink<B: ProducerBackend> {
    producer: ReliableProducer<B>,
    suffix: String,
}

impl<B: ProducerBackend> TopicDeadLetterSink<B> {
    pub fn new(producer: ReliableProducer<B>) -> Self {
        Self {
            producer,
            suffix: DEFAULT_DEAD_LETTER_SUFFIX.to_string(),
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn dead_letter_topic(&self, source_topic: &str) -> String {
        format!("{}{}", source_topic, self.suffix)
    }

    fn to_message(&self, record: &DeadLetterRecord) -> OutboundMessage {
        let envelope = &record.envelope;

        let mut headers = envelope.headers.clone();
        headers.insert_str(DLQ_REASON_HEADER, &record.reason);
        headers.insert_str(DLQ_ATTEMPTS_HEADER, &record.attempts.to_string());
        headers.insert_str(DLQ_SOURCE_TOPIC_HEADER, &envelope.topic);
        headers.insert_str(DLQ_SOURCE_PARTITION_HEADER, &envelope.partition.to_string());
        headers.insert_str(DLQ_SOURCE_OFFSET_HEADER, &envelope.offset.to_string());

        let mut message = OutboundMessage::new(
            self.dead_letter_topic(&envelope.topic),
            envelope.value.clone(),
        )
        .headers(headers);
        message.key = envelope.key.clone();
        message
    }
}

impl<B: ProducerBackend> DeadLetterSink for TopicDeadLetterSink<B> {
    fn publish(&self, record: &DeadLetterRecord) -> DeliveryResult<()> {
        let message = self.to_message(record);
        let report = self
            .producer
            .send(message)
            .map_err(|e| DeliveryError::DeadLetter(e.to_string()))?;

        tracing::warn!(
            source_topic = %record.envelope.topic,
            source_partition = record.envelope.partition,
            source_offset = record.envelope.offset,
            dlq_topic = %report.topic,
            dlq_offset = report.offset,
            attempts = record.attempts,
            "Dead-lettered: {}",
            record.reason
        );
        Ok(())
    }
}

/// Only logs; the record is dropped
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDeadLetterSink;

impl DeadLetterSink for LoggingDeadLetterSink {
    fn publish(&self, record: &DeadLetterRecord) -> DeliveryResult<()> {
        tracing::error!(
            topic = %record.envelope.topic,
            partition = record.envelope.partition,
            offset = record.envelope.offset,
            attempts = record.attempts,
            "Dead letter: {}",
            record.reason
        );
        Ok(())
    }
}

/// Hands records to an in-process receiver
#[derive(Debug, Clone)]
pub struct ChannelDeadLetterSink {
    tx: Sender<DeadLetterRecord>,
}

impl ChannelDeadLetterSink {
    /// Unbounded sink plus the receiving end
    pub fn unbounded() -> (Self, Receiver<DeadLetterRecord>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }

    pub fn new(tx: Sender<DeadLetterRecord>) -> Self {
        Self { tx }
    }
}

impl DeadLetterSink for ChannelDeadLetterSink {
    fn publish(&self, record: &DeadLetterRecord) -> DeliveryResult<()> {
        self.tx
            .send(record.clone())
            .map_err(|_| DeliveryError::DeadLetter("receiver disconnected".to_string()))
    }
}
