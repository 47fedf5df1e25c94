use std::collections::HashMap;
use std::time::Duration;

use super::{InMemoryBroker, Visibility};
use crate::config::ConsumerSettings;
use crate::kafka::consumer::{ConsumerBackend, PollOutcome};
use crate::kafka::error::{DeliveryError, DeliveryResult};
use crate::kafka::guarantee::{AutoOffsetReset, IsolationLevel};

/// One group member against an [`InMemoryBroker`]
///
/// Reads every partition of its topic round-robin.
pub struct MemoryConsumer {
    broker: InMemoryBroker,
    group_id: String,
    isolation: IsolationLevel,
    reset: AutoOffsetReset,
    topic: Option<String>,
    /// Next offset to read per partition
    positions: HashMap<i32, i64>,
    stored: HashMap<i32, i64>,
    /// Position at which EOF was last reported per partition
    eof_at: HashMap<i32, i64>,
    next_partition: i32,
    closed: bool,
}

impl MemoryConsumer {
    pub(super) fn new(broker: InMemoryBroker, settings: &ConsumerSettings) -> Self {
        Self {
            broker,
            group_id: settings.group_id.clone(),
            isolation: settings.isolation_level,
            reset: settings.auto_offset_reset,
            topic: None,
            positions: HashMap::new(),
            stored: HashMap::new(),
            eof_at: HashMap::new(),
            next_partition: 0,
            closed: false,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Locally stored resume position
    pub fn stored_offset(&self, partition: i32) -> Option<i64> {
        self.stored.get(&partition).copied()
    }

    fn ensure_open(&self) -> DeliveryResult<&str> {
        if self.closed {
            return Err(DeliveryError::Consumer("consumer is closed".to_string()));
        }
        self.topic
            .as_deref()
            .ok_or_else(|| DeliveryError::Consumer("consumer is not subscribed".to_string()))
    }
}

impl ConsumerBackend for MemoryConsumer {
    fn subscribe(&mut self, topic: &str) -> DeliveryResult<()> {
        if self.closed {
            return Err(DeliveryError::Consumer("consumer is closed".to_string()));
        }

        let mut state = self.broker.state.lock();
        let partitions = state.ensure_topic(topic).len() as i32;

        self.positions.clear();
        self.eof_at.clear();
        for partition in 0..partitions {
            let committed = state
                .group_offsets
                .get(&(self.group_id.clone(), topic.to_string(), partition))
                .copied();
            let start = committed.unwrap_or_else(|| match self.reset {
                AutoOffsetReset::Earliest => 0,
                AutoOffsetReset::Latest => state.log_end(topic, partition),
            });
            self.positions.insert(partition, start);
        }
        self.topic = Some(topic.to_string());

        tracing::debug!(
            topic,
            group_id = %self.group_id,
            partitions,
            "Memory consumer subscribed"
        );
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> DeliveryResult<PollOutcome> {
        let topic = self.ensure_open()?.to_string();

        {
            let state = self.broker.state.lock();
            let Some(partitions) = state.topics.get(&topic) else {
                return Ok(PollOutcome::Idle);
            };
            let count = partitions.len() as i32;

            for i in 0..count {
                let partition = (self.next_partition + i) % count;
                let log = &partitions[partition as usize];
                let mut position = *self.positions.entry(partition).or_insert(0);

                while let Some(record) = log.get(position as usize) {
                    match state.visibility(record, self.isolation) {
                        Visibility::Deliver => {
                            self.positions.insert(partition, position + 1);
                            self.next_partition = (partition + 1) % count;
                            return Ok(PollOutcome::Record(record.envelope.clone()));
                        }
                        Visibility::Skip => position += 1,
                        Visibility::Block => break,
                    }
                }
                self.positions.insert(partition, position);
            }

            for partition in 0..count {
                let position = self.positions.get(&partition).copied().unwrap_or(0);
                let at_end = position >= partitions[partition as usize].len() as i64;
                if at_end && self.eof_at.get(&partition) != Some(&position) {
                    self.eof_at.insert(partition, position);
                    return Ok(PollOutcome::PartitionEof {
                        topic: topic.clone(),
                        partition,
                    });
                }
            }
        }

        std::thread::sleep(timeout);
        Ok(PollOutcome::Idle)
    }

    fn seek(&mut self, topic: &str, partition: i32, offset: i64) -> DeliveryResult<()> {
        let subscribed = self.ensure_open()?;
        if subscribed != topic {
            return Err(DeliveryError::Consumer(format!(
                "cannot seek {}: subscribed to {}",
                topic, subscribed
            )));
        }
        if offset < 0 || offset > self.broker.log_end_offset(topic, partition) {
            return Err(DeliveryError::Consumer(format!(
                "offset {} out of range for {}[{}]",
                offset, topic, partition
            )));
        }
        self.positions.insert(partition, offset);
        Ok(())
    }

    fn store_offset(&mut self, _topic: &str, partition: i32, offset: i64) -> DeliveryResult<()> {
        self.ensure_open()?;
        self.stored.insert(partition, offset);
        Ok(())
    }

    fn commit(&mut self, topic: &str, partition: i32, offset: i64) -> DeliveryResult<()> {
        self.ensure_open()?;

        let mut state = self.broker.state.lock();
        if state.commit_failures > 0 {
            state.commit_failures -= 1;
            return Err(DeliveryError::OffsetCommit {
                topic: topic.to_string(),
                partition,
                offset,
                reason: "injected: coordinator not available".to_string(),
            });
        }
        state
            .group_offsets
            .insert((self.group_id.clone(), topic.to_string(), partition), offset);
        Ok(())
    }

    fn close(&mut self) -> DeliveryResult<()> {
        self.closed = true;
        Ok(())
    }
}
