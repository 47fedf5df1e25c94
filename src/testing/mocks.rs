//! Recording test doubles for the broker seams
//!
//! Unlike [`InMemoryBroker`](crate::kafka::memory::InMemoryBroker) these keep
//! a log of every call, for tests that assert on call order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::kafka::consumer::{ConsumerBackend, PollOutcome};
use crate::kafka::envelope::OutboundMessage;
use crate::kafka::error::{DeliveryError, DeliveryResult};
use crate::kafka::producer::{ProducerBackend, SendReceipt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerCall {
    /// Send with this sequence
    Send(u64),
    InitTransactions,
    BeginTransaction,
    CommitTransaction,
    AbortTransaction,
    Flush,
}

#[derive(Default)]
struct ProducerLog {
    calls: Vec<ProducerCall>,
    messages: Vec<OutboundMessage>,
    /// (remaining, transient)
    failures: (u32, bool),
    next_offset: i64,
}

/// Producer backend that records calls and fails on request
#[derive(Default)]
pub struct RecordingProducer {
    log: Mutex<ProducerLog>,
}

impl RecordingProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` sends, transiently or fatally
    pub fn fail_next_sends(&self, count: u32, transient: bool) {
        self.log.lock().failures = (count, transient);
    }

    pub fn calls(&self) -> Vec<ProducerCall> {
        self.log.lock().calls.clone()
    }

    pub fn send_count(&self) -> usize {
        self.log
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, ProducerCall::Send(_)))
            .count()
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.log
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                ProducerCall::Send(seq) => Some(*seq),
                _ => None,
            })
            .collect()
    }

    /// Last message that was accepted
    pub fn last_message(&self) -> Option<OutboundMessage> {
        self.log.lock().messages.last().cloned()
    }

    fn record(&self, call: ProducerCall) {
        self.log.lock().calls.push(call);
    }
}

impl ProducerBackend for RecordingProducer {
    fn send(&self, message: &OutboundMessage, sequence: u64) -> DeliveryResult<SendReceipt> {
        let mut log = self.log.lock();
        log.calls.push(ProducerCall::Send(sequence));

        let (remaining, transient) = log.failures;
        if remaining > 0 {
            log.failures.0 -= 1;
            return Err(if transient {
                DeliveryError::Transient("scripted timeout".to_string())
            } else {
                DeliveryError::Fatal("scripted rejection".to_string())
            });
        }

        log.messages.push(message.clone());
        let offset = log.next_offset;
        log.next_offset += 1;
        Ok(SendReceipt {
            partition: message.partition.unwrap_or(0),
            offset,
        })
    }

    fn init_transactions(&self, _timeout: Duration) -> DeliveryResult<()> {
        self.record(ProducerCall::InitTransactions);
        Ok(())
    }

    fn begin_transaction(&self) -> DeliveryResult<()> {
        self.record(ProducerCall::BeginTransaction);
        Ok(())
    }

    fn commit_transaction(&self, _timeout: Duration) -> DeliveryResult<()> {
        self.record(ProducerCall::CommitTransaction);
        Ok(())
    }

    fn abort_transaction(&self, _timeout: Duration) -> DeliveryResult<()> {
        self.record(ProducerCall::AbortTransaction);
        Ok(())
    }

    fn flush(&self, _timeout: Duration) -> DeliveryResult<()> {
        self.record(ProducerCall::Flush);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerCall {
    Subscribe(String),
    Seek(String, i32, i64),
    StoreOffset(String, i32, i64),
    Commit(String, i32, i64),
    Close,
}

/// Consumer backend replaying a fixed list of poll outcomes
///
/// Polls are not recorded; once the script runs out every poll is idle.
#[derive(Default)]
pub struct ScriptedConsumer {
    outcomes: VecDeque<PollOutcome>,
    calls: Arc<Mutex<Vec<ConsumerCall>>>,
    fail_subscribe: bool,
    fail_seek: bool,
    fail_commit: bool,
    failing_polls: u32,
}

impl ScriptedConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes(outcomes: Vec<PollOutcome>) -> Self {
        Self {
            outcomes: outcomes.into(),
            ..Self::default()
        }
    }

    pub fn fail_subscribe(&mut self) {
        self.fail_subscribe = true;
    }

    pub fn fail_seeks(&mut self) {
        self.fail_seek = true;
    }

    pub fn fail_commits(&mut self) {
        self.fail_commit = true;
    }

    pub fn fail_next_polls(&mut self, count: u32) {
        self.failing_polls = count;
    }

    pub fn calls(&self) -> Vec<ConsumerCall> {
        self.calls.lock().clone()
    }

    /// Call log that outlives the consumer
    pub fn shared_calls(&self) -> Arc<Mutex<Vec<ConsumerCall>>> {
        self.calls.clone()
    }

    pub fn commits(&self) -> Vec<(String, i32, i64)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ConsumerCall::Commit(t, p, o) => Some((t.clone(), *p, *o)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ConsumerCall) {
        self.calls.lock().push(call);
    }
}

impl ConsumerBackend for ScriptedConsumer {
    fn subscribe(&mut self, topic: &str) -> DeliveryResult<()> {
        self.record(ConsumerCall::Subscribe(topic.to_string()));
        if self.fail_subscribe {
            return Err(DeliveryError::Consumer("scripted subscribe failure".to_string()));
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> DeliveryResult<PollOutcome> {
        if self.failing_polls > 0 {
            self.failing_polls -= 1;
            return Err(DeliveryError::Transient("scripted poll failure".to_string()));
        }
        match self.outcomes.pop_front() {
            Some(outcome) => Ok(outcome),
            None => {
                std::thread::sleep(timeout);
                Ok(PollOutcome::Idle)
            }
        }
    }

    fn seek(&mut self, topic: &str, partition: i32, offset: i64) -> DeliveryResult<()> {
        if self.fail_seek {
            return Err(DeliveryError::Consumer("scripted seek failure".to_string()));
        }
        self.record(ConsumerCall::Seek(topic.to_string(), partition, offset));
        Ok(())
    }

    fn store_offset(&mut self, topic: &str, partition: i32, offset: i64) -> DeliveryResult<()> {
        self.record(ConsumerCall::StoreOffset(topic.to_string(), partition, offset));
        Ok(())
    }

    fn commit(&mut self, topic: &str, partition: i32, offset: i64) -> DeliveryResult<()> {
        if self.fail_commit {
            return Err(DeliveryError::OffsetCommit {
                topic: topic.to_string(),
                partition,
                offset,
                reason: "scripted commit failure".to_string(),
            });
        }
        self.record(ConsumerCall::Commit(topic.to_string(), partition, offset));
        Ok(())
    }

    fn close(&mut self) -> DeliveryResult<()> {
        self.record(ConsumerCall::Close);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::helpers::text_envelope;

    #[test]
    fn test_recording_producer_fails_then_recovers() {
        let producer = RecordingProducer::new();
        producer.fail_next_sends(1, true);

        let msg = OutboundMessage::new("t", "v");
        assert!(producer.send(&msg, 1).unwrap_err().is_transient());
        assert_eq!(producer.send(&msg, 1).unwrap().offset, 0);
        assert_eq!(producer.sequences(), vec![1, 1]);
        assert_eq!(producer.last_message(), Some(msg));
    }

    #[test]
    fn test_scripted_consumer_replays_then_idles() {
        let record = PollOutcome::Record(text_envelope("t", 0, 0, "a"));
        let mut consumer = ScriptedConsumer::with_outcomes(vec![record.clone()]);

        assert_eq!(consumer.poll(Duration::ZERO).unwrap(), record);
        assert_eq!(consumer.poll(Duration::ZERO).unwrap(), PollOutcome::Idle);
        assert!(consumer.calls().is_empty());
    }
}
