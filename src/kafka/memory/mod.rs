//! In-process broker
//!
//! `InMemoryBroker` implements just enough of Kafka's delivery contract to
//! exercise the producer controller, the retry engine and the subscription
//! runtime without a network:
//!
//! - topics with N partitions, murmur2 key routing
//! - per-session sequence dedup for idempotent producers over the last
//!   `IDEMPOTENCE_WINDOW` sequences; a session is forgotten when its producer drops
//! - transaction markers; read-committed consumers skip aborted records and
//!   stop at the first record of an open transaction
//! - group offsets shared between consumers of the same group
//! - `auto.offset.reset` when a group has no committed offset
//! - one end-of-partition sentinel per position reached
//! - failure injection for sends, transaction handshakes and commits
//!
//! Clones share the same state.

mod consumer;
mod producer;

pub use consumer::MemoryConsumer;
pub use producer::MemoryProducer;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{ConsumerSettings, ProducerSettings};
use crate::kafka::constants::{DEFAULT_TOPIC_PARTITIONS, IDEMPOTENCE_WINDOW};
use crate::kafka::envelope::{Envelope, OutboundMessage};
use crate::kafka::error::{DeliveryError, DeliveryResult};
use crate::kafka::guarantee::IsolationLevel;
use crate::kafka::partitioner::select_partition;
use crate::kafka::producer::SendReceipt;

/// Injected outcome for the next send reaching the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// Broker unreachable; nothing written
    TransientBeforeWrite,
    /// Record written but the acknowledgment is lost
    TransientAfterWrite,
    /// Record rejected; not retriable
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnStatus {
    Open,
    Committed,
    Aborted,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    envelope: Envelope,
    txn: Option<u64>,
}

enum Visibility {
    Deliver,
    Skip,
    Block,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    transactions: HashMap<u64, (String, TxnStatus)>,
    next_txn: u64,
    next_session: u64,
    /// session -> recent (sequence, where the first copy landed), oldest first
    sequences: HashMap<u64, VecDeque<(u64, SendReceipt)>>,
    /// (group, topic, partition) -> resume offset
    group_offsets: HashMap<(String, String, i32), i64>,
    send_failures: VecDeque<SendFailure>,
    init_failures: u32,
    commit_failures: u32,
}

impl BrokerState {
    fn ensure_topic(&mut self, topic: &str) -> &mut Vec<Vec<StoredRecord>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); DEFAULT_TOPIC_PARTITIONS as usize])
    }

    fn seen_sequence(&self, session: u64, sequence: u64) -> Option<SendReceipt> {
        self.sequences
            .get(&session)?
            .iter()
            .find(|(seen, _)| *seen == sequence)
            .map(|(_, receipt)| *receipt)
    }

    fn remember_sequence(&mut self, session: u64, sequence: u64, receipt: SendReceipt) {
        let window = self.sequences.entry(session).or_default();
        window.push_back((sequence, receipt));
        if window.len() > IDEMPOTENCE_WINDOW {
            window.pop_front();
        }
    }

    fn append(&mut self, message: &OutboundMessage, txn: Option<u64>) -> DeliveryResult<SendReceipt> {
        let partitions = self.ensure_topic(&message.topic);
        let partition = select_partition(
            &message.topic,
            message.key.as_deref(),
            partitions.len() as i32,
            message.partition,
        )?;

        let log = &mut partitions[partition as usize];
        let offset = log.len() as i64;
        log.push(StoredRecord {
            envelope: Envelope {
                key: message.key.clone(),
                value: message.value.clone(),
                headers: message.headers.clone(),
                topic: message.topic.clone(),
                partition,
                offset,
            },
            txn,
        });

        Ok(SendReceipt { partition, offset })
    }

    fn visibility(&self, record: &StoredRecord, isolation: IsolationLevel) -> Visibility {
        let status = record
            .txn
            .and_then(|id| self.transactions.get(&id))
            .map(|(_, status)| *status);

        match (isolation, status) {
            (_, None) | (_, Some(TxnStatus::Committed)) => Visibility::Deliver,
            (IsolationLevel::ReadUncommitted, _) => Visibility::Deliver,
            (IsolationLevel::ReadCommitted, Some(TxnStatus::Aborted)) => Visibility::Skip,
            (IsolationLevel::ReadCommitted, Some(TxnStatus::Open)) => Visibility::Block,
        }
    }

    fn log_end(&self, topic: &str, partition: i32) -> i64 {
        self.topics
            .get(topic)
            .and_then(|p| p.get(partition as usize))
            .map_or(0, |log| log.len() as i64)
    }

    fn set_status(&mut self, txn: u64, status: TxnStatus) {
        if let Some(entry) = self.transactions.get_mut(&txn) {
            entry.1 = status;
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `topic` with `partitions` partitions; existing topics are kept
    pub fn create_topic(&self, topic: &str, partitions: i32) {
        self.state
            .lock()
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions.max(1) as usize]);
    }

    pub fn partition_count(&self, topic: &str) -> Option<i32> {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|p| p.len() as i32)
    }

    /// Open a producer session
    pub fn producer(&self, settings: &ProducerSettings) -> DeliveryResult<MemoryProducer> {
        settings.validate()?;
        let session = {
            let mut state = self.state.lock();
            state.next_session += 1;
            state.next_session
        };
        Ok(MemoryProducer::new(self.clone(), session, settings))
    }

    /// Open a consumer for one group
    pub fn consumer(&self, settings: &ConsumerSettings) -> DeliveryResult<MemoryConsumer> {
        settings.validate()?;
        Ok(MemoryConsumer::new(self.clone(), settings))
    }

    /// Queue failures for the next sends, in order
    pub fn fail_next_sends(&self, count: usize, failure: SendFailure) {
        let mut state = self.state.lock();
        state
            .send_failures
            .extend(std::iter::repeat(failure).take(count));
    }

    /// Make the next `count` transaction handshakes time out
    pub fn fail_next_init_transactions(&self, count: u32) {
        self.state.lock().init_failures += count;
    }

    /// Make the next `count` offset commits fail
    pub fn fail_next_commits(&self, count: u32) {
        self.state.lock().commit_failures += count;
    }

    /// Records of every partition visible under `isolation`, partition by partition
    pub fn records(&self, topic: &str, isolation: IsolationLevel) -> Vec<Envelope> {
        let state = self.state.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };

        let mut visible = Vec::new();
        for log in partitions {
            for record in log {
                match state.visibility(record, isolation) {
                    Visibility::Deliver => visible.push(record.envelope.clone()),
                    Visibility::Skip => {}
                    Visibility::Block => break,
                }
            }
        }
        visible
    }

    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state
            .lock()
            .group_offsets
            .get(&(group_id.to_string(), topic.to_string(), partition))
            .copied()
    }

    pub fn log_end_offset(&self, topic: &str, partition: i32) -> i64 {
        self.state.lock().log_end(topic, partition)
    }

    /// Sequences remembered for `session`
    pub fn tracked_sequences(&self, session: u64) -> usize {
        self.state.lock().sequences.get(&session).map_or(0, VecDeque::len)
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryBroker")
            .field("topics", &state.topics.keys().collect::<Vec<_>>())
            .field("transactions", &state.transactions.len())
            .finish()
    }
}

fn injected(failure: SendFailure) -> DeliveryError {
    match failure {
        SendFailure::TransientBeforeWrite => {
            DeliveryError::Transient("injected: broker unavailable".to_string())
        }
        SendFailure::TransientAfterWrite => {
            DeliveryError::Transient("injected: acknowledgment lost".to_string())
        }
        SendFailure::Fatal => DeliveryError::Fatal("injected: record rejected".to_string()),
    }
}
