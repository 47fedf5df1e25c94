//! Consumer offset and retry engine
//!
//! Each polled record goes through:
//!
//! ```text
//! Received -> Processing -> Resolved      (store + commit, advance)
//!                        -> Redeliver     (seek back to the same offset)
//!                        -> DeadLettered  (sink, then store + commit, advance)
//! ```
//!
//! Offsets are stored and then committed, both as `offset + 1`, exactly once
//! per record and only on a terminal transition. Redelivery never touches
//! them, so a crash mid-retry replays from the last committed offset.
//!
//! Records that fail to decode skip the retry budget entirely: a payload that
//! cannot be parsed fails the same way every time. They go straight to the
//! dead-letter sink with a `codec:` reason.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::backend::{ConsumerBackend, PollOutcome};
use super::cursor::ConsumptionCursor;
use super::dead_letter::DeadLetterSink;
use crate::config::ConsumerSettings;
use crate::kafka::codec::Codec;
use crate::kafka::constants::{DEFAULT_MAX_REDELIVERIES, POISON_REASON_PREFIX};
use crate::kafka::envelope::{DeadLetterRecord, Envelope};
use crate::kafka::error::CodecError;

/// Error type handlers report
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Caller callback invoked with each decoded payload
pub trait MessageHandler<T>: Send {
    fn handle(&mut self, payload: T, envelope: &Envelope) -> Result<(), HandlerError>;
}

impl<T, F, E> MessageHandler<T> for F
where
    F: FnMut(T) -> Result<(), E> + Send,
    E: Into<HandlerError>,
{
    fn handle(&mut self, payload: T, _envelope: &Envelope) -> Result<(), HandlerError> {
        self(payload).map_err(Into::into)
    }
}

/// Redelivery budget for the record currently in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Redeliveries performed so far
    pub attempts: u32,
    pub max: u32,
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REDELIVERIES)
    }
}

impl RetryState {
    pub fn new(max: u32) -> Self {
        Self { attempts: 0, max }
    }

    /// Count a failure; true if a redelivery is still allowed
    pub fn record_failure(&mut self) -> bool {
        if self.exhausted() {
            return false;
        }
        self.attempts += 1;
        true
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_redeliveries: u32,
    /// Pause before each redelivery
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_redeliveries: DEFAULT_MAX_REDELIVERIES,
            backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &ConsumerSettings) -> Self {
        Self {
            max_redeliveries: settings.max_redeliveries,
            backoff: settings.retry_backoff(),
        }
    }
}

/// What the engine did with one poll outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// EOF sentinel or idle poll; no state change
    Skipped,
    /// Handler succeeded; resume position is `offset + 1`
    Committed { offset: i64 },
    /// Seeked back; `attempt` is the redelivery number (1-based)
    Redelivered { attempt: u32 },
    /// Retry budget exhausted; offset committed anyway
    DeadLettered { attempts: u32 },
    /// Payload could not be decoded; dead-lettered and committed
    Poisoned(CodecError),
}

/// Counters reported when a subscription stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    pub received: u64,
    pub committed: u64,
    pub redelivered: u64,
    pub dead_lettered: u64,
    pub poisoned: u64,
    pub eof: u64,
    pub poll_errors: u64,
    pub commit_failures: u64,
    pub dead_letter_failures: u64,
}

pub struct RetryEngine<T> {
    codec: Arc<dyn Codec<T>>,
    handler: Box<dyn MessageHandler<T>>,
    sink: Box<dyn DeadLetterSink>,
    policy: RetryPolicy,
    /// Per partition: the offset being retried and its budget
    retries: HashMap<(String, i32), (i64, RetryState)>,
    /// Partition of the most recently handled record
    last: Option<(String, i32)>,
    cursors: HashMap<(String, i32), ConsumptionCursor>,
    stats: SubscriptionStats,
}

impl<T> RetryEngine<T> {
    pub fn new(
        codec: Arc<dyn Codec<T>>,
        handler: impl MessageHandler<T> + 'static,
        sink: impl DeadLetterSink + 'static,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            codec,
            handler: Box::new(handler),
            sink: Box::new(sink),
            policy,
            retries: HashMap::new(),
            last: None,
            cursors: HashMap::new(),
            stats: SubscriptionStats::default(),
        }
    }

    /// Redeliveries spent on the most recently handled record
    pub fn attempts(&self) -> u32 {
        self.last
            .as_ref()
            .map_or(0, |(topic, partition)| self.attempts_for(topic, *partition))
    }

    /// Redeliveries spent on the record in flight on one partition
    pub fn attempts_for(&self, topic: &str, partition: i32) -> u32 {
        self.retries
            .get(&(topic.to_string(), partition))
            .map_or(0, |(_, state)| state.attempts)
    }

    pub fn cursor(&self, topic: &str, partition: i32) -> Option<&ConsumptionCursor> {
        self.cursors.get(&(topic.to_string(), partition))
    }

    pub fn stats(&self) -> SubscriptionStats {
        self.stats
    }

    pub(crate) fn record_poll_error(&mut self) {
        self.stats.poll_errors += 1;
    }

    /// Drive one poll outcome to its disposition
    pub fn handle<B>(&mut self, backend: &mut B, outcome: PollOutcome) -> Disposition
    where
        B: ConsumerBackend + ?Sized,
    {
        match outcome {
            PollOutcome::Idle => Disposition::Skipped,
            PollOutcome::PartitionEof { topic, partition } => {
                self.stats.eof += 1;
                tracing::trace!(topic = %topic, partition, "Reached end of partition");
                Disposition::Skipped
            }
            PollOutcome::Record(envelope) => self.process(backend, envelope),
        }
    }

    fn process<B>(&mut self, backend: &mut B, envelope: Envelope) -> Disposition
    where
        B: ConsumerBackend + ?Sized,
    {
        self.stats.received += 1;

        self.retry_state(&envelope);
        self.last = Some((envelope.topic.clone(), envelope.partition));

        self.cursors
            .entry((envelope.topic.clone(), envelope.partition))
            .or_insert_with(|| ConsumptionCursor::new(envelope.topic.as_str(), envelope.partition))
            .observe(envelope.offset);

        let payload = match self.codec.decode(&envelope.value) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(
                    topic = %envelope.topic,
                    partition = envelope.partition,
                    offset = envelope.offset,
                    "Undecodable record: {}",
                    e
                );
                self.stats.poisoned += 1;
                self.dead_letter(&envelope, format!("{} {}", POISON_REASON_PREFIX, e), 0);
                self.resolve(backend, &envelope);
                return Disposition::Poisoned(e);
            }
        };

        let failure = match self.handler.handle(payload, &envelope) {
            Ok(()) => {
                tracing::debug!(
                    topic = %envelope.topic,
                    partition = envelope.partition,
                    offset = envelope.offset,
                    attempts = self.attempts_for(&envelope.topic, envelope.partition),
                    "Record processed"
                );
                self.resolve(backend, &envelope);
                return Disposition::Committed {
                    offset: envelope.offset,
                };
            }
            Err(e) => e.to_string(),
        };

        let state = self.retry_state(&envelope);
        if state.record_failure() {
            let attempt = state.attempts;
            let max = state.max;
            tracing::warn!(
                topic = %envelope.topic,
                partition = envelope.partition,
                offset = envelope.offset,
                attempt,
                max,
                "Handler failed, redelivering: {}",
                failure
            );

            if !self.policy.backoff.is_zero() {
                std::thread::sleep(self.policy.backoff);
            }

            match backend.seek(&envelope.topic, envelope.partition, envelope.offset) {
                Ok(()) => {
                    self.stats.redelivered += 1;
                    return Disposition::Redelivered { attempt };
                }
                Err(e) => {
                    tracing::error!(
                        topic = %envelope.topic,
                        partition = envelope.partition,
                        offset = envelope.offset,
                        "Seek back failed, escalating: {}",
                        e
                    );
                    let reason = format!("{} (seek failed: {})", failure, e);
                    return self.escalate(backend, &envelope, reason);
                }
            }
        }

        self.escalate(backend, &envelope, failure)
    }

    fn escalate<B>(&mut self, backend: &mut B, envelope: &Envelope, reason: String) -> Disposition
    where
        B: ConsumerBackend + ?Sized,
    {
        let attempts = self.attempts_for(&envelope.topic, envelope.partition);
        self.dead_letter(envelope, reason, attempts);
        self.resolve(backend, envelope);
        Disposition::DeadLettered { attempts }
    }

    /// Budget for the record at `envelope`'s position
    ///
    /// A partition keeps its budget until it moves to a different offset, so
    /// records polled from other partitions in between never reset it.
    fn retry_state(&mut self, envelope: &Envelope) -> &mut RetryState {
        let max = self.policy.max_redeliveries;
        let entry = self
            .retries
            .entry((envelope.topic.clone(), envelope.partition))
            .or_insert((envelope.offset, RetryState::new(max)));
        if entry.0 != envelope.offset {
            *entry = (envelope.offset, RetryState::new(max));
        }
        &mut entry.1
    }

    fn dead_letter(&mut self, envelope: &Envelope, reason: String, attempts: u32) {
        let record = DeadLetterRecord {
            envelope: envelope.clone(),
            reason,
            attempts,
        };

        match self.sink.publish(&record) {
            Ok(()) => self.stats.dead_lettered += 1,
            Err(e) => {
                self.stats.dead_letter_failures += 1;
                tracing::error!(
                    topic = %envelope.topic,
                    partition = envelope.partition,
                    offset = envelope.offset,
                    "Dead-letter sink failed, committing anyway: {}",
                    e
                );
            }
        }
    }

    /// Store then commit `offset + 1`, reset the retry budget
    fn resolve<B>(&mut self, backend: &mut B, envelope: &Envelope)
    where
        B: ConsumerBackend + ?Sized,
    {
        let next = envelope.next_offset();
        let key = (envelope.topic.clone(), envelope.partition);

        self.retries.remove(&key);

        if let Err(e) = backend.store_offset(&envelope.topic, envelope.partition, next) {
            self.stats.commit_failures += 1;
            tracing::error!(
                topic = %envelope.topic,
                partition = envelope.partition,
                offset = next,
                "Store offset failed: {}",
                e
            );
            return;
        }
        if let Some(cursor) = self.cursors.get_mut(&key) {
            cursor.mark_stored();
        }

        match backend.commit(&envelope.topic, envelope.partition, next) {
            Ok(()) => {
                self.stats.committed += 1;
                if let Some(cursor) = self.cursors.get_mut(&key) {
                    cursor.mark_committed();
                }
            }
            Err(e) => {
                self.stats.commit_failures += 1;
                tracing::error!(
                    topic = %envelope.topic,
                    partition = envelope.partition,
                    offset = next,
                    "Commit failed: {}",
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::codec::{json_gzip, Utf8Codec};
    use crate::kafka::consumer::dead_letter::ChannelDeadLetterSink;
    use crate::testing::helpers::{envelope, text_envelope};
    use crate::testing::mocks::{ConsumerCall, ScriptedConsumer};

    fn engine<H>(handler: H) -> (RetryEngine<String>, crossbeam_channel::Receiver<DeadLetterRecord>)
    where
        H: MessageHandler<String> + 'static,
    {
        let (sink, rx) = ChannelDeadLetterSink::unbounded();
        let engine = RetryEngine::new(Arc::new(Utf8Codec), handler, sink, RetryPolicy::default());
        (engine, rx)
    }

    #[test]
    fn test_retry_state_budget() {
        let mut state = RetryState::new(3);
        assert!(state.record_failure());
        assert!(state.record_failure());
        assert!(state.record_failure());
        assert!(state.exhausted());
        assert!(!state.record_failure());
        assert_eq!(state.attempts, 3);
        state.reset();
        assert_eq!(state.attempts, 0);
    }

    #[test]
    fn test_zero_budget_dead_letters_immediately() {
        let mut state = RetryState::new(0);
        assert!(!state.record_failure());
    }

    #[test]
    fn test_success_stores_then_commits() {
        let (mut engine, rx) = engine(|_: String| Ok::<(), HandlerError>(()));
        let mut backend = ScriptedConsumer::new();

        let disposition = engine.handle(&mut backend, PollOutcome::Record(text_envelope("t", 0, 5, "hi")));

        assert_eq!(disposition, Disposition::Committed { offset: 5 });
        assert_eq!(
            backend.calls(),
            &[
                ConsumerCall::StoreOffset("t".to_string(), 0, 6),
                ConsumerCall::Commit("t".to_string(), 0, 6),
            ]
        );
        assert!(rx.try_recv().is_err());
        let cursor = engine.cursor("t", 0).unwrap();
        assert!(cursor.stored && cursor.committed);
        assert_eq!(engine.stats().committed, 1);
    }

    #[test]
    fn test_failure_seeks_back_without_committing() {
        let (mut engine, _rx) = engine(|_: String| Err::<(), _>("nope"));
        let mut backend = ScriptedConsumer::new();

        let disposition = engine.handle(&mut backend, PollOutcome::Record(text_envelope("t", 1, 9, "x")));

        assert_eq!(disposition, Disposition::Redelivered { attempt: 1 });
        assert_eq!(backend.calls(), &[ConsumerCall::Seek("t".to_string(), 1, 9)]);
        assert_eq!(engine.attempts(), 1);
        let cursor = engine.cursor("t", 1).unwrap();
        assert!(!cursor.stored && !cursor.committed);
    }

    #[test]
    fn test_always_failing_handler_dead_letters_after_budget() {
        let (mut engine, rx) = engine(|_: String| Err::<(), _>("permanent"));
        let mut backend = ScriptedConsumer::new();
        let record = text_envelope("t", 0, 3, "x");

        let mut dispositions = Vec::new();
        for _ in 0..4 {
            dispositions.push(engine.handle(&mut backend, PollOutcome::Record(record.clone())));
        }

        assert_eq!(
            dispositions,
            vec![
                Disposition::Redelivered { attempt: 1 },
                Disposition::Redelivered { attempt: 2 },
                Disposition::Redelivered { attempt: 3 },
                Disposition::DeadLettered { attempts: 3 },
            ]
        );
        let dead = rx.try_recv().unwrap();
        assert_eq!(dead.attempts, 3);
        assert_eq!(dead.reason, "permanent");
        assert_eq!(dead.envelope.offset, 3);
        assert!(rx.try_recv().is_err());

        assert_eq!(backend.commits(), vec![("t".to_string(), 0, 4)]);
        assert_eq!(engine.attempts(), 0);
    }

    #[test]
    fn test_fail_twice_then_succeed() {
        let mut remaining_failures = 2;
        let handler = move |_: String| {
            if remaining_failures > 0 {
                remaining_failures -= 1;
                Err("flaky")
            } else {
                Ok(())
            }
        };
        let (mut engine, rx) = engine(handler);
        let mut backend = ScriptedConsumer::new();
        let record = text_envelope("t", 0, 0, "x");

        assert!(matches!(
            engine.handle(&mut backend, PollOutcome::Record(record.clone())),
            Disposition::Redelivered { .. }
        ));
        assert!(matches!(
            engine.handle(&mut backend, PollOutcome::Record(record.clone())),
            Disposition::Redelivered { .. }
        ));
        assert_eq!(
            engine.handle(&mut backend, PollOutcome::Record(record)),
            Disposition::Committed { offset: 0 }
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(backend.commits().len(), 1);
    }

    #[test]
    fn test_eof_and_idle_are_inert() {
        let invoked = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = invoked.clone();
        let (mut engine, _rx) = engine(move |_: String| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok::<(), HandlerError>(())
        });
        let mut backend = ScriptedConsumer::new();

        let eof = PollOutcome::PartitionEof {
            topic: "t".to_string(),
            partition: 0,
        };
        assert_eq!(engine.handle(&mut backend, eof), Disposition::Skipped);
        assert_eq!(engine.handle(&mut backend, PollOutcome::Idle), Disposition::Skipped);

        assert!(backend.calls().is_empty());
        assert_eq!(engine.attempts(), 0);
        assert_eq!(engine.stats().eof, 1);
        assert_eq!(engine.stats().received, 0);
        assert_eq!(invoked.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_eof_between_redeliveries_keeps_budget() {
        let (mut engine, _rx) = engine(|_: String| Err::<(), _>("nope"));
        let mut backend = ScriptedConsumer::new();
        let record = text_envelope("t", 0, 1, "x");

        engine.handle(&mut backend, PollOutcome::Record(record.clone()));
        engine.handle(
            &mut backend,
            PollOutcome::PartitionEof {
                topic: "t".to_string(),
                partition: 0,
            },
        );
        assert_eq!(engine.attempts(), 1);
        assert_eq!(
            engine.handle(&mut backend, PollOutcome::Record(record)),
            Disposition::Redelivered { attempt: 2 }
        );
    }

    #[test]
    fn test_codec_failure_is_poisoned_not_retried() {
        let (sink, rx) = ChannelDeadLetterSink::unbounded();
        let mut engine: RetryEngine<String> = RetryEngine::new(
            Arc::new(json_gzip::<String>()),
            |_: String| -> Result<(), HandlerError> { panic!("handler must not run") },
            sink,
            RetryPolicy::default(),
        );
        let mut backend = ScriptedConsumer::new();

        let disposition = engine.handle(&mut backend, PollOutcome::Record(envelope("t", 0, 8, b"not gzip")));

        assert!(matches!(disposition, Disposition::Poisoned(CodecError::Decompress(_))));
        let dead = rx.try_recv().unwrap();
        assert!(dead.reason.starts_with(POISON_REASON_PREFIX));
        assert_eq!(dead.attempts, 0);
        assert_eq!(backend.commits(), vec![("t".to_string(), 0, 9)]);
        assert_eq!(engine.stats().poisoned, 1);
    }

    #[test]
    fn test_seek_failure_escalates() {
        let (mut engine, rx) = engine(|_: String| Err::<(), _>("nope"));
        let mut backend = ScriptedConsumer::new();
        backend.fail_seeks();

        let disposition = engine.handle(&mut backend, PollOutcome::Record(text_envelope("t", 0, 2, "x")));

        assert_eq!(disposition, Disposition::DeadLettered { attempts: 1 });
        assert!(rx.try_recv().unwrap().reason.contains("seek failed"));
        assert_eq!(backend.commits(), vec![("t".to_string(), 0, 3)]);
    }

    #[test]
    fn test_sink_failure_still_commits() {
        let (sink, rx) = ChannelDeadLetterSink::unbounded();
        drop(rx);
        let mut engine = RetryEngine::new(
            Arc::new(Utf8Codec),
            |_: String| Err::<(), _>("nope"),
            sink,
            RetryPolicy {
                max_redeliveries: 0,
                backoff: Duration::ZERO,
            },
        );
        let mut backend = ScriptedConsumer::new();

        let disposition = engine.handle(&mut backend, PollOutcome::Record(text_envelope("t", 0, 0, "x")));

        assert_eq!(disposition, Disposition::DeadLettered { attempts: 0 });
        assert_eq!(backend.commits().len(), 1);
        assert_eq!(engine.stats().dead_letter_failures, 1);
        assert_eq!(engine.stats().dead_lettered, 0);
    }

    #[test]
    fn test_commit_failure_is_counted() {
        let (mut engine, _rx) = engine(|_: String| Ok::<(), HandlerError>(()));
        let mut backend = ScriptedConsumer::new();
        backend.fail_commits();

        let disposition = engine.handle(&mut backend, PollOutcome::Record(text_envelope("t", 0, 0, "x")));

        assert_eq!(disposition, Disposition::Committed { offset: 0 });
        assert_eq!(engine.stats().commit_failures, 1);
        let cursor = engine.cursor("t", 0).unwrap();
        assert!(cursor.stored);
        assert!(!cursor.committed);
    }

    #[test]
    fn test_new_record_resets_budget() {
        let (mut engine, _rx) = engine(|s: String| if s == "bad" { Err("bad") } else { Ok(()) });
        let mut backend = ScriptedConsumer::new();

        engine.handle(&mut backend, PollOutcome::Record(text_envelope("t", 0, 0, "bad")));
        assert_eq!(engine.attempts(), 1);

        // a rebalance moved us past the failing record
        engine.handle(&mut backend, PollOutcome::Record(text_envelope("t", 0, 1, "bad")));
        assert_eq!(engine.attempts(), 1);
    }

    #[test]
    fn test_budgets_are_tracked_per_partition() {
        let (mut engine, rx) = engine(|_: String| Err::<(), _>("down"));
        let mut backend = ScriptedConsumer::new();
        let left = text_envelope("t", 0, 4, "x");
        let right = text_envelope("t", 1, 7, "y");

        let mut dispositions = Vec::new();
        for _ in 0..4 {
            dispositions.push(engine.handle(&mut backend, PollOutcome::Record(left.clone())));
            dispositions.push(engine.handle(&mut backend, PollOutcome::Record(right.clone())));
        }

        assert_eq!(dispositions[0], Disposition::Redelivered { attempt: 1 });
        assert_eq!(dispositions[1], Disposition::Redelivered { attempt: 1 });
        assert_eq!(dispositions[4], Disposition::Redelivered { attempt: 3 });
        assert_eq!(dispositions[6], Disposition::DeadLettered { attempts: 3 });
        assert_eq!(dispositions[7], Disposition::DeadLettered { attempts: 3 });
        assert_eq!(rx.try_iter().count(), 2);
        assert_eq!(
            backend.commits(),
            vec![("t".to_string(), 0, 5), ("t".to_string(), 1, 8)]
        );
        assert_eq!(engine.attempts_for("t", 0), 0);
        assert_eq!(engine.attempts_for("t", 1), 0);
    }

    #[test]
    fn test_policy_from_settings() {
        let settings = ConsumerSettings::new("k:9092", "g")
            .max_redeliveries(5)
            .retry_backoff_ms(20);
        let policy = RetryPolicy::from_settings(&settings);
        assert_eq!(policy.max_redeliveries, 5);
        assert_eq!(policy.backoff, Duration::from_millis(20));
    }
}
