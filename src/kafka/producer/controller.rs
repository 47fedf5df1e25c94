//! Producer reliability controller
//!
//! `ReliableProducer` applies one [`DeliveryGuarantee`] to every send:
//!
//! - `None` / `Leader` / `All`: exactly one attempt, failure is returned
//! - `Idempotent`: transient failures are retried up to `send_max_retries`
//!   times, always with the sequence the message was first assigned
//! - `Transactional`: each send is wrapped in init -> begin -> produce -> commit,
//!   and any failure in between aborts
//!
//! Success and failure are both logged, and both are returned to the caller.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::backend::{DeliveryReport, ProducerBackend};
use super::transaction::{Transaction, TransactionState};
use crate::config::ProducerSettings;
use crate::kafka::constants::{DEFAULT_FLUSH_TIMEOUT_MS, TRANSACTION_ID_HEADER};
use crate::kafka::envelope::{Headers, OutboundMessage};
use crate::kafka::error::{DeliveryError, DeliveryResult};
use crate::kafka::guarantee::DeliveryGuarantee;

pub struct ReliableProducer<B: ProducerBackend> {
    backend: B,
    settings: ProducerSettings,
    /// Last sequence handed out; also labels log lines
    sequence: AtomicU64,
    /// One transaction at a time per producer
    transaction_lock: Mutex<()>,
    closed: AtomicBool,
}

impl<B: ProducerBackend> ReliableProducer<B> {
    /// Wrap a backend, rejecting settings that break the guarantee invariants
    pub fn new(backend: B, settings: ProducerSettings) -> DeliveryResult<Self> {
        settings.validate()?;

        tracing::debug!(
            guarantee = %settings.guarantee,
            max_in_flight = settings.max_in_flight,
            send_max_retries = settings.send_max_retries,
            "Reliable producer created"
        );

        Ok(Self {
            backend,
            settings,
            sequence: AtomicU64::new(0),
            transaction_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn guarantee(&self) -> DeliveryGuarantee {
        self.settings.guarantee
    }

    pub fn settings(&self) -> &ProducerSettings {
        &self.settings
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Send one message under the configured guarantee
    pub fn send(&self, message: OutboundMessage) -> DeliveryResult<DeliveryReport> {
        if self.settings.guarantee.is_transactional() {
            return self.send_in_transaction(message, |_| Ok::<(), DeliveryError>(()));
        }
        self.deliver(&message)
    }

    /// Transactional send carrying caller headers plus a `transactionId` header
    pub fn send_with_headers(
        &self,
        message: OutboundMessage,
        headers: Headers,
    ) -> DeliveryResult<DeliveryReport> {
        let transactional_id = self.transactional_id()?.to_string();

        let mut merged = message.headers.clone();
        merged.extend(&headers);
        merged.insert_str(TRANSACTION_ID_HEADER, &transactional_id);

        self.send_in_transaction(message.headers(merged), |_| Ok::<(), DeliveryError>(()))
    }

    /// Produce `message` inside a transaction, then run `work` before commit
    ///
    /// The transaction commits only if the produce and `work` both succeed.
    /// Otherwise it is aborted and `TransactionAborted` is returned; none of
    /// its records become visible to read-committed consumers.
    pub fn send_in_transaction<F, E>(
        &self,
        message: OutboundMessage,
        work: F,
    ) -> DeliveryResult<DeliveryReport>
    where
        F: FnOnce(&DeliveryReport) -> Result<(), E>,
        E: std::fmt::Display,
    {
        let transactional_id = self.transactional_id()?.to_string();
        let timeout = self.settings.transaction_timeout();
        let _guard = self.transaction_lock.lock();

        let mut txn = Transaction::new(transactional_id.as_str());

        self.backend
            .init_transactions(timeout)
            .map_err(|e| aborted(&transactional_id, format!("init failed: {}", e)))?;
        txn.mark_initialized()?;

        self.backend
            .begin_transaction()
            .map_err(|e| aborted(&transactional_id, format!("begin failed: {}", e)))?;
        txn.begin()?;

        let mut open = OpenTransaction {
            backend: &self.backend,
            txn,
            timeout,
        };

        let outcome = match self.deliver(&message) {
            Ok(report) => work(&report).map(|_| report).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        let report = match outcome {
            Ok(report) => report,
            Err(reason) => {
                open.abort(&reason);
                return Err(aborted(&transactional_id, reason));
            }
        };

        if let Err(e) = self.backend.commit_transaction(timeout) {
            let reason = format!("commit failed: {}", e);
            open.abort(&reason);
            return Err(aborted(&transactional_id, reason));
        }
        open.txn.commit()?;

        tracing::info!(
            transactional_id = %transactional_id,
            topic = %report.topic,
            partition = report.partition,
            offset = report.offset,
            "Transaction committed"
        );

        Ok(report)
    }

    /// Wait for outstanding records
    pub fn flush(&self) -> DeliveryResult<()> {
        self.backend
            .flush(Duration::from_millis(DEFAULT_FLUSH_TIMEOUT_MS))
    }

    /// Flush and release the connection
    pub fn close(self) -> DeliveryResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.flush()
    }

    fn transactional_id(&self) -> DeliveryResult<&str> {
        match (&self.settings.transactional_id, self.settings.guarantee) {
            (Some(id), DeliveryGuarantee::Transactional) => Ok(id),
            _ => Err(DeliveryError::InvalidConfig(format!(
                "transactional send requires the transactional guarantee, producer is {}",
                self.settings.guarantee
            ))),
        }
    }

    fn max_attempts(&self) -> u32 {
        if self.settings.guarantee.retries_on_transient() && !self.backend.retries_internally() {
            self.settings.send_max_retries + 1
        } else {
            1
        }
    }

    /// One logical send: one sequence, up to `max_attempts` tries
    fn deliver(&self, message: &OutboundMessage) -> DeliveryResult<DeliveryReport> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.backend.send(message, sequence) {
                Ok(receipt) => {
                    tracing::info!(
                        topic = %message.topic,
                        partition = receipt.partition,
                        offset = receipt.offset,
                        sequence,
                        attempt,
                        "Message {} delivered",
                        sequence
                    );
                    return Ok(DeliveryReport {
                        topic: message.topic.clone(),
                        partition: receipt.partition,
                        offset: receipt.offset,
                        sequence,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::warn!(
                        topic = %message.topic,
                        sequence,
                        attempt,
                        max_attempts,
                        "Transient send failure, retrying: {}",
                        e
                    );
                }
                Err(e) => {
                    tracing::error!(
                        topic = %message.topic,
                        sequence,
                        attempt,
                        "Message {} not delivered: {}",
                        sequence,
                        e
                    );
                    return Err(DeliveryError::SendFailed {
                        topic: message.topic.clone(),
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

impl<B: ProducerBackend> Drop for ReliableProducer<B> {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.flush() {
            tracing::warn!("Flush on drop failed: {}", e);
        }
    }
}

/// Begun transaction; aborts on drop unless committed or aborted
struct OpenTransaction<'a, B: ProducerBackend> {
    backend: &'a B,
    txn: Transaction,
    timeout: Duration,
}

impl<B: ProducerBackend> OpenTransaction<'_, B> {
    fn abort(&mut self, reason: &str) {
        tracing::warn!(
            transactional_id = %self.txn.id(),
            "Aborting transaction: {}",
            reason
        );
        if let Err(e) = self.backend.abort_transaction(self.timeout) {
            tracing::error!(
                transactional_id = %self.txn.id(),
                "Abort failed: {}",
                e
            );
        }
        // only Begun reaches here
        let _ = self.txn.abort();
    }
}

impl<B: ProducerBackend> Drop for OpenTransaction<'_, B> {
    fn drop(&mut self) {
        if self.txn.state() == TransactionState::Begun {
            self.abort("unwound before commit");
        }
    }
}

fn aborted(transactional_id: &str, reason: String) -> DeliveryError {
    DeliveryError::TransactionAborted {
        transactional_id: transactional_id.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{ProducerCall, RecordingProducer};

    fn settings(guarantee: DeliveryGuarantee) -> ProducerSettings {
        ProducerSettings::for_guarantee("mock:9092", guarantee)
    }

    fn transactional() -> ProducerSettings {
        settings(DeliveryGuarantee::Transactional).transactional_id("txn-test")
    }

    #[test]
    fn test_new_rejects_invalid_settings() {
        let mut bad = settings(DeliveryGuarantee::Idempotent);
        bad.max_in_flight = 4;
        assert!(ReliableProducer::new(RecordingProducer::new(), bad).is_err());
    }

    #[test]
    fn test_plain_send_single_attempt() {
        let backend = RecordingProducer::new();
        backend.fail_next_sends(1, true);
        let producer = ReliableProducer::new(backend, settings(DeliveryGuarantee::All)).unwrap();

        let err = producer
            .send(OutboundMessage::new("t", "v"))
            .unwrap_err();
        assert!(matches!(err, DeliveryError::SendFailed { attempts: 1, .. }));
        assert_eq!(producer.backend().send_count(), 1);
    }

    #[test]
    fn test_idempotent_retries_with_same_sequence() {
        let backend = RecordingProducer::new();
        backend.fail_next_sends(2, true);
        let producer =
            ReliableProducer::new(backend, settings(DeliveryGuarantee::Idempotent)).unwrap();

        let report = producer.send(OutboundMessage::new("t", "v")).unwrap();
        assert_eq!(report.attempts, 3);
        assert_eq!(report.sequence, 1);
        assert_eq!(producer.backend().sequences(), vec![1, 1, 1]);
    }

    #[test]
    fn test_idempotent_gives_up_after_bound() {
        let backend = RecordingProducer::new();
        backend.fail_next_sends(10, true);
        let producer =
            ReliableProducer::new(backend, settings(DeliveryGuarantee::Idempotent)).unwrap();

        let err = producer.send(OutboundMessage::new("t", "v")).unwrap_err();
        assert!(matches!(err, DeliveryError::SendFailed { attempts: 3, .. }));
    }

    #[test]
    fn test_idempotent_does_not_retry_fatal() {
        let backend = RecordingProducer::new();
        backend.fail_next_sends(1, false);
        let producer =
            ReliableProducer::new(backend, settings(DeliveryGuarantee::Idempotent)).unwrap();

        assert!(producer.send(OutboundMessage::new("t", "v")).is_err());
        assert_eq!(producer.backend().send_count(), 1);
    }

    #[test]
    fn test_sequences_increase_per_logical_message() {
        let producer =
            ReliableProducer::new(RecordingProducer::new(), settings(DeliveryGuarantee::Leader))
                .unwrap();
        let a = producer.send(OutboundMessage::new("t", "a")).unwrap();
        let b = producer.send(OutboundMessage::new("t", "b")).unwrap();
        assert_eq!((a.sequence, b.sequence), (1, 2));
    }

    #[test]
    fn test_transactional_send_commits() {
        let producer = ReliableProducer::new(RecordingProducer::new(), transactional()).unwrap();
        producer.send(OutboundMessage::new("t", "v")).unwrap();

        assert_eq!(
            producer.backend().calls(),
            vec![
                ProducerCall::InitTransactions,
                ProducerCall::BeginTransaction,
                ProducerCall::Send(1),
                ProducerCall::CommitTransaction,
            ]
        );
    }

    #[test]
    fn test_failing_work_aborts() {
        let producer = ReliableProducer::new(RecordingProducer::new(), transactional()).unwrap();
        let err = producer
            .send_in_transaction(OutboundMessage::new("t", "v"), |_| Err("boom"))
            .unwrap_err();

        assert!(matches!(err, DeliveryError::TransactionAborted { ref reason, .. } if reason == "boom"));
        let calls = producer.backend().calls();
        assert_eq!(calls.last(), Some(&ProducerCall::AbortTransaction));
        assert!(!calls.contains(&ProducerCall::CommitTransaction));
    }

    #[test]
    fn test_failed_produce_aborts() {
        let backend = RecordingProducer::new();
        backend.fail_next_sends(1, false);
        let producer = ReliableProducer::new(backend, transactional()).unwrap();

        let err = producer.send(OutboundMessage::new("t", "v")).unwrap_err();
        assert!(matches!(err, DeliveryError::TransactionAborted { .. }));
        assert!(producer
            .backend()
            .calls()
            .contains(&ProducerCall::AbortTransaction));
    }

    #[test]
    fn test_panicking_work_aborts() {
        let producer = ReliableProducer::new(RecordingProducer::new(), transactional()).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            producer.send_in_transaction(OutboundMessage::new("t", "v"), |_| -> Result<(), String> {
                panic!("handler exploded")
            })
        }));
        assert!(result.is_err());

        let calls = producer.backend().calls();
        assert_eq!(calls.last(), Some(&ProducerCall::AbortTransaction));
        assert!(!calls.contains(&ProducerCall::CommitTransaction));
    }

    #[test]
    fn test_headers_variant_injects_transaction_id() {
        let producer = ReliableProducer::new(RecordingProducer::new(), transactional()).unwrap();
        let headers = Headers::new().with_str("Application", "kafka-delivery");
        producer
            .send_with_headers(OutboundMessage::new("t", "v"), headers)
            .unwrap();

        let sent = producer.backend().last_message().unwrap();
        let keys: Vec<&str> = sent.headers.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Application", TRANSACTION_ID_HEADER]);
        assert_eq!(sent.headers.get_str(TRANSACTION_ID_HEADER), Some("txn-test"));
    }

    #[test]
    fn test_headers_variant_requires_transactional() {
        let producer =
            ReliableProducer::new(RecordingProducer::new(), settings(DeliveryGuarantee::All))
                .unwrap();
        let err = producer
            .send_with_headers(OutboundMessage::new("t", "v"), Headers::new())
            .unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidConfig(_)));
        assert_eq!(producer.backend().send_count(), 0);
    }

    #[test]
    fn test_drop_flushes() {
        let backend = std::sync::Arc::new(RecordingProducer::new());
        {
            let _producer =
                ReliableProducer::new(backend.clone(), settings(DeliveryGuarantee::None)).unwrap();
        }
        assert_eq!(backend.calls(), vec![ProducerCall::Flush]);
    }

    #[test]
    fn test_close_flushes_once() {
        let backend = std::sync::Arc::new(RecordingProducer::new());
        let producer =
            ReliableProducer::new(backend.clone(), settings(DeliveryGuarantee::None)).unwrap();
        producer.close().unwrap();
        assert_eq!(backend.calls(), vec![ProducerCall::Flush]);
    }
}
