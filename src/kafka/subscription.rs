//! Subscription runtime
//!
//! A subscription owns one consumer backend and one retry engine and runs the
//! loop
//!
//! ```text
//! loop { poll (blocking) -> retry engine -> check cancellation }
//! ```
//!
//! on a dedicated OS thread, since the loop runs for as long as the service
//! does.
//!
//! # Cancellation latency
//!
//! Cancellation is cooperative. The token is checked between polls and never
//! interrupts a poll that is already blocked, so a cancelled subscription may
//! take up to one poll timeout (plus the handler time of a record in flight)
//! to stop. Per-record failures never end the loop.
//!
//! Records that fail to decode are dead-lettered by the engine and, when a
//! channel is attached with [`Subscription::report_poisoned`], also sent to
//! the subscriber as [`PoisonedRecord`]s.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use tokio_util::sync::CancellationToken;

use crate::kafka::consumer::{
    ConsumerBackend, Disposition, PollOutcome, RetryEngine, SubscriptionStats,
};
use crate::kafka::error::{CodecError, DeliveryError, DeliveryResult};

/// Final state of a stopped subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionReport {
    pub topic: String,
    pub stats: SubscriptionStats,
}

/// A record that could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoisonedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub error: CodecError,
}

pub struct Subscription<T, B: ConsumerBackend> {
    topic: String,
    backend: B,
    engine: RetryEngine<T>,
    poll_timeout: Duration,
    poisoned: Option<Sender<PoisonedRecord>>,
}

impl<T, B: ConsumerBackend> Subscription<T, B> {
    pub fn new(
        topic: impl Into<String>,
        backend: B,
        engine: RetryEngine<T>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            topic: topic.into(),
            backend,
            engine,
            poll_timeout,
            poisoned: None,
        }
    }

    /// Send every undecodable record to `tx` after it is dead-lettered
    pub fn report_poisoned(mut self, tx: Sender<PoisonedRecord>) -> Self {
        self.poisoned = Some(tx);
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Run the poll loop on the calling thread until `token` is cancelled
    pub fn run_blocking(self, token: CancellationToken) -> DeliveryResult<SubscriptionReport> {
        let Subscription {
            topic,
            backend,
            mut engine,
            poll_timeout,
            poisoned,
        } = self;

        let mut backend = CloseOnDrop {
            backend,
            topic: topic.clone(),
        };

        backend.backend.subscribe(&topic)?;
        tracing::info!(
            topic = %topic,
            poll_timeout_ms = poll_timeout.as_millis() as u64,
            "Subscription started"
        );

        while !token.is_cancelled() {
            match backend.backend.poll(poll_timeout) {
                Ok(outcome) => {
                    let position = match &outcome {
                        PollOutcome::Record(envelope) => {
                            Some((envelope.topic.clone(), envelope.partition, envelope.offset))
                        }
                        _ => None,
                    };
                    let disposition = engine.handle(&mut backend.backend, outcome);
                    if let (Disposition::Poisoned(error), Some(tx), Some((record_topic, partition, offset))) =
                        (disposition, poisoned.as_ref(), position)
                    {
                        let record = PoisonedRecord {
                            topic: record_topic,
                            partition,
                            offset,
                            error,
                        };
                        if tx.send(record).is_err() {
                            tracing::debug!("Poisoned record receiver dropped");
                        }
                    }
                }
                Err(e) => {
                    engine.record_poll_error();
                    tracing::warn!(topic = %topic, "Poll failed: {}", e);
                    if !e.is_transient() {
                        // avoid spinning on a persistent error
                        std::thread::sleep(poll_timeout);
                    }
                }
            }
        }

        let stats = engine.stats();
        tracing::info!(
            topic = %topic,
            received = stats.received,
            committed = stats.committed,
            redelivered = stats.redelivered,
            dead_lettered = stats.dead_lettered,
            poisoned = stats.poisoned,
            "Subscription stopped"
        );

        Ok(SubscriptionReport { topic, stats })
    }
}

impl<T, B> Subscription<T, B>
where
    T: 'static,
    B: ConsumerBackend + 'static,
{
    /// Start the loop on its own named thread
    pub fn spawn(self, token: CancellationToken) -> DeliveryResult<SubscriptionHandle> {
        let topic = self.topic.clone();
        let worker_token = token.clone();

        let thread = std::thread::Builder::new()
            .name(format!("subscription-{}", topic))
            .spawn(move || self.run_blocking(worker_token))?;

        Ok(SubscriptionHandle {
            topic,
            token,
            thread: Some(thread),
        })
    }
}

/// Releases the consumer on every exit path, panics included
struct CloseOnDrop<B: ConsumerBackend> {
    backend: B,
    topic: String,
}

impl<B: ConsumerBackend> Drop for CloseOnDrop<B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.close() {
            tracing::warn!(topic = %self.topic, "Consumer close failed: {}", e);
        }
    }
}

/// Handle to a running subscription thread
///
/// Dropping the handle cancels the subscription without waiting for it.
pub struct SubscriptionHandle {
    topic: String,
    token: CancellationToken,
    thread: Option<JoinHandle<DeliveryResult<SubscriptionReport>>>,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Request a stop; takes effect after the current poll returns
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the worker to exit
    ///
    /// Does not cancel; call [`cancel`](Self::cancel) first or cancel the
    /// token passed to `spawn`.
    pub fn join(mut self) -> DeliveryResult<SubscriptionReport> {
        let thread = self
            .thread
            .take()
            .ok_or_else(|| DeliveryError::Worker("subscription already joined".to_string()))?;

        thread.join().map_err(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            DeliveryError::Worker(format!("subscription {} panicked: {}", self.topic, message))
        })?
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.token.cancel();
        }
    }
}
