//! Producer-side broker seam
//!
//! The controller only talks to the broker through [`ProducerBackend`]. The
//! rdkafka implementation lives in [`super::kafka`], the in-process one in
//! [`crate::kafka::memory`].

use std::sync::Arc;
use std::time::Duration;

use crate::kafka::envelope::OutboundMessage;
use crate::kafka::error::DeliveryResult;

/// Where the broker placed an acknowledged record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    pub partition: i32,
    pub offset: i64,
}

/// Result of a successful send, as reported to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Producer-local sequence number of the logical message
    pub sequence: u64,
    /// Attempts made by the controller (1 unless it retried)
    pub attempts: u32,
}

/// A broker connection capable of producing
///
/// `sequence` identifies the logical message within this producer session.
/// A retried send must be called with the same sequence so an idempotent
/// broker can drop the duplicate.
pub trait ProducerBackend: Send + Sync {
    fn send(&self, message: &OutboundMessage, sequence: u64) -> DeliveryResult<SendReceipt>;

    /// Transaction coordinator handshake; repeated calls are no-ops
    fn init_transactions(&self, timeout: Duration) -> DeliveryResult<()>;

    fn begin_transaction(&self) -> DeliveryResult<()>;

    fn commit_transaction(&self, timeout: Duration) -> DeliveryResult<()>;

    fn abort_transaction(&self, timeout: Duration) -> DeliveryResult<()>;

    /// Wait for every queued record to be acknowledged
    fn flush(&self, timeout: Duration) -> DeliveryResult<()>;

    /// True when the client library already retries transient failures
    fn retries_internally(&self) -> bool {
        false
    }
}

impl<B: ProducerBackend + ?Sized> ProducerBackend for Arc<B> {
    fn send(&self, message: &OutboundMessage, sequence: u64) -> DeliveryResult<SendReceipt> {
        (**self).send(message, sequence)
    }

    fn init_transactions(&self, timeout: Duration) -> DeliveryResult<()> {
        (**self).init_transactions(timeout)
    }

    fn begin_transaction(&self) -> DeliveryResult<()> {
        (**self).begin_transaction()
    }

    fn commit_transaction(&self, timeout: Duration) -> DeliveryResult<()> {
        (**self).commit_transaction(timeout)
    }

    fn abort_transaction(&self, timeout: Duration) -> DeliveryResult<()> {
        (**self).abort_transaction(timeout)
    }

    fn flush(&self, timeout: Duration) -> DeliveryResult<()> {
        (**self).flush(timeout)
    }

    fn retries_internally(&self) -> bool {
        (**self).retries_internally()
    }
}

impl<B: ProducerBackend + ?Sized> ProducerBackend for Box<B> {
    fn send(&self, message: &OutboundMessage, sequence: u64) -> DeliveryResult<SendReceipt> {
        (**self).send(message, sequence)
    }

    fn init_transactions(&self, timeout: Duration) -> DeliveryResult<()> {
        (**self).init_transactions(timeout)
    }

    fn begin_transaction(&self) -> DeliveryResult<()> {
        (**self).begin_transaction()
    }

    fn commit_transaction(&self, timeout: Duration) -> DeliveryResult<()> {
        (**self).commit_transaction(timeout)
    }

    fn abort_transaction(&self, timeout: Duration) -> DeliveryResult<()> {
        (**self).abort_transaction(timeout)
    }

    fn flush(&self, timeout: Duration) -> DeliveryResult<()> {
        (**self).flush(timeout)
    }

    fn retries_internally(&self) -> bool {
        (**self).retries_internally()
    }
}
