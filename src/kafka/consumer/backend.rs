//! Consumer-side broker seam

use std::time::Duration;

use crate::kafka::envelope::Envelope;
use crate::kafka::error::DeliveryResult;

/// What one poll produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Record(Envelope),
    /// Caught up with the end of a partition; not an error
    PartitionEof { topic: String, partition: i32 },
    /// Poll timed out with nothing to report
    Idle,
}

/// A broker connection capable of consuming for one group
///
/// Owned exclusively by one subscription worker, hence `&mut self`.
/// Offsets passed to `store_offset` and `commit` are resume positions
/// (last processed offset + 1).
pub trait ConsumerBackend: Send {
    fn subscribe(&mut self, topic: &str) -> DeliveryResult<()>;

    /// Block up to `timeout` for the next record
    fn poll(&mut self, timeout: Duration) -> DeliveryResult<PollOutcome>;

    /// Reposition so the next poll of `partition` yields `offset`
    fn seek(&mut self, topic: &str, partition: i32, offset: i64) -> DeliveryResult<()>;

    /// Record the local resume position
    fn store_offset(&mut self, topic: &str, partition: i32, offset: i64) -> DeliveryResult<()>;

    /// Publish the resume position to the group coordinator
    fn commit(&mut self, topic: &str, partition: i32, offset: i64) -> DeliveryResult<()>;

    /// Leave the group and release the connection
    fn close(&mut self) -> DeliveryResult<()>;
}

impl<B: ConsumerBackend + ?Sized> ConsumerBackend for Box<B> {
    fn subscribe(&mut self, topic: &str) -> DeliveryResult<()> {
        (**self).subscribe(topic)
    }

    fn poll(&mut self, timeout: Duration) -> DeliveryResult<PollOutcome> {
        (**self).poll(timeout)
    }

    fn seek(&mut self, topic: &str, partition: i32, offset: i64) -> DeliveryResult<()> {
        (**self).seek(topic, partition, offset)
    }

    fn store_offset(&mut self, topic: &str, partition: i32, offset: i64) -> DeliveryResult<()> {
        (**self).store_offset(topic, partition, offset)
    }

    fn commit(&mut self, topic: &str, partition: i32, offset: i64) -> DeliveryResult<()> {
        (**self).commit(topic, partition, offset)
    }

    fn close(&mut self) -> DeliveryResult<()> {
        (**self).close()
    }
}
