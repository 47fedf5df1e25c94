//! Delivery error types
//!
//! `DeliveryError` covers every failure the producer controller, the retry
//! engine and the subscription runtime can report. Codec failures get their own
//! type because they are never retried: an unparsable record fails identically
//! on every redelivery.

use rdkafka::error::{KafkaError as RdKafkaError, RDKafkaErrorCode};
use thiserror::Error;

/// Errors raised by the two codec stages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Payload could not be turned into bytes
    #[error("Serialization failed: {0}")]
    Serialize(String),

    /// Bytes are not a valid payload
    #[error("Deserialization failed: {0}")]
    Deserialize(String),

    /// Compression stage failed
    #[error("Compression failed: {0}")]
    Compress(String),

    /// Bytes are not a valid compressed stream
    #[error("Decompression failed: {0}")]
    Decompress(String),
}

/// Errors that can occur while producing or consuming
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Envelope could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Broker-side failure that may succeed on retry (timeouts, leader moves)
    #[error("Transient broker error: {0}")]
    Transient(String),

    /// Broker-side failure that will not succeed on retry
    #[error("Broker error: {0}")]
    Fatal(String),

    /// A send failed after the allowed number of attempts
    #[error("Send to {topic} failed after {attempts} attempt(s): {reason}")]
    SendFailed {
        topic: String,
        attempts: u32,
        reason: String,
    },

    /// Transaction was aborted; nothing it produced becomes visible
    #[error("Transaction {transactional_id} aborted: {reason}")]
    TransactionAborted {
        transactional_id: String,
        reason: String,
    },

    /// Transaction state machine was driven out of order
    #[error("Invalid transaction transition for {transactional_id}: {from} -> {to}")]
    InvalidTransition {
        transactional_id: String,
        from: &'static str,
        to: &'static str,
    },

    /// Settings violate a delivery invariant
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Consumer-side failure (subscribe, poll, seek)
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Storing or committing an offset failed
    #[error("Offset commit failed for {topic}[{partition}]@{offset}: {reason}")]
    OffsetCommit {
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },

    /// Dead-letter sink refused a record
    #[error("Dead-letter publish failed: {0}")]
    DeadLetter(String),

    /// A subscription or blocking send worker panicked
    #[error("Worker failed: {0}")]
    Worker(String),

    /// IO error (thread spawn, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeliveryError {
    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }

    /// Classify an rdkafka error as transient or fatal
    pub fn from_rdkafka(err: &RdKafkaError) -> Self {
        let transient = err
            .rdkafka_error_code()
            .map(is_transient_code)
            .unwrap_or(false);

        if transient {
            DeliveryError::Transient(err.to_string())
        } else {
            DeliveryError::Fatal(err.to_string())
        }
    }
}

/// Error codes that indicate a broker condition expected to clear on its own
fn is_transient_code(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::RequestTimedOut
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::NotEnoughReplicas
            | RDKafkaErrorCode::NotEnoughReplicasAfterAppend
            | RDKafkaErrorCode::LeaderNotAvailable
            | RDKafkaErrorCode::NotLeaderForPartition
            | RDKafkaErrorCode::NetworkException
            | RDKafkaErrorCode::QueueFull
    )
}

/// Result type alias for delivery operations
pub type DeliveryResult<T> = std::result::Result<T, DeliveryError>;
