// Kafka delivery module
//
// This module contains everything between application payloads and the broker:
// - Envelope codec (serialize + compress, and back)
// - Producer reliability controller (acks, idempotence, transactions)
// - Consumer offset and retry engine (bounded redelivery, dead-lettering)
// - Subscription runtime (dedicated thread, cooperative cancellation)
//
// Architecture Overview:
// =====================
//
// The controller and the engine never talk to librdkafka directly. They go
// through two seams:
//
//   ReliableProducer --> [ProducerBackend] --> KafkaProducerBackend | MemoryProducer
//   RetryEngine      --> [ConsumerBackend] --> KafkaConsumerBackend | MemoryConsumer
//
// The Kafka backends are thin adapters over rdkafka. The memory backends share
// an InMemoryBroker so the delivery contract can be tested without a cluster.
//
// Threading:
//   Producers are Send + Sync and block the calling thread per send; async
//   callers hop onto the blocking pool (see MessageBus::produce).
//   Each subscription owns its consumer on a dedicated OS thread and polls until
//   its CancellationToken fires.

pub mod bus;
pub mod codec;
pub mod constants;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod guarantee;
pub mod memory;
pub mod partitioner;
pub mod producer;
pub mod subscription;

// Re-export commonly used types for convenience
pub use bus::{Connector, KafkaConnector, MessageBus};
pub use codec::{json_gzip, Codec, GzipCompressor, JsonSerializer, PipelineCodec, Utf8Codec};
pub use consumer::{
    ConsumerBackend, DeadLetterSink, Disposition, HandlerError, KafkaConsumerBackend,
    MessageHandler, PollOutcome, RetryEngine, RetryPolicy, SubscriptionStats, TopicDeadLetterSink,
};
pub use envelope::{DeadLetterRecord, Envelope, Headers, OutboundMessage};
pub use error::{CodecError, DeliveryError, DeliveryResult};
pub use guarantee::{Acks, AutoOffsetReset, DeliveryGuarantee, IsolationLevel};
pub use memory::{InMemoryBroker, SendFailure};
pub use producer::{DeliveryReport, KafkaProducerBackend, ProducerBackend, ReliableProducer};
pub use subscription::{PoisonedRecord, Subscription, SubscriptionHandle, SubscriptionReport};
