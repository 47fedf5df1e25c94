//! Delivery constants
//!
//! This module centralizes the defaults and limits used by the producer
//! controller, the retry engine and the subscription runtime.
//!
//! # Terminology
//! - **Stored offset**: local resume position (`enable.auto.offset.store=false`)
//! - **Committed offset**: position published to the group coordinator

// ===== Connection Defaults =====

/// Default bootstrap servers
pub const DEFAULT_BOOTSTRAP_SERVERS: &str = "localhost:9092";

/// Default topic used by the hosted service
pub const DEFAULT_TOPIC: &str = "sample-kafka";

/// Client id used when none is configured
pub const DEFAULT_CLIENT_ID: &str = "kafka-delivery";

/// Group id used when neither configuration nor hostname provide one
pub const DEFAULT_GROUP_ID: &str = "kafka-delivery";

/// Partitioner requested from librdkafka (key hash, random for null keys)
pub const DEFAULT_PARTITIONER: &str = "consistent_random";

// ===== Producer Defaults =====

/// Automatic retries on transient failures for idempotent/transactional sends
pub const DEFAULT_SEND_MAX_RETRIES: u32 = 2;

/// Upper bound accepted for `message.send.max.retries`
pub const MAX_SEND_MAX_RETRIES: u32 = 10;

/// In-flight request cap required by idempotent and transactional producers
pub const RELIABLE_MAX_IN_FLIGHT: u32 = 1;

/// librdkafka default in-flight cap for plain producers
pub const DEFAULT_MAX_IN_FLIGHT: u32 = 5;

/// Transaction coordinator handshake timeout (milliseconds)
pub const DEFAULT_TRANSACTION_TIMEOUT_MS: u64 = 5_000;

/// Delivery report timeout for a single send (milliseconds)
pub const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 30_000;

/// Flush timeout applied when a producer is closed or dropped (milliseconds)
pub const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 10_000;

/// Interval between hosted-service producer ticks (milliseconds)
pub const DEFAULT_PRODUCE_INTERVAL_MS: u64 = 5_000;

// ===== Consumer Defaults =====

/// Redeliveries allowed before a record is dead-lettered
pub const DEFAULT_MAX_REDELIVERIES: u32 = 3;

/// Upper bound accepted for the redelivery budget
pub const MAX_MAX_REDELIVERIES: u32 = 100;

/// Blocking poll timeout (milliseconds). Also bounds cancellation latency.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 1_000;

/// Lower bound accepted for the poll timeout (milliseconds)
pub const MIN_POLL_TIMEOUT_MS: u64 = 1;

/// Upper bound accepted for the poll timeout (milliseconds)
pub const MAX_POLL_TIMEOUT_MS: u64 = 60_000;

/// Delay between redeliveries (milliseconds)
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 0;

/// Upper bound accepted for the redelivery delay (milliseconds)
pub const MAX_RETRY_BACKOFF_MS: u64 = 60_000;

/// Timeout used when seeking back to a record for redelivery (milliseconds)
pub const SEEK_TIMEOUT_MS: u64 = 5_000;

// ===== Headers =====

/// Header injected on every transactional send that carries caller headers
pub const TRANSACTION_ID_HEADER: &str = "transactionId";

/// Suffix appended to a topic name to form its dead-letter topic
pub const DEFAULT_DEAD_LETTER_SUFFIX: &str = ".dlq";

/// Dead-letter metadata: failure reason
pub const DLQ_REASON_HEADER: &str = "x-dlq-reason";

/// Dead-letter metadata: redeliveries performed before escalation
pub const DLQ_ATTEMPTS_HEADER: &str = "x-dlq-attempts";

/// Dead-letter metadata: originating topic
pub const DLQ_SOURCE_TOPIC_HEADER: &str = "x-dlq-source-topic";

/// Dead-letter metadata: originating partition
pub const DLQ_SOURCE_PARTITION_HEADER: &str = "x-dlq-source-partition";

/// Dead-letter metadata: originating offset
pub const DLQ_SOURCE_OFFSET_HEADER: &str = "x-dlq-source-offset";

/// Reason prefix for records that could not be decoded
pub const POISON_REASON_PREFIX: &str = "codec:";

// ===== Codec =====

/// Gzip level used by the default codec (0-9)
pub const DEFAULT_GZIP_LEVEL: u32 = 6;

// ===== In-process Broker =====

/// Partition count for topics auto-created by the in-process broker
pub const DEFAULT_TOPIC_PARTITIONS: i32 = 1;

/// Recent sequences remembered per idempotent session by the in-process broker
pub const IDEMPOTENCE_WINDOW: usize = 5;
