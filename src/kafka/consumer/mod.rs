//! Consumer offset and retry engine, dead-letter sinks and broker backends

pub mod backend;
pub mod cursor;
pub mod dead_letter;
pub mod kafka;
pub mod retry;

pub use backend::{ConsumerBackend, PollOutcome};
pub use cursor::ConsumptionCursor;
pub use dead_letter::{ChannelDeadLetterSink, DeadLetterSink, LoggingDeadLetterSink, TopicDeadLetterSink};
pub use kafka::KafkaConsumerBackend;
pub use retry::{
    Disposition, HandlerError, MessageHandler, RetryEngine, RetryPolicy, RetryState,
    SubscriptionStats,
};
