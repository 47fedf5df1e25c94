// Shared fixtures for the integration tests
//
// Everything runs against InMemoryBroker; no cluster is needed.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use kafka_delivery::kafka::memory::{MemoryConsumer, MemoryProducer};
use kafka_delivery::{
    AutoOffsetReset, Codec, ConsumerBackend, ConsumerSettings, DeadLetterSink, DeliveryGuarantee,
    Disposition, InMemoryBroker, MessageHandler, ProducerSettings, ReliableProducer, RetryEngine, RetryPolicy,
    Utf8Codec,
};

pub const BOOTSTRAP: &str = "memory:9092";

pub fn producer(broker: &InMemoryBroker, guarantee: DeliveryGuarantee) -> ReliableProducer<MemoryProducer> {
    let settings = ProducerSettings::for_guarantee(BOOTSTRAP, guarantee);
    let backend = broker.producer(&settings).expect("producer settings are valid");
    ReliableProducer::new(backend, settings).expect("producer settings are valid")
}

/// Groups without a committed offset start from the beginning, so records
/// published before the subscription are seen
pub fn consumer_settings(group: &str) -> ConsumerSettings {
    ConsumerSettings::new(BOOTSTRAP, group)
        .auto_offset_reset(AutoOffsetReset::Earliest)
        .poll_timeout_ms(5)
}

pub fn subscribed_consumer(broker: &InMemoryBroker, settings: &ConsumerSettings, topic: &str) -> MemoryConsumer {
    let mut consumer = broker.consumer(settings).expect("consumer settings are valid");
    consumer.subscribe(topic).expect("subscribe");
    consumer
}

/// Retry engine over plain UTF-8 payloads
pub fn text_engine<H, S>(handler: H, sink: S) -> RetryEngine<String>
where
    H: MessageHandler<String> + 'static,
    S: DeadLetterSink + 'static,
{
    let codec: Arc<dyn Codec<String>> = Arc::new(Utf8Codec);
    RetryEngine::new(codec, handler, sink, RetryPolicy::default())
}

/// Poll and dispatch until `polls` outcomes have been handled
pub fn drive<B: ConsumerBackend>(
    engine: &mut RetryEngine<String>,
    consumer: &mut B,
    polls: usize,
) -> Vec<Disposition> {
    (0..polls)
        .map(|_| {
            let outcome = consumer.poll(Duration::from_millis(1)).expect("poll");
            engine.handle(consumer, outcome)
        })
        .collect()
}
