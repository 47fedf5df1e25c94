//! Message bus for hosted services
//!
//! `MessageBus` bundles the pieces a service usually wants:
//!
//! - `produce`: JSON + gzip encode, random UUID key, send and flush
//! - `consume`: a dedicated subscription with the retry engine, dead-lettering
//!   to `{topic}{suffix}`, group defaulting to the host name
//! - `consume_with_poisoned`: the same, also reporting undecodable records
//!
//! Broker access goes through a [`Connector`], so the same bus runs against
//! Kafka ([`KafkaConnector`]) or the in-process broker.

use std::sync::Arc;

use crossbeam_channel::Sender;
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ConsumerSettings, ProducerSettings};
use crate::kafka::codec::{json_gzip, Codec};
use crate::kafka::consumer::{
    ConsumerBackend, KafkaConsumerBackend, MessageHandler, RetryEngine, RetryPolicy,
    TopicDeadLetterSink,
};
use crate::kafka::envelope::OutboundMessage;
use crate::kafka::error::{DeliveryError, DeliveryResult};
use crate::kafka::guarantee::DeliveryGuarantee;
use crate::kafka::memory::{InMemoryBroker, MemoryConsumer, MemoryProducer};
use crate::kafka::producer::{DeliveryReport, KafkaProducerBackend, ProducerBackend, ReliableProducer};
use crate::kafka::subscription::{PoisonedRecord, Subscription, SubscriptionHandle};

/// Factory for broker connections
pub trait Connector: Send + Sync + 'static {
    type Producer: ProducerBackend + 'static;
    type Consumer: ConsumerBackend + 'static;

    fn producer(&self, settings: &ProducerSettings) -> DeliveryResult<Self::Producer>;
    fn consumer(&self, settings: &ConsumerSettings) -> DeliveryResult<Self::Consumer>;
}

/// Connects to Kafka through librdkafka
#[derive(Debug, Clone, Copy, Default)]
pub struct KafkaConnector;

impl Connector for KafkaConnector {
    type Producer = KafkaProducerBackend;
    type Consumer = KafkaConsumerBackend;

    fn producer(&self, settings: &ProducerSettings) -> DeliveryResult<Self::Producer> {
        KafkaProducerBackend::new(settings)
    }

    fn consumer(&self, settings: &ConsumerSettings) -> DeliveryResult<Self::Consumer> {
        KafkaConsumerBackend::new(settings)
    }
}

impl Connector for InMemoryBroker {
    type Producer = MemoryProducer;
    type Consumer = MemoryConsumer;

    fn producer(&self, settings: &ProducerSettings) -> DeliveryResult<Self::Producer> {
        InMemoryBroker::producer(self, settings)
    }

    fn consumer(&self, settings: &ConsumerSettings) -> DeliveryResult<Self::Consumer> {
        InMemoryBroker::consumer(self, settings)
    }
}

pub struct MessageBus<C: Connector> {
    connector: Arc<C>,
    config: Config,
    /// Created on first `produce`
    producer: OnceCell<Arc<ReliableProducer<C::Producer>>>,
}

impl MessageBus<KafkaConnector> {
    pub fn kafka(config: Config) -> DeliveryResult<Self> {
        Self::new(KafkaConnector, config)
    }
}

impl<C: Connector> MessageBus<C> {
    pub fn new(connector: C, config: Config) -> DeliveryResult<Self> {
        config.validate()?;
        Ok(Self {
            connector: Arc::new(connector),
            config,
            producer: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn producer(&self) -> DeliveryResult<Arc<ReliableProducer<C::Producer>>> {
        self.producer
            .get_or_try_init(|| {
                let settings = self.config.producer_settings();
                let backend = self.connector.producer(&settings)?;
                ReliableProducer::new(backend, settings).map(Arc::new)
            })
            .cloned()
    }

    /// Encode `payload` and send it to `topic` under a fresh UUID key
    ///
    /// The blocking send and flush run on tokio's blocking pool.
    pub async fn produce<T>(&self, topic: &str, payload: &T) -> DeliveryResult<DeliveryReport>
    where
        T: Serialize + DeserializeOwned,
    {
        let value = json_gzip::<T>().encode(payload)?;
        let message = OutboundMessage::new(topic, value).key_str(&uuid::Uuid::new_v4().to_string());
        let producer = self.producer()?;

        tokio::task::spawn_blocking(move || {
            let report = producer.send(message)?;
            producer.flush()?;
            Ok(report)
        })
        .await
        .map_err(|e| DeliveryError::Worker(format!("send task failed: {}", e)))?
    }

    /// Start a subscription to `topic` delivering decoded payloads to `handler`
    ///
    /// `group_id` defaults to the configured group, then the host name.
    /// Records the handler keeps failing are dead-lettered to
    /// `{topic}{dead_letter_suffix}`. Stops when `token` is cancelled.
    pub fn consume<T, H>(
        &self,
        topic: &str,
        handler: H,
        group_id: Option<&str>,
        token: CancellationToken,
    ) -> DeliveryResult<SubscriptionHandle>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        H: MessageHandler<T> + 'static,
    {
        self.subscribe(topic, handler, group_id, token, None)
    }

    /// Like [`consume`](Self::consume), also sending records that fail to
    /// decode to `poisoned`
    pub fn consume_with_poisoned<T, H>(
        &self,
        topic: &str,
        handler: H,
        group_id: Option<&str>,
        token: CancellationToken,
        poisoned: Sender<PoisonedRecord>,
    ) -> DeliveryResult<SubscriptionHandle>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        H: MessageHandler<T> + 'static,
    {
        self.subscribe(topic, handler, group_id, token, Some(poisoned))
    }

    fn subscribe<T, H>(
        &self,
        topic: &str,
        handler: H,
        group_id: Option<&str>,
        token: CancellationToken,
        poisoned: Option<Sender<PoisonedRecord>>,
    ) -> DeliveryResult<SubscriptionHandle>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        H: MessageHandler<T> + 'static,
    {
        let settings = self.consumer_settings(group_id);
        let backend = self.connector.consumer(&settings)?;

        let dlq_settings =
            ProducerSettings::for_guarantee(&self.config.bootstrap_servers, DeliveryGuarantee::Idempotent)
                .client_id(&format!("{}-dlq", self.config.client_id));
        let dlq_producer = ReliableProducer::new(self.connector.producer(&dlq_settings)?, dlq_settings)?;
        let sink = TopicDeadLetterSink::new(dlq_producer).with_suffix(&self.config.dead_letter_suffix);

        let codec: Arc<dyn Codec<T>> = Arc::new(json_gzip::<T>());
        let engine = RetryEngine::new(codec, handler, sink, RetryPolicy::from_settings(&settings));

        tracing::info!(
            topic,
            group_id = %settings.group_id,
            "Starting consumer"
        );

        let mut subscription = Subscription::new(topic, backend, engine, settings.poll_timeout());
        if let Some(tx) = poisoned {
            subscription = subscription.report_poisoned(tx);
        }
        subscription.spawn(token)
    }

    fn consumer_settings(&self, group_id: Option<&str>) -> ConsumerSettings {
        let mut settings = self.config.consumer_settings();
        if let Some(group) = group_id {
            settings.group_id = group.to_string();
        }
        settings
    }
}
