//! rdkafka producer backend
//!
//! Wraps a `FutureProducer`. Sends block on the delivery future with
//! `futures::executor::block_on`, so they work from any thread, with or
//! without a tokio runtime in scope.
//!
//! librdkafka owns retries and sequence numbers for idempotent producers
//! (`enable.idempotence`, `message.send.max.retries`), so this backend reports
//! `retries_internally() == true` and the controller does not retry on top.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;

use super::backend::{ProducerBackend, SendReceipt};
use crate::config::ProducerSettings;
use crate::kafka::envelope::{Headers, OutboundMessage};
use crate::kafka::error::{DeliveryError, DeliveryResult};

pub struct KafkaProducerBackend {
    producer: FutureProducer,
    transactional: bool,
    /// init_transactions must only run once per producer instance
    initialized: AtomicBool,
}

impl KafkaProducerBackend {
    pub fn new(settings: &ProducerSettings) -> DeliveryResult<Self> {
        settings.validate()?;

        let producer: FutureProducer = settings
            .to_client_config()
            .create()
            .map_err(|e| DeliveryError::Fatal(format!("Failed to create producer: {}", e)))?;

        tracing::debug!(
            bootstrap_servers = %settings.bootstrap_servers,
            guarantee = %settings.guarantee,
            "Kafka producer created"
        );

        Ok(Self {
            producer,
            transactional: settings.guarantee.is_transactional(),
            initialized: AtomicBool::new(false),
        })
    }

    /// Check connectivity by fetching cluster metadata
    pub fn is_healthy(&self, timeout: Duration) -> bool {
        match self.producer.client().fetch_metadata(None, timeout) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Producer health check failed: {}", e);
                false
            }
        }
    }

    fn require_transactional(&self) -> DeliveryResult<()> {
        if self.transactional {
            Ok(())
        } else {
            Err(DeliveryError::InvalidConfig(
                "producer was created without transactional.id".to_string(),
            ))
        }
    }
}

fn to_owned_headers(headers: &Headers) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, (key, value)| {
            acc.insert(Header {
                key,
                value: Some(&value[..]),
            })
        })
}

impl ProducerBackend for KafkaProducerBackend {
    fn send(&self, message: &OutboundMessage, _sequence: u64) -> DeliveryResult<SendReceipt> {
        let mut record = FutureRecord::<[u8], [u8]>::to(&message.topic).payload(&message.value[..]);

        if let Some(key) = &message.key {
            record = record.key(&key[..]);
        }
        if let Some(partition) = message.partition {
            record = record.partition(partition);
        }
        if !message.headers.is_empty() {
            record = record.headers(to_owned_headers(&message.headers));
        }

        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(e, _)| DeliveryError::from_rdkafka(&e))?;

        let (partition, offset) = futures::executor::block_on(delivery)
            .map_err(|_| DeliveryError::Transient("delivery future canceled".to_string()))?
            .map_err(|(e, _)| DeliveryError::from_rdkafka(&e))?;

        Ok(SendReceipt { partition, offset })
    }

    fn init_transactions(&self, timeout: Duration) -> DeliveryResult<()> {
        self.require_transactional()?;
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.producer
            .init_transactions(Timeout::After(timeout))
            .map_err(|e| DeliveryError::from_rdkafka(&e))?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn begin_transaction(&self) -> DeliveryResult<()> {
        self.require_transactional()?;
        self.producer
            .begin_transaction()
            .map_err(|e| DeliveryError::from_rdkafka(&e))
    }

    fn commit_transaction(&self, timeout: Duration) -> DeliveryResult<()> {
        self.producer
            .commit_transaction(Timeout::After(timeout))
            .map_err(|e| DeliveryError::from_rdkafka(&e))
    }

    fn abort_transaction(&self, timeout: Duration) -> DeliveryResult<()> {
        self.producer
            .abort_transaction(Timeout::After(timeout))
            .map_err(|e| DeliveryError::from_rdkafka(&e))
    }

    fn flush(&self, timeout: Duration) -> DeliveryResult<()> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| DeliveryError::Transient(format!("Flush failed: {}", e)))
    }

    fn retries_internally(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::guarantee::DeliveryGuarantee;
    use rdkafka::message::Headers as _;

    // Creating a producer does not connect, so these run without a broker.

    #[test]
    fn test_create_plain_producer() {
        let settings = ProducerSettings::for_guarantee("localhost:9092", DeliveryGuarantee::Leader);
        let backend = KafkaProducerBackend::new(&settings).unwrap();
        assert!(backend.retries_internally());
        assert!(matches!(
            backend.begin_transaction(),
            Err(DeliveryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_create_rejects_invalid_settings() {
        let mut settings =
            ProducerSettings::for_guarantee("localhost:9092", DeliveryGuarantee::Idempotent);
        settings.max_in_flight = 3;
        assert!(KafkaProducerBackend::new(&settings).is_err());
    }

    #[test]
    fn test_create_transactional_producer() {
        let settings =
            ProducerSettings::for_guarantee("localhost:9092", DeliveryGuarantee::Transactional)
                .transactional_id("unit-test-txn");
        assert!(KafkaProducerBackend::new(&settings).is_ok());
    }

    #[test]
    fn test_header_conversion_keeps_order() {
        let headers = Headers::new()
            .with_str("Application", "kafka-delivery")
            .with_str("transactionId", "t-1");
        let owned = to_owned_headers(&headers);

        assert_eq!(owned.count(), 2);
        let first = owned.get(0);
        assert_eq!(first.key, "Application");
        assert_eq!(first.value, Some(&b"kafka-delivery"[..]));
        assert_eq!(owned.get(1).key, "transactionId");
    }
}
