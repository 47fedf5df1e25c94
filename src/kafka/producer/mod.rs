//! Producer reliability controller and its broker backends

pub mod backend;
pub mod controller;
pub mod kafka;
pub mod transaction;

pub use backend::{DeliveryReport, ProducerBackend, SendReceipt};
pub use controller::ReliableProducer;
pub use kafka::KafkaProducerBackend;
pub use transaction::{Transaction, TransactionState};
