//! Reliable Kafka delivery
//!
//! Producers with selectable guarantees (fire-and-forget, leader ack, all
//! replicas, idempotent, transactional) and a consumer loop that commits only
//! after successful processing, redelivers a failing record a bounded number
//! of times and then dead-letters it.
//!
//! ```no_run
//! use kafka_delivery::{Config, HandlerError, MessageBus};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = MessageBus::kafka(Config::from_env()?)?;
//! bus.produce("orders", &"hello".to_string()).await?;
//!
//! let token = CancellationToken::new();
//! let handle = bus.consume(
//!     "orders",
//!     |msg: String| {
//!         println!("{}", msg);
//!         Ok::<(), HandlerError>(())
//!     },
//!     None,
//!     token.clone(),
//! )?;
//! token.cancel();
//! handle.join()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod kafka;

// Test utilities (only compiled in test builds)
#[cfg(test)]
mod testing;

pub use config::{Config, ConsumerSettings, ProducerSettings};
pub use kafka::*;
