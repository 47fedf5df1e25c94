//! Testing utilities for kafka_delivery
//!
//! Only compiled for unit tests.
//!
//! # Organization
//! - `mocks.rs` - Recording producer/consumer backends
//! - `helpers.rs` - Envelope fixtures
//!
//! Integration tests under `tests/` use the public
//! [`InMemoryBroker`](crate::kafka::memory::InMemoryBroker) instead.

#![cfg(test)]

pub mod helpers;
pub mod mocks;

pub use helpers::{envelope, text_envelope};
pub use mocks::{RecordingProducer, ScriptedConsumer};
