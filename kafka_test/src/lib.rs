//! kafka_delivery E2E Test Suite
//!
//! End-to-end delivery scenarios against a live Kafka cluster:
//! - Test isolation via unique topic/group names
//! - Topics created up front and deleted via RAII
//! - A raw rdkafka consumer to verify what actually reached the broker
//!
//! ## Test Categories
//!
//! - **producer**: every delivery guarantee end to end
//! - **idempotent**: ordering and deduplication under one key
//! - **transaction**: commit, headers variant, abort isolation, handshake failure
//! - **retry**: bounded redelivery, dead-lettering, recovery within budget
//! - **subscription**: restart resumes from the committed offset
//!
//! ## Usage
//!
//! ```bash
//! # Run all tests against localhost:9092
//! cargo run -p kafka_test --release
//!
//! # Against another cluster
//! KAFKA_BOOTSTRAP_SERVERS=broker:9092 cargo run -p kafka_test --release
//! ```

// Infrastructure modules
pub mod common;
pub mod setup;

// Test modules
pub mod idempotent;
pub mod producer;
pub mod retry;
pub mod subscription;
pub mod transaction;

// Re-export infrastructure
pub use setup::{verify_broker_ready, TestContext};

// Re-export test functions for convenience
pub use idempotent::test_idempotent_ordering_without_duplicates;
pub use producer::{test_guarantee_round_trip, test_plain_send_reports_offsets};
pub use retry::{test_dead_letter_after_max_redeliveries, test_recovery_before_budget_exhausted};
pub use subscription::test_resume_after_restart;
pub use transaction::{
    test_aborted_transaction_hidden, test_failed_handshake_aborts, test_transaction_commit,
    test_transaction_headers,
};
