//! Idempotent producer tests

mod ordering;

pub use ordering::test_idempotent_ordering_without_duplicates;
