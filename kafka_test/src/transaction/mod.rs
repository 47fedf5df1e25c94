//! Transactional producer tests
//!
//! - commit: committed records and the headers variant
//! - isolation: aborted transactions stay invisible to read-committed readers

mod commit;
mod isolation;

pub use commit::{test_transaction_commit, test_transaction_headers};
pub use isolation::{test_aborted_transaction_hidden, test_failed_handshake_aborts};
