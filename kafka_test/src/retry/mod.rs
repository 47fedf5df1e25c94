//! Consumer retry engine tests against a live group coordinator

mod dead_letter;
mod recovery;

pub use dead_letter::test_dead_letter_after_max_redeliveries;
pub use recovery::test_recovery_before_budget_exhausted;
