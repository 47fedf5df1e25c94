//! Producer tests, one per delivery guarantee

mod guarantees;

pub use guarantees::{test_guarantee_round_trip, test_plain_send_reports_offsets};
