//! Subscription runtime tests through the message bus

mod resume;

pub use resume::test_resume_after_restart;
