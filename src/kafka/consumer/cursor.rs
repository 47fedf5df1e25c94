//! Per-partition consumption cursor
//!
//! `stored` means the resume position has been recorded locally, `committed`
//! that the group coordinator has it. Between receiving a record and
//! resolving it both are false; during redelivery they stay false.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumptionCursor {
    pub topic: String,
    pub partition: i32,
    /// Offset of the record currently being handled
    pub offset: i64,
    pub committed: bool,
    pub stored: bool,
    /// Number of times this cursor advanced past a resolved record
    pub advanced: u64,
}

impl ConsumptionCursor {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset: -1,
            committed: false,
            stored: false,
            advanced: 0,
        }
    }

    /// A record at `offset` was received
    pub fn observe(&mut self, offset: i64) {
        self.offset = offset;
        self.stored = false;
        self.committed = false;
    }

    pub fn mark_stored(&mut self) {
        self.stored = true;
        self.advanced += 1;
    }

    pub fn mark_committed(&mut self) {
        self.committed = true;
    }

    /// Position a restarted consumer resumes from
    pub fn resume_offset(&self) -> Option<i64> {
        self.stored.then_some(self.offset + 1)
    }

    /// Resolution in progress (received but not yet stored and committed)
    pub fn is_pending(&self) -> bool {
        self.offset >= 0 && !(self.stored && self.committed)
    }
}
