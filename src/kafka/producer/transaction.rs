//! Producer transaction state machine
//!
//! One `Transaction` spans exactly one produce-in-transaction call:
//!
//! ```text
//! Uninitialized -> Initialized -> Begun -> Committed
//!                                       -> Aborted
//! ```
//!
//! Committed and Aborted are terminal. A transaction is never reused.

use crate::kafka::error::{DeliveryError, DeliveryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Uninitialized,
    Initialized,
    Begun,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Uninitialized => "uninitialized",
            TransactionState::Initialized => "initialized",
            TransactionState::Begun => "begun",
            TransactionState::Committed => "committed",
            TransactionState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: String,
    state: TransactionState,
}

impl Transaction {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: TransactionState::Uninitialized,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Coordinator handshake completed
    pub fn mark_initialized(&mut self) -> DeliveryResult<()> {
        self.transition(TransactionState::Uninitialized, TransactionState::Initialized)
    }

    pub fn begin(&mut self) -> DeliveryResult<()> {
        self.transition(TransactionState::Initialized, TransactionState::Begun)
    }

    pub fn commit(&mut self) -> DeliveryResult<()> {
        self.transition(TransactionState::Begun, TransactionState::Committed)
    }

    pub fn abort(&mut self) -> DeliveryResult<()> {
        self.transition(TransactionState::Begun, TransactionState::Aborted)
    }

    fn transition(&mut self, from: TransactionState, to: TransactionState) -> DeliveryResult<()> {
        if self.state != from {
            return Err(DeliveryError::InvalidTransition {
                transactional_id: self.id.clone(),
                from: self.state.as_str(),
                to: to.as_str(),
            });
        }
        self.state = to;
        Ok(())
    }
}
