use std::time::Duration;

use parking_lot::Mutex;

use super::{injected, InMemoryBroker, SendFailure, TxnStatus};
use crate::config::ProducerSettings;
use crate::kafka::envelope::OutboundMessage;
use crate::kafka::error::{DeliveryError, DeliveryResult};
use crate::kafka::producer::{ProducerBackend, SendReceipt};

#[derive(Debug, Default)]
struct Session {
    initialized: bool,
    open_txn: Option<u64>,
}

/// One producer session against an [`InMemoryBroker`]
pub struct MemoryProducer {
    broker: InMemoryBroker,
    session_id: u64,
    idempotent: bool,
    transactional_id: Option<String>,
    session: Mutex<Session>,
}

impl MemoryProducer {
    pub(super) fn new(broker: InMemoryBroker, session_id: u64, settings: &ProducerSettings) -> Self {
        let transactional_id = settings
            .guarantee
            .is_transactional()
            .then(|| settings.transactional_id.clone())
            .flatten();

        Self {
            broker,
            session_id,
            idempotent: settings.enable_idempotence,
            transactional_id,
            session: Mutex::new(Session::default()),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    fn transactional_id(&self) -> DeliveryResult<&str> {
        self.transactional_id.as_deref().ok_or_else(|| {
            DeliveryError::InvalidConfig("producer was created without transactional.id".to_string())
        })
    }

    fn finish(&self, status: TxnStatus) -> DeliveryResult<()> {
        let id = self.transactional_id()?;
        let txn = self.session.lock().open_txn.take().ok_or_else(|| {
            DeliveryError::Fatal(format!("no open transaction for {}", id))
        })?;

        let mut state = self.broker.state.lock();
        match state.transactions.get(&txn) {
            // fenced by a newer session with the same transactional id
            Some((_, TxnStatus::Aborted)) if status == TxnStatus::Committed => {
                Err(DeliveryError::Fatal(format!("transaction {} was fenced", id)))
            }
            _ => {
                state.set_status(txn, status);
                Ok(())
            }
        }
    }
}

impl Drop for MemoryProducer {
    fn drop(&mut self) {
        self.broker.state.lock().sequences.remove(&self.session_id);
    }
}

impl ProducerBackend for MemoryProducer {
    fn send(&self, message: &OutboundMessage, sequence: u64) -> DeliveryResult<SendReceipt> {
        let txn = if self.transactional_id.is_some() {
            let open = self.session.lock().open_txn;
            Some(open.ok_or_else(|| {
                DeliveryError::Fatal("transactional producer sent outside a transaction".to_string())
            })?)
        } else {
            None
        };

        let mut state = self.broker.state.lock();

        if self.idempotent {
            if let Some(receipt) = state.seen_sequence(self.session_id, sequence) {
                tracing::debug!(
                    session = self.session_id,
                    sequence,
                    "Duplicate sequence dropped"
                );
                return Ok(receipt);
            }
        }

        match state.send_failures.pop_front() {
            Some(failure @ (SendFailure::TransientBeforeWrite | SendFailure::Fatal)) => {
                Err(injected(failure))
            }
            lost_ack => {
                let receipt = state.append(message, txn)?;
                if self.idempotent {
                    state.remember_sequence(self.session_id, sequence, receipt);
                }
                match lost_ack {
                    Some(failure) => Err(injected(failure)),
                    None => Ok(receipt),
                }
            }
        }
    }

    fn init_transactions(&self, _timeout: Duration) -> DeliveryResult<()> {
        let id = self.transactional_id()?.to_string();

        let mut state = self.broker.state.lock();
        if state.init_failures > 0 {
            state.init_failures -= 1;
            return Err(DeliveryError::Transient(
                "injected: transaction coordinator unavailable".to_string(),
            ));
        }

        let mut session = self.session.lock();
        if session.initialized {
            return Ok(());
        }

        // fence transactions left open by earlier sessions with this id
        for (owner, status) in state.transactions.values_mut() {
            if *owner == id && *status == TxnStatus::Open {
                *status = TxnStatus::Aborted;
            }
        }
        session.initialized = true;
        Ok(())
    }

    fn begin_transaction(&self) -> DeliveryResult<()> {
        let id = self.transactional_id()?.to_string();
        let mut state = self.broker.state.lock();
        let mut session = self.session.lock();
        if !session.initialized {
            return Err(DeliveryError::Fatal(format!(
                "transactions not initialized for {}",
                id
            )));
        }
        if session.open_txn.is_some() {
            return Err(DeliveryError::Fatal(format!(
                "transaction already open for {}",
                id
            )));
        }

        state.next_txn += 1;
        let txn = state.next_txn;
        state.transactions.insert(txn, (id, TxnStatus::Open));
        session.open_txn = Some(txn);
        Ok(())
    }

    fn commit_transaction(&self, _timeout: Duration) -> DeliveryResult<()> {
        self.finish(TxnStatus::Committed)
    }

    fn abort_transaction(&self, _timeout: Duration) -> DeliveryResult<()> {
        self.finish(TxnStatus::Aborted)
    }

    fn flush(&self, _timeout: Duration) -> DeliveryResult<()> {
        Ok(())
    }
}
