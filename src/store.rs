//! In-memory store of in-flight discovery transactions.
//!
//! The transaction map is only locked long enough to look up or insert an
//! entry; every mutation of a transaction happens under that transaction's own
//! mutex, so callbacks for unrelated transactions never contend.

use crate::{
    error::{GatewayError, Result},
    model::{DiscoveryRequest, FinalizeReason, Offer, TransactionSnapshot, TransactionStatus},
    ParticipantId, TransactionId,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

struct Transaction {
    id: TransactionId,
    request: DiscoveryRequest,
    expected: BTreeSet<ParticipantId>,
    offers: Vec<Offer>,
    missed: BTreeSet<ParticipantId>,
    status: TransactionStatus,
    created_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
    finalized_at: Option<DateTime<Utc>>,
}

/// Receiver that yields the final snapshot once the transaction is terminal.
pub type FinalReceiver = watch::Receiver<Option<Arc<TransactionSnapshot>>>;

struct TransactionEntry {
    state: Mutex<Transaction>,
    final_tx: watch::Sender<Option<Arc<TransactionSnapshot>>>,
}

/// Outcome of a stored offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferReceipt {
    pub collected: usize,
    pub expected: usize,
    /// This offer was the last expected one and closed the transaction.
    pub completed: bool,
}

#[derive(Default)]
pub struct TransactionStore {
    transactions: RwLock<HashMap<TransactionId, Arc<TransactionEntry>>>,
    idempotency_keys: Mutex<HashMap<String, TransactionId>>,
}

impl Transaction {
    fn snapshot(&self) -> TransactionSnapshot {
        TransactionSnapshot {
            id: self.id,
            request: self.request.clone(),
            expected: self.expected.clone(),
            offers: self.offers.clone(),
            missed: self.missed.clone(),
            status: self.status,
            created_at: self.created_at,
            deadline: self.deadline,
            finalized_at: self.finalized_at,
        }
    }

    /// Moves the transaction to `status` and publishes the final snapshot.
    /// Callers hold the transaction mutex and have checked it is still open.
    fn close(&mut self, status: TransactionStatus, final_tx: &watch::Sender<Option<Arc<TransactionSnapshot>>>) {
        self.status = status;
        self.finalized_at = Some(Utc::now());
        final_tx.send_replace(Some(Arc::new(self.snapshot())));

        tracing::info!(
            transaction_id = %self.id,
            %status,
            offers = self.offers.len(),
            expected = self.expected.len(),
            "Transaction finalized"
        );
    }
}

impl TransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: TransactionId) -> Result<Arc<TransactionEntry>> {
        self.transactions
            .read()
            .get(&id)
            .cloned()
            .ok_or(GatewayError::UnknownTransaction(id))
    }

    /// Allocates a new `Open` transaction. Fails only when the request carries
    /// an idempotency key that is already bound to a live transaction.
    pub fn create(
        &self,
        request: DiscoveryRequest,
        responders: impl IntoIterator<Item = ParticipantId>,
        deadline: DateTime<Utc>,
    ) -> Result<TransactionId> {
        let id = Uuid::new_v4();

        let mut keys = self.idempotency_keys.lock();
        if let Some(key) = &request.idempotency_key {
            if keys.contains_key(key) {
                return Err(GatewayError::DuplicateTransaction(key.clone()));
            }
            keys.insert(key.clone(), id);
        }

        let transaction = Transaction {
            id,
            request,
            expected: responders.into_iter().collect(),
            offers: Vec::new(),
            missed: BTreeSet::new(),
            status: TransactionStatus::Open,
            created_at: Utc::now(),
            deadline,
            finalized_at: None,
        };
        let (final_tx, _) = watch::channel(None);
        let entry = Arc::new(TransactionEntry {
            state: Mutex::new(transaction),
            final_tx,
        });

        self.transactions.write().insert(id, entry);
        drop(keys);

        tracing::debug!(transaction_id = %id, "Transaction created");
        Ok(id)
    }

    /// Stores `offer` under `responder_id`. The offer that completes the
    /// expected set closes the transaction as `Completed` before the lock is
    /// released.
    pub fn add_offer(
        &self,
        id: TransactionId,
        responder_id: &str,
        offer: Offer,
    ) -> Result<OfferReceipt> {
        let entry = self.entry(id)?;
        let mut transaction = entry.state.lock();

        if !transaction.expected.contains(responder_id) {
            return Err(GatewayError::NotExpected {
                transaction_id: id,
                responder_id: responder_id.to_string(),
            });
        }
        if transaction.offers.iter().any(|o| o.responder_id == responder_id) {
            return Err(GatewayError::AlreadyTransacted {
                transaction_id: id,
                responder_id: responder_id.to_string(),
            });
        }
        if transaction.status.is_terminal() {
            return Err(GatewayError::TransactionClosed {
                transaction_id: id,
                status: transaction.status,
            });
        }

        transaction.offers.push(Offer {
            responder_id: responder_id.to_string(),
            ..offer
        });

        let collected = transaction.offers.len();
        let expected = transaction.expected.len();
        let completed = collected >= expected;
        if completed {
            transaction.close(TransactionStatus::Completed, &entry.final_tx);
        }

        Ok(OfferReceipt {
            collected,
            expected,
            completed,
        })
    }

    /// Records that the request never reached `responder_id`.
    pub fn record_miss(&self, id: TransactionId, responder_id: &str) -> Result<()> {
        let entry = self.entry(id)?;
        entry.state.lock().missed.insert(responder_id.to_string());
        Ok(())
    }

    /// Moves an `Open` transaction to its terminal status. Returns `false`
    /// when the transaction was already finalized; the first reason wins.
    pub fn finalize(&self, id: TransactionId, reason: FinalizeReason) -> Result<bool> {
        let entry = self.entry(id)?;
        let mut transaction = entry.state.lock();

        if transaction.status.is_terminal() {
            tracing::debug!(
                transaction_id = %id,
                status = %transaction.status,
                requested = ?reason,
                "Finalize ignored, transaction already closed"
            );
            return Ok(false);
        }

        transaction.close(reason.into(), &entry.final_tx);
        Ok(true)
    }

    pub fn get(&self, id: TransactionId) -> Result<TransactionSnapshot> {
        let entry = self.entry(id)?;
        let snapshot = entry.state.lock().snapshot();
        Ok(snapshot)
    }

    pub fn status(&self, id: TransactionId) -> Result<TransactionStatus> {
        let entry = self.entry(id)?;
        let status = entry.state.lock().status;
        Ok(status)
    }

    /// Receiver that observes the final snapshot of `id`. It stays readable
    /// after the transaction has been evicted from the store.
    pub fn subscribe(&self, id: TransactionId) -> Result<FinalReceiver> {
        Ok(self.entry(id)?.final_tx.subscribe())
    }

    /// Removes a terminal transaction, returning its final snapshot.
    pub fn evict(&self, id: TransactionId) -> Result<TransactionSnapshot> {
        let mut transactions = self.transactions.write();
        let entry = transactions
            .get(&id)
            .cloned()
            .ok_or(GatewayError::UnknownTransaction(id))?;

        let snapshot = entry.state.lock().snapshot();
        if !snapshot.status.is_terminal() {
            return Err(GatewayError::TransactionOpen(id));
        }
        transactions.remove(&id);
        drop(transactions);

        if let Some(key) = &snapshot.request.idempotency_key {
            self.idempotency_keys.lock().remove(key);
        }

        tracing::debug!(transaction_id = %id, "Transaction evicted");
        Ok(snapshot)
    }

    pub fn len(&self) -> usize {
        self.transactions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.read().is_empty()
    }
}
