use crate::{
    error::{GatewayError, Result},
    model::FinalizeReason,
    store::TransactionStore,
    TransactionId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Enforces per-transaction deadlines and evicts finalized transactions once
/// their retention window has passed.
#[derive(Clone)]
pub struct CompletionSupervisor {
    store: Arc<TransactionStore>,
    retention: Option<Duration>,
}

impl CompletionSupervisor {
    pub fn new(store: Arc<TransactionStore>, retention: Option<Duration>) -> Self {
        Self { store, retention }
    }

    /// Spawns the timer for `id`. The task finalizes the transaction as
    /// `TimedOut` when `timeout` elapses while it is still open, and returns
    /// early if something else finalizes it first.
    pub fn watch(&self, id: TransactionId, timeout: Duration) -> Result<JoinHandle<()>> {
        let mut final_rx = self.store.subscribe(id)?;
        let supervisor = self.clone();

        Ok(tokio::spawn(async move {
            let finalized = tokio::select! {
                _ = tokio::time::sleep(timeout) => supervisor.expire(id),
                closed = async { final_rx.wait_for(Option::is_some).await.is_ok() } => closed,
            };

            if let (true, Some(retention)) = (finalized, supervisor.retention) {
                tokio::time::sleep(retention).await;
                match supervisor.store.evict(id) {
                    Ok(_) => debug!(transaction_id = %id, "Retention window elapsed, transaction evicted"),
                    Err(GatewayError::UnknownTransaction(_)) => {}
                    Err(e) => warn!(transaction_id = %id, error = %e, "Retention eviction failed"),
                }
            }
        }))
    }

    /// Deadline path. Returns whether the transaction is now terminal.
    fn expire(&self, id: TransactionId) -> bool {
        match self.store.finalize(id, FinalizeReason::TimedOut) {
            Ok(true) => {
                if let Ok(snapshot) = self.store.get(id) {
                    info!(
                        transaction_id = %id,
                        offers = snapshot.offers.len(),
                        expected = snapshot.expected.len(),
                        missed = snapshot.missed.len(),
                        "Deadline reached, closing with partial offers"
                    );
                }
                true
            }
            Ok(false) => true,
            Err(e) => {
                debug!(transaction_id = %id, error = %e, "Deadline fired for a transaction that is gone");
                false
            }
        }
    }
}
