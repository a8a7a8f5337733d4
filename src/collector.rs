use crate::{
    error::Result,
    model::Offer,
    store::{OfferReceipt, TransactionStore},
    TransactionId,
};
use std::sync::Arc;

/// Correlates asynchronous responder callbacks with their transaction.
#[derive(Clone)]
pub struct CallbackCollector {
    store: Arc<TransactionStore>,
}

impl CallbackCollector {
    pub fn new(store: Arc<TransactionStore>) -> Self {
        Self { store }
    }

    /// Stores the offer. The store closes the transaction as soon as every
    /// expected responder has answered. Rejections are returned to the caller
    /// and leave the transaction untouched.
    pub fn submit(
        &self,
        transaction_id: TransactionId,
        responder_id: &str,
        terms: serde_json::Value,
    ) -> Result<OfferReceipt> {
        let receipt = match self
            .store
            .add_offer(transaction_id, responder_id, Offer::new(responder_id, terms))
        {
            Ok(receipt) => receipt,
            Err(e) => {
                tracing::warn!(
                    transaction_id = %transaction_id,
                    responder_id,
                    error = %e,
                    "Callback rejected"
                );
                return Err(e);
            }
        };

        tracing::info!(
            transaction_id = %transaction_id,
            responder_id,
            collected = receipt.collected,
            expected = receipt.expected,
            "Offer received"
        );
        if receipt.completed {
            tracing::debug!(transaction_id = %transaction_id, "All expected responders answered");
        }

        Ok(receipt)
    }
}
