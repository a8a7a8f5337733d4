use crate::{
    collector::CallbackCollector,
    config::GatewayConfig,
    dispatcher::Dispatcher,
    error::{GatewayError, Result},
    model::{DiscoveryRequest, DiscoveryResult, Participant, TransactionSnapshot},
    registry::ParticipantRegistry,
    store::{FinalReceiver, OfferReceipt, TransactionStore},
    supervisor::CompletionSupervisor,
    transport::Transport,
    TransactionId,
};
use std::sync::Arc;
use std::time::Duration;

/// Entry point for requesters and responders. Cloning is cheap; every clone
/// shares the same registry and transaction store.
#[derive(Clone)]
pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<ParticipantRegistry>,
    store: Arc<TransactionStore>,
    dispatcher: Dispatcher,
    collector: CallbackCollector,
}

impl Gateway {
    pub fn new(config: GatewayConfig, transport: Arc<dyn Transport>) -> Self {
        let registry = Arc::new(ParticipantRegistry::new(Arc::new(config.capability_match)));
        Self::with_registry(config, registry, transport)
    }

    pub fn with_registry(
        config: GatewayConfig,
        registry: Arc<ParticipantRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let store = Arc::new(TransactionStore::new());
        let supervisor = CompletionSupervisor::new(store.clone(), config.retention_window());
        let dispatcher = Dispatcher::new(registry.clone(), store.clone(), supervisor, transport);
        let collector = CallbackCollector::new(store.clone());

        Self {
            config,
            registry,
            store,
            dispatcher,
            collector,
        }
    }

    pub fn register(&self, participant: Participant) -> Result<()> {
        self.registry.register(participant)
    }

    /// Polling mode: returns as soon as the request has been fanned out.
    pub fn discover(
        &self,
        request: DiscoveryRequest,
        required_capability: &str,
        fanout_timeout: Option<Duration>,
    ) -> Result<TransactionId> {
        let timeout = fanout_timeout.unwrap_or_else(|| self.config.fanout_timeout());
        self.dispatcher.discover(request, required_capability, timeout)
    }

    /// Blocking mode: returns once the transaction is finalized, which the
    /// supervisor guarantees by the fan-out deadline.
    pub async fn discover_and_wait(
        &self,
        request: DiscoveryRequest,
        required_capability: &str,
        fanout_timeout: Option<Duration>,
    ) -> Result<DiscoveryResult> {
        let timeout = fanout_timeout.unwrap_or_else(|| self.config.fanout_timeout());
        let (id, final_rx) = self
            .dispatcher
            .discover_watched(request, required_capability, timeout)?;
        Self::await_final(id, final_rx).await
    }

    pub fn submit_callback(
        &self,
        transaction_id: TransactionId,
        responder_id: &str,
        terms: serde_json::Value,
    ) -> Result<OfferReceipt> {
        self.collector.submit(transaction_id, responder_id, terms)
    }

    pub fn get_result(&self, transaction_id: TransactionId) -> Result<DiscoveryResult> {
        Ok(self.store.get(transaction_id)?.into())
    }

    pub fn get_transaction(&self, transaction_id: TransactionId) -> Result<TransactionSnapshot> {
        self.store.get(transaction_id)
    }

    pub async fn wait_for_result(&self, transaction_id: TransactionId) -> Result<DiscoveryResult> {
        let final_rx = self.store.subscribe(transaction_id)?;
        Self::await_final(transaction_id, final_rx).await
    }

    /// Reads the result from the published final snapshot, so retention
    /// eviction racing the wake-up cannot lose it.
    async fn await_final(transaction_id: TransactionId, mut final_rx: FinalReceiver) -> Result<DiscoveryResult> {
        let snapshot = final_rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|snapshot| snapshot.clone())
            .ok_or(GatewayError::UnknownTransaction(transaction_id))?;
        Ok(TransactionSnapshot::clone(&snapshot).into())
    }

    /// Hands out the final result and frees the transaction.
    pub fn take_result(&self, transaction_id: TransactionId) -> Result<DiscoveryResult> {
        Ok(self.store.evict(transaction_id)?.into())
    }
}
