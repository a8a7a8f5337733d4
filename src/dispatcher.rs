use crate::{
    error::{GatewayError, Result},
    model::{DiscoveryRequest, FinalizeReason, Participant},
    registry::ParticipantRegistry,
    store::{FinalReceiver, TransactionStore},
    supervisor::CompletionSupervisor,
    transport::Transport,
    TransactionId,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Opens discovery transactions and fans each request out to the matching
/// responders.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ParticipantRegistry>,
    store: Arc<TransactionStore>,
    supervisor: CompletionSupervisor,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ParticipantRegistry>,
        store: Arc<TransactionStore>,
        supervisor: CompletionSupervisor,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            registry,
            store,
            supervisor,
            transport,
        }
    }

    /// Creates the transaction and returns its id without waiting for any
    /// responder. Must be called from within a Tokio runtime.
    pub fn discover(
        &self,
        request: DiscoveryRequest,
        required_capability: &str,
        fanout_timeout: Duration,
    ) -> Result<TransactionId> {
        self.discover_watched(request, required_capability, fanout_timeout)
            .map(|(id, _)| id)
    }

    /// Same as [`Dispatcher::discover`], also returning a receiver for the
    /// final snapshot that is subscribed before the transaction can close.
    pub fn discover_watched(
        &self,
        request: DiscoveryRequest,
        required_capability: &str,
        fanout_timeout: Duration,
    ) -> Result<(TransactionId, FinalReceiver)> {
        let responders = self.registry.find_by_capability(required_capability);
        let deadline = chrono::Duration::from_std(fanout_timeout)
            .ok()
            .and_then(|timeout| Utc::now().checked_add_signed(timeout))
            .ok_or_else(|| GatewayError::Validation("Fan-out timeout out of range".to_string()))?;

        let id = self.store.create(
            request.clone(),
            responders.iter().map(|p| p.id.clone()),
            deadline,
        )?;
        let final_rx = self.store.subscribe(id)?;

        if responders.is_empty() {
            info!(
                transaction_id = %id,
                capability = required_capability,
                "No responders match, completing with zero offers"
            );
            self.store.finalize(id, FinalizeReason::Completed)?;
            self.supervisor.watch(id, fanout_timeout)?;
            return Ok((id, final_rx));
        }

        self.supervisor.watch(id, fanout_timeout)?;

        info!(
            transaction_id = %id,
            requester_id = %request.requester_id,
            capability = required_capability,
            responders = responders.len(),
            "Fanning out discovery request"
        );

        let request = Arc::new(request);
        for participant in responders {
            self.spawn_delivery(id, participant, request.clone());
        }

        Ok((id, final_rx))
    }

    fn spawn_delivery(&self, id: TransactionId, participant: Participant, request: Arc<DiscoveryRequest>) {
        let transport = self.transport.clone();
        let store = self.store.clone();

        tokio::spawn(async move {
            match transport.deliver(&participant, &request, id).await {
                Ok(()) => debug!(transaction_id = %id, responder_id = %participant.id, "Request delivered"),
                Err(e) => {
                    warn!(
                        transaction_id = %id,
                        responder_id = %participant.id,
                        error = %e,
                        "Delivery failed, responder will be missing from the result"
                    );
                    if let Err(e) = store.record_miss(id, &participant.id) {
                        debug!(transaction_id = %id, error = %e, "Could not record delivery miss");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::TransactionStatus,
        registry::CapabilityMatch,
        transport::MockTransport,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    fn registry() -> Arc<ParticipantRegistry> {
        let registry = ParticipantRegistry::new(Arc::new(CapabilityMatch::Exact));
        registry.register(Participant::new("r1", "http://r1", ["solar"])).unwrap();
        registry.register(Participant::new("r2", "http://r2", ["solar"])).unwrap();
        registry.register(Participant::new("r3", "http://r3", ["wind"])).unwrap();
        Arc::new(registry)
    }

    fn dispatcher(transport: Arc<dyn Transport>) -> (Arc<TransactionStore>, Dispatcher) {
        let store = Arc::new(TransactionStore::new());
        let supervisor = CompletionSupervisor::new(store.clone(), None);
        (store.clone(), Dispatcher::new(registry(), store, supervisor, transport))
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_matching_responder_completes_immediately() {
        let mut transport = MockTransport::new();
        transport.expect_deliver().never();
        let (store, dispatcher) = dispatcher(Arc::new(transport));

        let id = dispatcher
            .discover(DiscoveryRequest::new("buyer", json!({})), "hydro", Duration::from_secs(5))
            .unwrap();

        let snapshot = store.get(id).unwrap();
        assert_eq!(snapshot.status, TransactionStatus::Completed);
        assert!(snapshot.expected.is_empty());
        assert!(snapshot.offers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_failure_is_recorded_not_fatal() {
        let mut transport = MockTransport::new();
        transport
            .expect_deliver()
            .times(2)
            .returning(|participant, _, _| {
                if participant.id == "r2" {
                    Err(GatewayError::DeliveryFailed {
                        responder_id: participant.id.clone(),
                        reason: "connection refused".to_string(),
                    })
                } else {
                    Ok(())
                }
            });
        let (store, dispatcher) = dispatcher(Arc::new(transport));

        let id = dispatcher
            .discover(DiscoveryRequest::new("buyer", json!({})), "solar", Duration::from_secs(5))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = store.get(id).unwrap();
        assert_eq!(snapshot.status, TransactionStatus::Open);
        assert_eq!(snapshot.expected.len(), 2);
        assert!(snapshot.missed.contains("r2"));
        assert!(!snapshot.missed.contains("r1"));
    }

    struct SlowTransport {
        delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for SlowTransport {
        async fn deliver(
            &self,
            participant: &Participant,
            _request: &DiscoveryRequest,
            _transaction_id: TransactionId,
        ) -> Result<()> {
            if participant.id == "r1" {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.delivered.lock().push(participant.id.clone());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_responder_does_not_block_others() {
        let transport = Arc::new(SlowTransport {
            delivered: Mutex::new(Vec::new()),
        });
        let (_store, dispatcher) = dispatcher(transport.clone());

        dispatcher
            .discover(DiscoveryRequest::new("buyer", json!({})), "solar", Duration::from_secs(5))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*transport.delivered.lock(), vec!["r2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reused_idempotency_key_is_rejected() {
        let mut transport = MockTransport::new();
        transport.expect_deliver().returning(|_, _, _| Ok(()));
        let (_store, dispatcher) = dispatcher(Arc::new(transport));
        let request = DiscoveryRequest::new("buyer", json!({})).with_idempotency_key("msg-1");

        dispatcher.discover(request.clone(), "solar", Duration::from_secs(5)).unwrap();
        assert!(matches!(
            dispatcher.discover(request, "solar", Duration::from_secs(5)),
            Err(GatewayError::DuplicateTransaction(_))
        ));
    }
}
