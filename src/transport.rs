use crate::{
    config::ProtocolConfig,
    error::{GatewayError, Result},
    model::{DiscoveryRequest, Participant},
    protocol::{AckResponse, SearchEnvelope},
    TransactionId,
};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Outbound delivery of a discovery request to one responder. Implementations
/// only report whether the responder accepted the request; the offer itself
/// arrives later through the callback path.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(
        &self,
        participant: &Participant,
        request: &DiscoveryRequest,
        transaction_id: TransactionId,
    ) -> Result<()>;
}

/// Posts a `search` envelope to `{endpoint}/search` and expects an ACK.
pub struct HttpTransport {
    client: Client,
    protocol: ProtocolConfig,
}

impl HttpTransport {
    pub fn new(protocol: ProtocolConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, protocol })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(
        &self,
        participant: &Participant,
        request: &DiscoveryRequest,
        transaction_id: TransactionId,
    ) -> Result<()> {
        let envelope = SearchEnvelope::for_responder(&self.protocol, request, participant, transaction_id);
        let url = format!("{}/search", participant.endpoint.trim_end_matches('/'));

        let response = self.client.post(&url).json(&envelope).send().await?;
        if !response.status().is_success() {
            return Err(GatewayError::DeliveryFailed {
                responder_id: participant.id.clone(),
                reason: format!("{} returned {}", url, response.status()),
            });
        }

        let ack: AckResponse = response.json().await?;
        if !ack.is_ack() {
            let reason = ack
                .error
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_else(|| "NACK".to_string());
            return Err(GatewayError::DeliveryFailed {
                responder_id: participant.id.clone(),
                reason,
            });
        }

        Ok(())
    }
}
