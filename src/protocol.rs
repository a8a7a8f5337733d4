//! Beckn-style wire envelopes exchanged with requesters and responders.
//!
//! A requester (BAP) posts a `search` envelope to the gateway; the gateway
//! forwards one `search` per selected responder (BPP), and each responder
//! later answers with an `on_search` envelope carrying its catalog.

use crate::{
    config::ProtocolConfig,
    error::{GatewayError, Result},
    model::{DiscoveryRequest, Participant},
    ParticipantId, TransactionId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ACTION_SEARCH: &str = "search";
pub const ACTION_ON_SEARCH: &str = "on_search";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Descriptor {
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub country: Descriptor,
    pub city: Descriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub domain: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub version: String,
    pub bap_id: String,
    pub bap_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpp_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchEnvelope {
    pub context: Context,
    pub message: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnSearchEnvelope {
    pub context: Context,
    pub message: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AckStatus {
    Ack,
    Nack,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ack {
    pub status: AckStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AckMessage {
    pub ack: Ack,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AckResponse {
    pub message: AckMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProtocolError>,
}

impl Context {
    pub fn new(config: &ProtocolConfig, action: &str) -> Self {
        Self {
            domain: config.domain.clone(),
            action: action.to_string(),
            location: config.location(),
            version: config.version.clone(),
            bap_id: config.subscriber_id.clone(),
            bap_uri: config.subscriber_uri.clone(),
            bpp_id: None,
            bpp_uri: None,
            transaction_id: None,
            message_id: Some(Uuid::new_v4().to_string()),
            timestamp: Utc::now(),
        }
    }

    fn expect_action(&self, action: &str) -> Result<()> {
        if self.action != action {
            return Err(GatewayError::Validation(format!(
                "Expected action '{}', got '{}'",
                action, self.action
            )));
        }
        Ok(())
    }
}

impl SearchEnvelope {
    /// Capability a responder must declare to receive this search.
    pub fn required_capability(&self) -> Result<String> {
        self.message
            .pointer("/intent/item/descriptor/code")
            .and_then(|code| code.as_str())
            .filter(|code| !code.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                GatewayError::Validation("Search intent has no item descriptor code".to_string())
            })
    }

    /// The requester's `message_id` doubles as the idempotency key.
    pub fn into_discovery_request(self) -> Result<DiscoveryRequest> {
        self.context.expect_action(ACTION_SEARCH)?;
        if self.context.bap_id.trim().is_empty() {
            return Err(GatewayError::Validation("Search context has no bap_id".to_string()));
        }

        Ok(DiscoveryRequest {
            requester_id: self.context.bap_id,
            query: self.message,
            issued_at: self.context.timestamp,
            idempotency_key: self.context.message_id,
        })
    }

    /// Envelope the gateway forwards to one responder.
    pub fn for_responder(
        config: &ProtocolConfig,
        request: &DiscoveryRequest,
        responder: &Participant,
        transaction_id: TransactionId,
    ) -> Self {
        let mut context = Context::new(config, ACTION_SEARCH);
        context.bpp_id = Some(responder.id.clone());
        context.bpp_uri = Some(responder.endpoint.clone());
        context.transaction_id = Some(transaction_id.to_string());

        Self {
            context,
            message: request.query.clone(),
        }
    }
}

impl OnSearchEnvelope {
    /// Builds a responder's callback for `search`.
    pub fn reply_to(search: &SearchEnvelope, responder_id: &str, responder_uri: &str, catalog: serde_json::Value) -> Self {
        let mut context = search.context.clone();
        context.action = ACTION_ON_SEARCH.to_string();
        context.bpp_id = Some(responder_id.to_string());
        context.bpp_uri = Some(responder_uri.to_string());
        context.timestamp = Utc::now();

        Self { context, message: catalog }
    }

    /// Splits the callback into transaction id, responder id and offer terms.
    pub fn into_callback(self) -> Result<(TransactionId, ParticipantId, serde_json::Value)> {
        self.context.expect_action(ACTION_ON_SEARCH)?;

        let transaction_id = self
            .context
            .transaction_id
            .as_deref()
            .ok_or_else(|| GatewayError::Validation("Callback has no transaction_id".to_string()))?
            .parse::<TransactionId>()?;
        let responder_id = self
            .context
            .bpp_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| GatewayError::Validation("Callback has no bpp_id".to_string()))?;

        Ok((transaction_id, responder_id, self.message))
    }
}

impl AckResponse {
    pub fn ack() -> Self {
        Self {
            message: AckMessage { ack: Ack { status: AckStatus::Ack } },
            transaction_id: None,
            error: None,
        }
    }

    pub fn ack_transaction(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id: Some(transaction_id),
            ..Self::ack()
        }
    }

    pub fn nack(err: &GatewayError) -> Self {
        Self {
            message: AckMessage { ack: Ack { status: AckStatus::Nack } },
            transaction_id: None,
            error: Some(ProtocolError {
                code: err.code().to_string(),
                message: err.to_string(),
            }),
        }
    }

    pub fn is_ack(&self) -> bool {
        self.message.ack.status == AckStatus::Ack
    }
}
