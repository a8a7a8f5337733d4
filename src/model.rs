use crate::{GatewayError, ParticipantId, Result, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    pub requester_id: ParticipantId,
    pub query: serde_json::Value,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Offer {
    pub responder_id: ParticipantId,
    pub terms: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Open,
    Completed,
    TimedOut,
}

/// Terminal status requested by a finalization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeReason {
    Completed,
    TimedOut,
}

/// Immutable copy of a transaction handed out by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSnapshot {
    pub id: TransactionId,
    pub request: DiscoveryRequest,
    pub expected: BTreeSet<ParticipantId>,
    /// Offers in arrival order.
    pub offers: Vec<Offer>,
    /// Responders the request could not be delivered to.
    pub missed: BTreeSet<ParticipantId>,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

/// What a requester sees when it polls or waits on a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    pub offers: Vec<Offer>,
}

impl Participant {
    pub fn new<I, S>(id: impl Into<ParticipantId>, endpoint: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.contains(tag)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(GatewayError::Validation("Participant id cannot be empty".to_string()));
        }
        if self.endpoint.trim().is_empty() {
            return Err(GatewayError::Validation(format!("Participant {} has no endpoint", self.id)));
        }
        Ok(())
    }
}

impl DiscoveryRequest {
    pub fn new(requester_id: impl Into<ParticipantId>, query: serde_json::Value) -> Self {
        Self {
            requester_id: requester_id.into(),
            query,
            issued_at: Utc::now(),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

impl Offer {
    pub fn new(responder_id: impl Into<ParticipantId>, terms: serde_json::Value) -> Self {
        Self {
            responder_id: responder_id.into(),
            terms,
            received_at: Utc::now(),
        }
    }
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Open)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Open => write!(f, "open"),
            TransactionStatus::Completed => write!(f, "completed"),
            TransactionStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

impl From<FinalizeReason> for TransactionStatus {
    fn from(reason: FinalizeReason) -> Self {
        match reason {
            FinalizeReason::Completed => TransactionStatus::Completed,
            FinalizeReason::TimedOut => TransactionStatus::TimedOut,
        }
    }
}

impl TransactionSnapshot {
    pub fn offer_from(&self, responder_id: &str) -> Option<&Offer> {
        self.offers.iter().find(|offer| offer.responder_id == responder_id)
    }
}

impl From<TransactionSnapshot> for DiscoveryResult {
    fn from(snapshot: TransactionSnapshot) -> Self {
        Self {
            transaction_id: snapshot.id,
            status: snapshot.status,
            offers: snapshot.offers,
        }
    }
}
