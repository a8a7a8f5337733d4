use crate::{model::TransactionStatus, ParticipantId, TransactionId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(TransactionId),

    #[error("Responder {responder_id} was not part of the fan-out for transaction {transaction_id}")]
    NotExpected {
        transaction_id: TransactionId,
        responder_id: ParticipantId,
    },

    #[error("Responder {responder_id} already submitted an offer for transaction {transaction_id}")]
    AlreadyTransacted {
        transaction_id: TransactionId,
        responder_id: ParticipantId,
    },

    #[error("Transaction {transaction_id} is closed ({status})")]
    TransactionClosed {
        transaction_id: TransactionId,
        status: TransactionStatus,
    },

    #[error("Transaction {0} is still open")]
    TransactionOpen(TransactionId),

    #[error("Delivery to {responder_id} failed: {reason}")]
    DeliveryFailed {
        responder_id: ParticipantId,
        reason: String,
    },

    #[error("Duplicate transaction for idempotency key: {0}")]
    DuplicateTransaction(String),

    #[error("Participant not found: {0}")]
    UnknownParticipant(ParticipantId),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(String),
}

impl GatewayError {
    /// Stable machine-readable code, carried in NACK bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::UnknownTransaction(_) => "unknown_transaction",
            GatewayError::NotExpected { .. } => "not_expected",
            GatewayError::AlreadyTransacted { .. } => "already_transacted",
            GatewayError::TransactionClosed { .. } => "transaction_closed",
            GatewayError::TransactionOpen(_) => "transaction_open",
            GatewayError::DeliveryFailed { .. } => "delivery_failed",
            GatewayError::DuplicateTransaction(_) => "duplicate_transaction",
            GatewayError::UnknownParticipant(_) => "unknown_participant",
            GatewayError::Config(_) => "config",
            GatewayError::Validation(_) => "validation",
            GatewayError::Serialization(_) => "serialization",
            GatewayError::Network(_) => "network",
            GatewayError::Io(_) => "io",
        }
    }

    /// Callback rejections that are expected in normal operation (late or
    /// duplicate responders) and only warrant a warning.
    pub fn is_callback_rejection(&self) -> bool {
        matches!(
            self,
            GatewayError::UnknownTransaction(_)
                | GatewayError::NotExpected { .. }
                | GatewayError::AlreadyTransacted { .. }
                | GatewayError::TransactionClosed { .. }
        )
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

impl From<uuid::Error> for GatewayError {
    fn from(err: uuid::Error) -> Self {
        GatewayError::Validation(err.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Io(err.to_string())
    }
}
