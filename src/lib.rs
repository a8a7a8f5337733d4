//! # DEG Gateway - Decentralized Energy commerce Gateway
//!
//! Routes discovery traffic between autonomous trading agents.
//!
//! ## Architecture
//!
//! - **Registry**: participants, their endpoints and capability tags
//! - **Store**: in-flight transactions and the offers collected for them
//! - **Dispatcher**: opens a transaction and fans a `search` out to every matching responder
//! - **Collector**: correlates each asynchronous `on_search` callback with its transaction
//! - **Supervisor**: closes transactions at their deadline and evicts them after retention
//! - **API**: Axum router exposing `/search`, `/on_search` and result retrieval

pub mod api;
pub mod collector;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod intent;
pub mod logging;
pub mod model;
pub mod protocol;
pub mod registry;
pub mod store;
pub mod supervisor;
pub mod transport;

pub use collector::CallbackCollector;
pub use config::{AppConfig, GatewayConfig};
pub use dispatcher::Dispatcher;
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use model::{
    DiscoveryRequest, DiscoveryResult, FinalizeReason, Offer, Participant, TransactionSnapshot,
    TransactionStatus,
};
pub use registry::{CapabilityMatch, CapabilityMatcher, ParticipantRegistry};
pub use store::{FinalReceiver, OfferReceipt, TransactionStore};
pub use supervisor::CompletionSupervisor;
pub use transport::{HttpTransport, Transport};

pub type TransactionId = uuid::Uuid;
pub type ParticipantId = String;
