use crate::{
    error::GatewayError,
    gateway::Gateway,
    model::{DiscoveryResult, Participant, TransactionSnapshot},
    protocol::{AckResponse, OnSearchEnvelope, SearchEnvelope},
    TransactionId,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub struct ApiError(GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::UnknownTransaction(_) | GatewayError::UnknownParticipant(_) => StatusCode::NOT_FOUND,
        GatewayError::NotExpected { .. } => StatusCode::FORBIDDEN,
        GatewayError::AlreadyTransacted { .. }
        | GatewayError::DuplicateTransaction(_)
        | GatewayError::TransactionOpen(_) => StatusCode::CONFLICT,
        GatewayError::TransactionClosed { .. } => StatusCode::GONE,
        GatewayError::Validation(_) | GatewayError::Serialization(_) => StatusCode::BAD_REQUEST,
        GatewayError::DeliveryFailed { .. } | GatewayError::Network(_) => StatusCode::BAD_GATEWAY,
        GatewayError::Config(_) | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if self.0.is_callback_rejection() {
            tracing::warn!(error = %self.0, "Request rejected");
        } else if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(AckResponse::nack(&self.0))).into_response()
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct SearchParams {
    #[serde(default)]
    pub wait: bool,
}

pub fn router(gateway: Gateway) -> Router {
    Router::new()
        .route("/search", post(search))
        .route("/on_search", post(on_search))
        .route("/transactions/:transaction_id", get(get_transaction).delete(take_transaction))
        .route("/participants", post(register_participant))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(gateway)
}

async fn search(
    State(gateway): State<Gateway>,
    Query(params): Query<SearchParams>,
    Json(envelope): Json<SearchEnvelope>,
) -> Result<Response, ApiError> {
    let capability = envelope.required_capability()?;
    let request = envelope.into_discovery_request()?;

    if params.wait {
        let result: DiscoveryResult = gateway.discover_and_wait(request, &capability, None).await?;
        return Ok(Json(result).into_response());
    }

    let transaction_id = gateway.discover(request, &capability, None)?;
    Ok(Json(AckResponse::ack_transaction(transaction_id)).into_response())
}

async fn on_search(
    State(gateway): State<Gateway>,
    Json(envelope): Json<OnSearchEnvelope>,
) -> Result<Json<AckResponse>, ApiError> {
    let (transaction_id, responder_id, terms) = envelope.into_callback()?;
    gateway.submit_callback(transaction_id, &responder_id, terms)?;
    Ok(Json(AckResponse::ack_transaction(transaction_id)))
}

async fn get_transaction(
    State(gateway): State<Gateway>,
    Path(transaction_id): Path<TransactionId>,
) -> Result<Json<TransactionSnapshot>, ApiError> {
    Ok(Json(gateway.get_transaction(transaction_id)?))
}

async fn take_transaction(
    State(gateway): State<Gateway>,
    Path(transaction_id): Path<TransactionId>,
) -> Result<Json<DiscoveryResult>, ApiError> {
    Ok(Json(gateway.take_result(transaction_id)?))
}

async fn register_participant(
    State(gateway): State<Gateway>,
    Json(participant): Json<Participant>,
) -> Result<Json<AckResponse>, ApiError> {
    gateway.register(participant)?;
    Ok(Json(AckResponse::ack()))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy"}))
}
