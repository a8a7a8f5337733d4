use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use deg_gateway::{
    api,
    config::{GatewayConfig, ProtocolConfig},
    error::{GatewayError, Result},
    intent::EnergySearch,
    protocol::{AckResponse, OnSearchEnvelope, SearchEnvelope},
    DiscoveryRequest, Gateway, Participant, TransactionId, TransactionSnapshot, TransactionStatus,
    Transport,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};
use tower::ServiceExt;

#[derive(Default)]
struct RecordingTransport {
    delivered: Mutex<Vec<(String, TransactionId)>>,
    unreachable: HashSet<String>,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn deliver(
        &self,
        participant: &Participant,
        _request: &DiscoveryRequest,
        transaction_id: TransactionId,
    ) -> Result<()> {
        if self.unreachable.contains(&participant.id) {
            return Err(GatewayError::DeliveryFailed {
                responder_id: participant.id.clone(),
                reason: "unreachable".to_string(),
            });
        }
        self.delivered.lock().push((participant.id.clone(), transaction_id));
        Ok(())
    }
}

fn setup_gateway(transport: RecordingTransport) -> (Gateway, Arc<RecordingTransport>) {
    let transport = Arc::new(transport);
    let config = GatewayConfig {
        fanout_timeout_ms: 5_000,
        retention_seconds: None,
        ..GatewayConfig::default()
    };
    let gateway = Gateway::new(config, transport.clone());

    gateway
        .register(Participant::new("R1", "http://localhost:9001", ["solar"]))
        .unwrap();
    gateway
        .register(Participant::new("R2", "http://localhost:9002", ["wind"]))
        .unwrap();

    (gateway, transport)
}

fn solar_request() -> DiscoveryRequest {
    DiscoveryRequest::new("consumer-1", json!({"quantity_kwh": 10, "location": "Lucknow"}))
}

#[tokio::test(start_paused = true)]
async fn test_single_responder_completes_before_deadline() {
    let (gateway, transport) = setup_gateway(RecordingTransport::default());

    let id = gateway
        .discover(solar_request(), "solar", Some(Duration::from_secs(5)))
        .unwrap();
    let snapshot = gateway.get_transaction(id).unwrap();
    assert_eq!(snapshot.expected.iter().cloned().collect::<Vec<_>>(), vec!["R1".to_string()]);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(*transport.delivered.lock(), vec![("R1".to_string(), id)]);

    gateway.submit_callback(id, "R1", json!({"price": 6.5})).unwrap();

    let result = gateway.get_result(id).unwrap();
    assert_eq!(result.status, TransactionStatus::Completed);
    assert_eq!(result.offers.len(), 1);
    assert_eq!(result.offers[0].responder_id, "R1");
    assert_eq!(result.offers[0].terms, json!({"price": 6.5}));

    // The deadline passing later must not change the outcome.
    sleep(Duration::from_secs(10)).await;
    assert_eq!(gateway.get_result(id).unwrap().status, TransactionStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_silent_responder_times_out_at_deadline() {
    let (gateway, _) = setup_gateway(RecordingTransport::default());
    let start = Instant::now();

    let result = gateway
        .discover_and_wait(solar_request(), "solar", Some(Duration::from_secs(5)))
        .await
        .unwrap();

    assert_eq!(result.status, TransactionStatus::TimedOut);
    assert!(result.offers.is_empty());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_blocking_discover_survives_immediate_retention_eviction() {
    let transport = Arc::new(RecordingTransport::default());
    let config = GatewayConfig {
        fanout_timeout_ms: 5_000,
        retention_seconds: Some(0),
        ..GatewayConfig::default()
    };
    let gateway = Gateway::new(config, transport);
    gateway
        .register(Participant::new("R1", "http://localhost:9001", ["solar"]))
        .unwrap();

    let result = gateway
        .discover_and_wait(solar_request(), "solar", Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(result.status, TransactionStatus::TimedOut);
    assert!(result.offers.is_empty());

    let empty = gateway
        .discover_and_wait(solar_request(), "hydro", None)
        .await
        .unwrap();
    assert_eq!(empty.status, TransactionStatus::Completed);

    sleep(Duration::from_millis(1)).await;
    assert!(matches!(
        gateway.get_result(result.transaction_id),
        Err(GatewayError::UnknownTransaction(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_callback_is_already_transacted() {
    let (gateway, _) = setup_gateway(RecordingTransport::default());
    let id = gateway.discover(solar_request(), "solar", None).unwrap();

    gateway.submit_callback(id, "R1", json!({"price": 6.5})).unwrap();
    let err = gateway.submit_callback(id, "R1", json!({"price": 1.0})).unwrap_err();
    assert!(matches!(err, GatewayError::AlreadyTransacted { .. }));

    let snapshot = gateway.get_transaction(id).unwrap();
    assert_eq!(snapshot.offers.len(), 1);
    assert_eq!(snapshot.offers[0].terms, json!({"price": 6.5}));
}

#[tokio::test(start_paused = true)]
async fn test_no_capability_match_completes_with_zero_offers() {
    let (gateway, transport) = setup_gateway(RecordingTransport::default());

    let result = gateway
        .discover_and_wait(solar_request(), "hydro", None)
        .await
        .unwrap();

    assert_eq!(result.status, TransactionStatus::Completed);
    assert!(result.offers.is_empty());
    assert!(transport.delivered.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_partial_offers_survive_timeout() {
    let (gateway, _) = setup_gateway(RecordingTransport {
        unreachable: HashSet::from(["R3".to_string()]),
        ..RecordingTransport::default()
    });
    gateway
        .register(Participant::new("R3", "http://localhost:9003", ["solar"]))
        .unwrap();

    let id = gateway.discover(solar_request(), "solar", None).unwrap();
    sleep(Duration::from_millis(100)).await;
    gateway.submit_callback(id, "R1", json!({"price": 7})).unwrap();

    let result = gateway.wait_for_result(id).await.unwrap();
    assert_eq!(result.status, TransactionStatus::TimedOut);
    assert_eq!(result.offers.len(), 1);

    let snapshot = gateway.get_transaction(id).unwrap();
    assert!(snapshot.missed.contains("R3"));
    assert!(matches!(
        gateway.submit_callback(id, "R3", json!({})),
        Err(GatewayError::TransactionClosed { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_callbacks_for_many_transactions() {
    let (gateway, _) = setup_gateway(RecordingTransport::default());
    for n in 0..4 {
        gateway
            .register(Participant::new(format!("S{}", n), format!("http://localhost:91{:02}", n), ["solar"]))
            .unwrap();
    }

    let ids: Vec<TransactionId> = (0..8)
        .map(|_| gateway.discover(solar_request(), "solar", Some(Duration::from_secs(30))).unwrap())
        .collect();
    let responders = ["R1", "S0", "S1", "S2", "S3"];

    let mut handles = Vec::new();
    for id in &ids {
        for responder in responders {
            for attempt in 0..3 {
                let gateway = gateway.clone();
                let id = *id;
                handles.push(tokio::spawn(async move {
                    gateway.submit_callback(id, responder, json!({ "attempt": attempt }))
                }));
            }
        }
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(GatewayError::AlreadyTransacted { .. }) => {}
            Err(e) => panic!("unexpected rejection: {}", e),
        }
    }
    assert_eq!(accepted, ids.len() * responders.len());

    for id in ids {
        let snapshot = gateway.get_transaction(id).unwrap();
        assert_eq!(snapshot.status, TransactionStatus::Completed);
        assert_eq!(snapshot.offers.len(), responders.len());
    }
}

#[tokio::test(start_paused = true)]
async fn test_take_result_evicts() {
    let (gateway, _) = setup_gateway(RecordingTransport::default());
    let id = gateway.discover(solar_request(), "solar", None).unwrap();

    assert!(matches!(gateway.take_result(id), Err(GatewayError::TransactionOpen(_))));
    gateway.submit_callback(id, "R1", json!({})).unwrap();

    let result = gateway.take_result(id).unwrap();
    assert_eq!(result.status, TransactionStatus::Completed);
    assert!(matches!(gateway.get_result(id), Err(GatewayError::UnknownTransaction(_))));
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

fn post_json(uri: &str, body: &impl serde::Serialize) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn test_http_search_and_on_search_flow() {
    let (gateway, transport) = setup_gateway(RecordingTransport::default());
    let app = api::router(gateway);

    let (status, _) = send(
        &app,
        post_json("/participants", &Participant::new("R4", "http://localhost:9004", ["solar"])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let search: SearchEnvelope = EnergySearch::new("2025-09-04 10:00-12:00", 10.0)
        .capability("solar")
        .build(&ProtocolConfig::default())
        .unwrap();
    let (status, body) = send(&app, post_json("/search", &search)).await;
    assert_eq!(status, StatusCode::OK);
    let ack: AckResponse = serde_json::from_value(body).unwrap();
    assert!(ack.is_ack());
    let id = ack.transaction_id.unwrap();

    // Duplicate message_id is rejected as a duplicate transaction.
    let (status, body) = send(&app, post_json("/search", &search)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "duplicate_transaction");

    sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.delivered.lock().len(), 2);

    let forwarded = SearchEnvelope::for_responder(
        &ProtocolConfig::default(),
        &search.clone().into_discovery_request().unwrap(),
        &Participant::new("R1", "http://localhost:9001", ["solar"]),
        id,
    );
    let reply = OnSearchEnvelope::reply_to(&forwarded, "R1", "http://localhost:9001", json!({"catalog": {}}));
    let (status, body) = send(&app, post_json("/on_search", &reply)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"]["ack"]["status"], "ACK");

    let (status, body) = send(&app, post_json("/on_search", &reply)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"]["ack"]["status"], "NACK");
    assert_eq!(body["error"]["code"], "already_transacted");

    let stranger = OnSearchEnvelope::reply_to(&forwarded, "R2", "http://localhost:9002", json!({}));
    let (status, _) = send(&app, post_json("/on_search", &stranger)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let get = Request::builder()
        .uri(format!("/transactions/{}", id))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, get).await;
    assert_eq!(status, StatusCode::OK);
    let snapshot: TransactionSnapshot = serde_json::from_value(body).unwrap();
    assert_eq!(snapshot.status, TransactionStatus::Open);
    assert_eq!(snapshot.offers.len(), 1);
}

#[tokio::test]
async fn test_http_unknown_transaction_and_bad_search() {
    let (gateway, _) = setup_gateway(RecordingTransport::default());
    let app = api::router(gateway);

    let get = Request::builder()
        .uri(format!("/transactions/{}", uuid::Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, get).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "unknown_transaction");

    let mut search = EnergySearch::new("2025-09-04", 1.0)
        .build(&ProtocolConfig::default())
        .unwrap();
    search.message = json!({"intent": {}});
    let (status, body) = send(&app, post_json("/search", &search)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation");
}

#[tokio::test]
async fn test_http_blocking_search_without_responders() {
    let (gateway, _) = setup_gateway(RecordingTransport::default());
    let app = api::router(gateway);

    let search = EnergySearch::new("2025-09-04 06:00-08:00", 5.0)
        .capability("geothermal")
        .build(&ProtocolConfig::default())
        .unwrap();
    let (status, body) = send(&app, post_json("/search?wait=true", &search)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["offers"], json!([]));
}
