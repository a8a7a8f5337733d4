use axum::{extract::State, http::StatusCode, response::Json, routing::{get, post}, Router};
use clap::Parser;
use deg_gateway::{
    protocol::{AckResponse, OnSearchEnvelope, SearchEnvelope},
    Participant,
};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Parser, Clone)]
#[command(name = "responder")]
#[command(about = "Simulated prosumer that answers search requests with an asynchronous on_search")]
struct Args {
    #[arg(long, default_value = "bpp-solar-1")]
    id: String,

    #[arg(short, long, default_value = "9001")]
    port: u16,

    #[arg(short, long, default_value = "http://localhost:4030")]
    gateway: String,

    #[arg(long = "capability", default_values_t = vec!["energy".to_string()])]
    capabilities: Vec<String>,

    /// Price per kWh quoted in offers
    #[arg(long, default_value = "6.5")]
    price: f64,

    #[arg(long, default_value = "200")]
    min_delay_ms: u64,

    #[arg(long, default_value = "1500")]
    max_delay_ms: u64,
}

#[derive(Clone)]
struct AppState {
    args: Arc<Args>,
    client: reqwest::Client,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    anyhow::ensure!(args.min_delay_ms <= args.max_delay_ms, "min delay exceeds max delay");

    let client = reqwest::Client::new();
    let participant = Participant::new(
        args.id.clone(),
        format!("http://localhost:{}", args.port),
        args.capabilities.clone(),
    );
    let registered: AckResponse = client
        .post(format!("{}/participants", args.gateway))
        .json(&participant)
        .send()
        .await?
        .json()
        .await?;
    anyhow::ensure!(registered.is_ack(), "gateway refused registration: {:?}", registered.error);

    let state = AppState {
        args: Arc::new(args.clone()),
        client,
    };
    let app = Router::new()
        .route("/search", post(handle_search))
        .route("/health", get(health_check))
        .with_state(state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;
    tracing::info!(id = %args.id, port = args.port, "Responder listening");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_search(
    State(state): State<AppState>,
    Json(search): Json<SearchEnvelope>,
) -> Result<Json<AckResponse>, StatusCode> {
    if search.context.transaction_id.is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }

    tokio::spawn(async move {
        let delay = rand::thread_rng().gen_range(state.args.min_delay_ms..=state.args.max_delay_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        let reply = OnSearchEnvelope::reply_to(
            &search,
            &state.args.id,
            &format!("http://localhost:{}", state.args.port),
            catalog(&state.args, &search),
        );

        match state
            .client
            .post(format!("{}/on_search", state.args.gateway))
            .json(&reply)
            .send()
            .await
        {
            Ok(response) => tracing::info!(status = %response.status(), delay_ms = delay, "on_search sent"),
            Err(e) => tracing::error!("Failed to send on_search: {}", e),
        }
    });

    Ok(Json(AckResponse::ack()))
}

fn catalog(args: &Args, search: &SearchEnvelope) -> serde_json::Value {
    let quantity = search
        .message
        .pointer("/intent/item/quantity/selected/measure/value")
        .cloned()
        .unwrap_or_else(|| serde_json::json!("0"));
    let window = search
        .message
        .pointer("/intent/fulfillment/stops/0/time/range")
        .cloned()
        .unwrap_or(serde_json::Value::Null);

    serde_json::json!({
        "catalog": {
            "descriptor": { "name": args.id },
            "providers": [{
                "id": args.id,
                "items": [{
                    "descriptor": { "code": args.capabilities.first() },
                    "price": { "value": args.price.to_string(), "currency": "INR", "unit": "kWH" },
                    "quantity": { "available": { "measure": { "value": quantity, "unit": "kWH" } } },
                    "fulfillment": { "time": { "range": window } }
                }]
            }]
        }
    })
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy"}))
}
