use clap::Parser;
use deg_gateway::{
    config::ProtocolConfig,
    intent::EnergySearch,
    protocol::AckResponse,
    DiscoveryResult, TransactionSnapshot,
};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "requester")]
#[command(about = "Consumer agent that searches for energy offers through the gateway")]
struct Args {
    #[arg(short, long, default_value = "http://localhost:4030")]
    gateway: String,

    /// Delivery window, e.g. "2025-09-04 00:00-06:00"
    #[arg(short, long)]
    window: String,

    #[arg(short, long, default_value = "10.0")]
    quantity: f64,

    #[arg(short, long, default_value = "energy")]
    capability: String,

    #[arg(long, default_value = "p2pTrading-bap.com")]
    bap_id: String,

    /// Block on the gateway instead of polling for the result
    #[arg(long)]
    wait: bool,

    #[arg(long, default_value = "500")]
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let protocol = ProtocolConfig {
        subscriber_id: args.bap_id.clone(),
        subscriber_uri: format!("https://{}", args.bap_id),
        ..ProtocolConfig::default()
    };
    let envelope = EnergySearch::new(args.window.clone(), args.quantity)
        .capability(args.capability.clone())
        .build(&protocol)?;

    let client = reqwest::Client::new();
    let search_url = format!("{}/search", args.gateway);

    let result: DiscoveryResult = if args.wait {
        client
            .post(&search_url)
            .query(&[("wait", "true")])
            .json(&envelope)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?
    } else {
        let ack: AckResponse = client.post(&search_url).json(&envelope).send().await?.json().await?;
        let transaction_id = match (ack.is_ack(), ack.transaction_id) {
            (true, Some(id)) => id,
            _ => anyhow::bail!("search was not acknowledged: {:?}", ack.error),
        };
        println!("Search acknowledged, transaction {}", transaction_id);

        let transaction_url = format!("{}/transactions/{}", args.gateway, transaction_id);
        loop {
            let snapshot: TransactionSnapshot = client
                .get(&transaction_url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            if snapshot.status.is_terminal() {
                break;
            }
            println!("  {} of {} offers so far", snapshot.offers.len(), snapshot.expected.len());
            tokio::time::sleep(Duration::from_millis(args.poll_interval_ms)).await;
        }

        client
            .delete(&transaction_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?
    };

    println!("Transaction {} finished: {}", result.transaction_id, result.status);
    for offer in &result.offers {
        println!("  {} -> {}", offer.responder_id, serde_json::to_string(&offer.terms)?);
    }
    if result.offers.is_empty() {
        println!("  no offers received");
    }

    Ok(())
}
