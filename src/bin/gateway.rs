use clap::Parser;
use deg_gateway::{api, config::AppConfig, logging, Gateway, HttpTransport};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "Discovery gateway correlating search requests with asynchronous on_search callbacks")]
struct Args {
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Write a default configuration to --config and exit
    #[arg(long)]
    init: bool,

    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.init {
        deg_gateway::config::create_default_config_file(&args.config)?;
        println!("Wrote default configuration to {}", args.config.display());
        return Ok(());
    }

    let mut config = if args.config.exists() {
        AppConfig::load_with_env_overrides(&args.config)?
    } else {
        AppConfig::default()
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    logging::init(&config.logging);

    let transport = HttpTransport::new(config.protocol.clone(), config.gateway.delivery_timeout())?;
    let gateway = Gateway::new(config.gateway.clone(), Arc::new(transport));
    for participant in config.participants.iter().cloned() {
        gateway.register(participant)?;
    }

    let app = api::router(gateway);
    let address = config.get_server_address();
    let listener = TcpListener::bind(&address).await?;
    tracing::info!(
        %address,
        participants = config.participants.len(),
        fanout_timeout_ms = config.gateway.fanout_timeout_ms,
        "Gateway listening"
    );

    axum::serve(listener, app).await?;

    Ok(())
}
