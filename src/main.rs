//! guildwatch server binary

use std::sync::Arc;

use clap::Parser;
use log::info;

use guildwatch::client::HypixelClient;
use guildwatch::config::Config;
use guildwatch::http::{self, AppState};
use guildwatch::metrics::RollingCounters;
use guildwatch::queue::ScanQueue;
use guildwatch::scanner::Scanner;
use guildwatch::store::GuildStore;
use guildwatch::sweeper;

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(err) = run().await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::parse();

    let counters = Arc::new(RollingCounters::new());

    let db_path = config.resolve_db_path()?;
    info!("Opening guild store at {}", db_path.display());
    let store = Arc::new(GuildStore::open(&db_path)?);

    let client = Arc::new(HypixelClient::new(
        config.api_key.clone(),
        Arc::clone(&counters),
    )?);

    let scanner = Arc::new(Scanner::new(
        Arc::clone(&store),
        client,
        Arc::clone(&counters),
        config.scan_ttl_secs,
    ));

    let queue = ScanQueue::start(scanner.clone(), config.scan_rate);
    info!(
        "Scan queue started: {} calls per 60s window, TTL {}s",
        config.scan_rate, config.scan_ttl_secs
    );

    sweeper::spawn(Arc::clone(&store), queue.clone(), config.sweep_config());

    let state = AppState {
        store,
        scanner,
        queue,
        counters,
    };
    let app = http::router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
