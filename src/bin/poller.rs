use anyhow::Result;
use std::sync::Arc;
use tokens_bought_poller::checkpoint::FileCheckpointStore;
use tokens_bought_poller::config::Config;
use tokens_bought_poller::error_sink::JsonFileErrorSink;
use tokens_bought_poller::events::EventAbi;
use tokens_bought_poller::poller::PollCycle;
use tokens_bought_poller::registry::SqliteRegistry;
use tokens_bought_poller::repository::Database;
use tokens_bought_poller::rpc::RpcClient;
use tokens_bought_poller::scheduler::Scheduler;
use tokens_bought_poller::source::RpcEventSource;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting TokensBought poller");

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("Contract address: {:?}", config.contract_address);
    info!(
        "RPC URLs: {} endpoint(s) configured",
        config.json_rpc_urls.len()
    );
    info!(
        "Look-back window: {} blocks (~{:?}), page size {}",
        config.poll.max_look_back_blocks,
        config.look_back_estimate(),
        config.poll.max_block_range
    );

    let db = Database::new(&config.database_url)?;
    info!("Database initialized");
    let registry = SqliteRegistry::new(db);

    let client = RpcClient::new(&config.json_rpc_urls)?;
    info!("RPC client connected");

    let abi = EventAbi::load(&config.abi_path, &config.event_name)?;
    info!(
        "Watching event {} ({:?})",
        abi.name(),
        abi.selector()
    );

    let source = RpcEventSource::new(client, config.contract_address, abi);
    let checkpoint = FileCheckpointStore::new(&config.checkpoint_path);
    let error_sink = JsonFileErrorSink::new(&config.errors_path);

    let cycle = Arc::new(PollCycle::new(
        source,
        registry,
        checkpoint,
        error_sink,
        config.poll.clone(),
    ));
    let scheduler = Scheduler::new(cycle, config.poll_interval);

    scheduler
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("Poller stopped");

    Ok(())
}
