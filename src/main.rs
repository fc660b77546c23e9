//! ledgerd: a raw-TCP RPC server backed by a durable account ledger
//!
//! Each connection carries one HTTP-like request. The request path selects a
//! registered service; the service answers with a payload, a rejection (400)
//! or a fault (500).
//!
//! Features:
//! - Account registration, login, balances and transfers
//! - Per-account snapshots plus an append-only transaction journal
//! - Self-describing endpoints (`/api/docs`, `/api/docs/all`)
//! - Configuration via CLI arguments or TOML file

use ledgerd::config::Config;
use ledgerd::ledger::Ledger;
use ledgerd::registry::ServiceRegistry;
use ledgerd::server::Server;
use ledgerd::services;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        data_dir = %config.data_dir.display(),
        max_connections = config.max_connections,
        max_request_size = config.limits.max_request_size,
        "Starting ledgerd"
    );

    let ledger = Arc::new(Ledger::open(&config.data_dir, config.opening_balance)?);
    let registry = services::register_all(ServiceRegistry::builder(), ledger).build()?;

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        runtime.worker_threads(workers.max(1));
    }
    let runtime = runtime.enable_all().build()?;

    runtime.block_on(run(config, Arc::new(registry)))
}

async fn run(
    config: Config,
    registry: Arc<ServiceRegistry>,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::new(
        config.listen,
        registry,
        config.limits,
        config.max_connections,
    );
    server.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    server.stop().await;
    Ok(())
}
