//! Token gateway binary

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokengate_common::utils::logging::init_logging;
use tokengate_crypto::KeyPair;
use tokengate_gateway::api::{router, RouterOptions};
use tokengate_gateway::chain::{ChainClient, JsonRpcChainClient};
use tokengate_gateway::clock::SystemClock;
use tokengate_gateway::metrics::GatewayMetrics;
use tokengate_gateway::{ClaimLedger, GatewayConfig, Orchestrator};
use tokio::signal;
use tracing::{error, info, warn};

/// Token gateway CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path (TOML, YAML or JSON)
    #[arg(short, long, env = "TOKENGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Server address
    #[arg(long)]
    server_addr: Option<String>,

    /// RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Private key
    #[arg(long)]
    private_key: Option<String>,

    /// Token contract address
    #[arg(long)]
    token_contract: Option<String>,

    /// Dispense amount (minor units)
    #[arg(long)]
    dispense_amount: Option<String>,

    /// Claim window (seconds)
    #[arg(long)]
    claim_window: Option<u64>,

    /// Ledger directory
    #[arg(long)]
    db_path: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn apply(self, config: &mut GatewayConfig) {
        if let Some(addr) = self.server_addr {
            config.server_addr = addr;
        }
        if let Some(rpc_url) = self.rpc_url {
            config.rpc_url = rpc_url;
        }
        if let Some(key) = self.private_key {
            config.private_key = key;
        }
        if let Some(contract) = self.token_contract {
            config.token_contract = contract;
        }
        if let Some(amount) = self.dispense_amount {
            config.dispense_amount = amount;
        }
        if let Some(window) = self.claim_window {
            config.claim_window_secs = window;
        }
        if let Some(path) = self.db_path {
            config.db_path = path;
        }
        if self.debug {
            config.logging.level = "debug".to_string();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GatewayConfig::load(args.config.as_deref()).context("loading configuration")?;
    args.apply(&mut config);

    init_logging(&config.logging).map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    info!("Starting Tokengate v{}", env!("CARGO_PKG_VERSION"));

    let settings = config.settings()?;
    let key = KeyPair::from_private_key_hex(&config.private_key).context("loading signing key")?;

    info!("Configuration:");
    info!("  Server address: {}", config.server_addr);
    info!("  RPC URL: {}", config.rpc_url);
    info!("  Token contract: {}", settings.token_contract);
    info!("  Signer: {}", key.address());
    info!("  Dispense amount: {}", settings.dispense_amount);
    info!("  Claim window: {}s", config.claim_window_secs);

    let ledger = Arc::new(ClaimLedger::open(&config.db_path)?);
    let stats = ledger.statistics()?;
    info!("Previous statistics:");
    info!("  Total distributions: {}", stats.total_distributions);
    info!("  Unique addresses: {}", stats.unique_addresses);

    let chain: Arc<dyn ChainClient> = Arc::new(JsonRpcChainClient::new(
        config.rpc_url.clone(),
        key,
        settings.token_contract,
        config.rpc_options()?,
    )?);

    let metrics = Arc::new(GatewayMetrics::new()?);
    let orchestrator = Arc::new(Orchestrator::new(
        settings,
        ledger,
        chain,
        Arc::new(SystemClock),
        metrics,
    ));

    let app = router(
        orchestrator.clone(),
        RouterOptions {
            cors_enabled: config.cors_enabled,
            metrics_enabled: config.metrics_enabled,
        },
    );

    // Daily housekeeping
    let retention_days = config.history_retention_days;
    let housekeeping = orchestrator.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(86400));
        loop {
            interval.tick().await;
            match housekeeping.prune(retention_days).await {
                Ok(count) => info!("Pruned {} old distribution records", count),
                Err(e) => warn!("Pruning failed: {}", e),
            }
        }
    });

    let addr: SocketAddr = config.server_addr.parse().context("parsing server_addr")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down gracefully");
    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
