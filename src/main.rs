//! l1-txmgr - clears stale L1 mempool entries before a driver starts
//!
//! Publishes a no-op self-transfer at the wallet's next unused nonce through
//! the fee-escalation sender and repeats until the mempool is proven clean.

use anyhow::{Context, Result};
use ethers::signers::{LocalWallet, Signer};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use l1_txmgr::config::{Settings, WalletConfig};
use l1_txmgr::metrics::MetricsServer;
use l1_txmgr::tx::clear_pending_until_clean;
use l1_txmgr::{ChainProvider, Scope, TransactionSender};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting l1-txmgr v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for sender {} on chain {}",
        settings.txmgr.name, settings.l1.chain_id
    );

    let wallet = load_wallet(&settings.wallet)?;
    info!("Using wallet {:?}", wallet.address());

    let provider = Arc::new(ChainProvider::new(settings.l1.clone())?);
    if !provider.health_check().await {
        anyhow::bail!("L1 chain {} is unreachable", provider.chain_id());
    }

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let sender = TransactionSender::new(settings.txmgr.sender_config(), provider.clone());

    // Cancel the root scope on shutdown
    let scope = Scope::new();
    let shutdown_handle = tokio::spawn({
        let scope = scope.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received, stopping...");
            scope.cancel();
        }
    });

    let result = clear_pending_until_clean(&scope, &sender, &wallet, settings.l1.chain_id).await;

    shutdown_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    match result {
        Ok(receipt) => {
            info!(
                "Mempool clear: {:?} confirmed in block {:?}",
                receipt.transaction_hash, receipt.block_number
            );
            Ok(())
        }
        Err(e) if e.is_canceled() => {
            info!("l1-txmgr stopped before the mempool was cleared");
            Ok(())
        }
        Err(e) => {
            if e.should_alert() {
                error!("Operator action required: {}", e);
            }
            Err(e).context("failed to clear pending transactions")
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,l1_txmgr=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

/// Load the signing key from the configured environment variable
fn load_wallet(config: &WalletConfig) -> Result<LocalWallet> {
    let key = std::env::var(&config.private_key_env)
        .with_context(|| format!("{} is not set", config.private_key_env))?;

    key.trim_start_matches("0x")
        .parse::<LocalWallet>()
        .map_err(|e| anyhow::anyhow!("Invalid private key: {}", e))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
