//! Cairn node binary.
//!
//! Opens the chain in RocksDB, starts the chain and pool services, and runs
//! until Ctrl+C. Without a peer transport, relays are logged and dropped.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use cairn_core::validation::SignatureValidator;
use cairn_node_lib::node::LoggingBroadcaster;
use cairn_node_lib::{Node, NodeConfig};

/// Cairn node: block tree, UTXO set, and transaction pool.
#[derive(Parser, Debug)]
#[command(name = "cairn-node", version, about = "Cairn chain-state node")]
struct Args {
    /// TOML configuration file (missing file means defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for chain storage
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long)]
    log_format: Option<String>,

    /// Maximum transactions held in the pool
    #[arg(long)]
    max_pool_txs: Option<usize>,

    /// Minimum relay fee in base units per 1000 bytes
    #[arg(long)]
    min_relay_fee: Option<u64>,
}

impl Args {
    /// Load the file/environment configuration, then apply CLI overrides.
    fn into_config(self) -> anyhow::Result<NodeConfig> {
        let mut config = NodeConfig::load(self.config.as_deref())
            .context("failed to load configuration")?;
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if let Some(max) = self.max_pool_txs {
            config.mempool.max_pool_txs = max;
        }
        if let Some(fee) = self.min_relay_fee {
            config.mempool.min_relay_fee_per_kb = fee;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;
    init_logging(&config.log_level, &config.log_format);

    info!("Cairn node v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);

    let node = Node::start(
        config,
        Arc::new(SignatureValidator::default()),
        Arc::new(LoggingBroadcaster),
    )
    .context("failed to start node")?;

    let (height, hash) = node.chain_tip();
    info!(height, %hash, "node running (Ctrl+C to stop)");

    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl+C handler")?;
    info!("received Ctrl+C, shutting down...");

    node.shutdown().await.context("shutdown failed")?;
    info!("Cairn node shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// `RUST_LOG` takes precedence over `level_str`. Pass `format = "json"` for
/// structured JSON output; any other value gives human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
