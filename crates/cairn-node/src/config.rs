//! Node configuration for the Cairn node.
//!
//! [`NodeConfig`] has defaults for every field. [`NodeConfig::load`] layers
//! an optional TOML file and `CAIRN__*` environment variables over them,
//! e.g. `CAIRN__MEMPOOL__MAX_POOL_TXS=20000`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cairn_core::config::{ChainConfig, MempoolConfig};
use cairn_core::constants::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_METRICS_INTERVAL_SECS};

use crate::error::NodeError;

/// Configuration for a node instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Log level filter string (e.g. "info", "debug", "cairn_core=trace").
    pub log_level: String,
    /// Log output format, "text" or "json".
    pub log_format: String,
    /// Block tree settings.
    pub chain: ChainConfig,
    /// Transaction pool settings.
    pub mempool: MempoolConfig,
    /// Capacity of each service inbox and chain-update subscription.
    pub channel_capacity: usize,
    /// Seconds between pool metrics log lines.
    pub metrics_interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cairn");

        Self {
            data_dir,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            chain: ChainConfig::default(),
            mempool: MempoolConfig::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            metrics_interval_secs: DEFAULT_METRICS_INTERVAL_SECS,
        }
    }
}

impl NodeConfig {
    /// Load defaults, then `path` if it exists, then `CAIRN__*` environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, NodeError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("CAIRN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Path to the RocksDB chain data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chaindata")
    }
}
