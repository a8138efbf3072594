//! Tunables for the block tree and the transaction pool.
//!
//! Both structs deserialize with `#[serde(default)]`, so a config file only
//! needs to name the fields it overrides.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MAX_ORPHAN_BLOCKS, DEFAULT_MAX_ORPHAN_TXS, DEFAULT_MAX_POOL_TXS, MAX_TX_SIZE,
};

/// Block tree configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Orphan blocks kept while waiting for their parent. Oldest evicted first.
    pub max_orphan_blocks: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_orphan_blocks: DEFAULT_MAX_ORPHAN_BLOCKS,
        }
    }
}

/// Transaction pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Transactions admitted to the main pool before `PoolFull`.
    pub max_pool_txs: usize,
    /// Orphan transactions kept. Oldest evicted first.
    pub max_orphan_txs: usize,
    /// Minimum relay fee in base units per 1000 bytes. 0 accepts free transactions.
    pub min_relay_fee_per_kb: u64,
    /// Largest serialized size considered standard.
    pub max_standard_tx_size: usize,
    /// Highest transaction version considered standard.
    pub max_standard_version: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_pool_txs: DEFAULT_MAX_POOL_TXS,
            max_orphan_txs: DEFAULT_MAX_ORPHAN_TXS,
            min_relay_fee_per_kb: 0,
            max_standard_tx_size: MAX_TX_SIZE,
            max_standard_version: u64::MAX,
        }
    }
}
