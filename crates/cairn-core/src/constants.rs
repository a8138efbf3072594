//! Protocol and resource constants. Monetary values in base units.

pub const COIN: u64 = 100_000_000;

pub const MAX_BLOCK_SIZE: usize = 1_048_576;
pub const MAX_TX_SIZE: usize = 100_000;
pub const MAX_COINBASE_DATA: usize = 100;
pub const COINBASE_MATURITY: u64 = 100;

/// Blocks whose parent is unknown, held until the parent arrives.
pub const DEFAULT_MAX_ORPHAN_BLOCKS: usize = 256;
/// Transactions admitted to the main pool.
pub const DEFAULT_MAX_POOL_TXS: usize = 50_000;
/// Transactions waiting on unseen parents.
pub const DEFAULT_MAX_ORPHAN_TXS: usize = 1_000;

/// Inbound queue depth for the chain and pool services.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 65_536;
/// Interval between pool/chain size reports.
pub const DEFAULT_METRICS_INTERVAL_SECS: u64 = 2;

/// Leading entries of a height locator taken one block apart.
pub const LOCATOR_DENSE_STEPS: usize = 5;
