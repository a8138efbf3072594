//! Shared test helpers for integration tests.

use std::sync::Arc;

use parking_lot::RwLock;

use cairn_core::chain::{BlockChain, ChainUpdate};
use cairn_core::config::{ChainConfig, MempoolConfig};
use cairn_core::genesis;
use cairn_core::merkle;
use cairn_core::mempool::TransactionPool;
use cairn_core::storage::MemoryStore;
use cairn_core::traits::{KeyValueStore, NoopBroadcaster};
use cairn_core::types::*;
use cairn_core::validation::AcceptAllScripts;
use cairn_node_lib::node::{NodeChainView, SharedChain};

/// Simple pubkey hash from a seed byte.
pub fn pkh(seed: u8) -> Hash256 {
    Hash256([seed; 32])
}

/// Create a coinbase transaction unique to `height` and `tag`.
///
/// Sibling blocks at the same height use different tags so their coinbases
/// (and therefore their txids) differ.
pub fn make_coinbase(value: u64, pubkey_hash: Hash256, height: u64, tag: u8) -> Transaction {
    let mut data = height.to_le_bytes().to_vec();
    data.push(tag);
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint::null(),
            signature: data,
            public_key: vec![],
        }],
        outputs: vec![TxOutput {
            value,
            pubkey_hash,
        }],
        lock_time: height,
    }
}

/// Create a simple spending transaction (unsigned).
pub fn make_tx(inputs: Vec<OutPoint>, outputs: Vec<(u64, Hash256)>) -> Transaction {
    Transaction {
        version: 1,
        inputs: inputs
            .into_iter()
            .map(|op| TxInput {
                previous_output: op,
                signature: vec![0; 64],
                public_key: vec![0; 32],
            })
            .collect(),
        outputs: outputs
            .into_iter()
            .map(|(value, pubkey_hash)| TxOutput { value, pubkey_hash })
            .collect(),
        lock_time: 0,
    }
}

/// Create a child of `parent` with a tagged coinbase followed by `txs`.
pub fn make_block(parent: &Block, tag: u8, txs: Vec<Transaction>) -> Block {
    let height = parent.height() + 1;
    let mut transactions = vec![make_coinbase(50, pkh(0xAA), height, tag)];
    transactions.extend(txs);
    Block {
        header: BlockHeader {
            version: 1,
            prev_hash: parent.hash(),
            txs_root: merkle::txs_root(&transactions).unwrap(),
            context_root: Hash256::ZERO,
            timestamp: parent.header.timestamp + 60 + u64::from(tag),
            bits: 0,
            nonce: 0,
            height,
        },
        transactions,
    }
}

/// A chain of `len` coinbase-only blocks on top of `parent`, all tagged `tag`.
pub fn make_branch(parent: &Block, tag: u8, len: usize) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::with_capacity(len);
    for _ in 0..len {
        let next = make_block(blocks.last().unwrap_or(parent), tag, vec![]);
        blocks.push(next);
    }
    blocks
}

/// The genesis coinbase output, spendable immediately under
/// [`AcceptAllScripts`].
pub fn genesis_outpoint() -> OutPoint {
    OutPoint::new(genesis::genesis_coinbase_txid(), 0)
}

/// Open a chain over `store` with no script or maturity checks.
pub fn open_chain<S: KeyValueStore>(store: S) -> BlockChain<S> {
    BlockChain::open(
        store,
        genesis::genesis_block(),
        Arc::new(AcceptAllScripts::default()),
        ChainConfig::default(),
    )
    .unwrap()
}

/// A shared in-memory chain plus a pool reading it, wired like the node
/// wires them but driven synchronously.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub chain: SharedChain<Arc<MemoryStore>>,
    pub pool: TransactionPool,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(MempoolConfig::default())
    }

    pub fn with_config(config: MempoolConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let chain = Arc::new(RwLock::new(open_chain(Arc::clone(&store))));
        let pool = TransactionPool::new(
            Arc::new(NodeChainView::new(Arc::clone(&chain))),
            Arc::new(AcceptAllScripts::default()),
            Arc::new(NoopBroadcaster),
            config,
        );
        Self { store, chain, pool }
    }

    /// Process `block` and feed every resulting chain update to the pool.
    pub fn connect(&self, block: Block) -> Vec<ChainUpdate> {
        let outcome = self.chain.write().process_block(block, true).unwrap();
        for update in &outcome.updates {
            self.pool.on_chain_update(update);
        }
        outcome.updates
    }

    pub fn tip(&self) -> Arc<Block> {
        self.chain.read().tip_block().unwrap()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
