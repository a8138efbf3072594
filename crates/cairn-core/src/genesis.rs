//! Genesis block definition.
//!
//! The genesis block is height 0 with a single coinbase. Every value is
//! hardcoded, so every node computes the identical block and hash.

use std::sync::LazyLock;

use crate::constants::COIN;
use crate::merkle;
use crate::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput};

/// Genesis block timestamp: January 1, 2026 00:00:00 UTC.
pub const GENESIS_TIMESTAMP: u64 = 1_767_225_600;

/// Data embedded in the genesis coinbase input.
pub const GENESIS_MESSAGE: &[u8] = b"cairn genesis: every stone on the last one";

/// Value of the genesis coinbase output.
pub const GENESIS_REWARD: u64 = 50 * COIN;

struct GenesisData {
    block: Block,
    hash: Hash256,
    coinbase_txid: Hash256,
}

static GENESIS: LazyLock<GenesisData> = LazyLock::new(build_genesis);

fn build_genesis() -> GenesisData {
    let coinbase = Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint::null(),
            signature: GENESIS_MESSAGE.to_vec(),
            public_key: vec![],
        }],
        outputs: vec![TxOutput {
            value: GENESIS_REWARD,
            pubkey_hash: genesis_pubkey_hash(),
        }],
        lock_time: 0,
    };
    // Hardcoded coinbase; serialization cannot fail.
    let coinbase_txid = coinbase
        .txid()
        .expect("genesis coinbase is hardcoded valid data");

    let block = Block {
        header: BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            txs_root: merkle::merkle_root(&[coinbase_txid]),
            context_root: Hash256::ZERO,
            timestamp: GENESIS_TIMESTAMP,
            bits: 0,
            nonce: 0,
            height: 0,
        },
        transactions: vec![coinbase],
    };
    let hash = block.hash();

    GenesisData {
        block,
        hash,
        coinbase_txid,
    }
}

/// Owner of the genesis output: `BLAKE3(b"cairn genesis")`. Nobody holds
/// the matching key.
pub fn genesis_pubkey_hash() -> Hash256 {
    Hash256(blake3::hash(b"cairn genesis").into())
}

pub fn genesis_block() -> &'static Block {
    &GENESIS.block
}

pub fn genesis_hash() -> Hash256 {
    GENESIS.hash
}

pub fn genesis_coinbase_txid() -> Hash256 {
    GENESIS.coinbase_txid
}

pub fn is_genesis(block: &Block) -> bool {
    block.hash() == GENESIS.hash
}
