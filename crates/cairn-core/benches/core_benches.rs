//! Criterion benchmarks for cairn-core hot paths.
//!
//! Covers: Merkle roots, block header hashing, UTXO apply/revert of a full
//! block, block UTXO loading from a store, and height locators.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cairn_core::locator::height_locator;
use cairn_core::merkle::{merkle_root, txs_root};
use cairn_core::storage::MemoryStore;
use cairn_core::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput};
use cairn_core::utxo::{StoredUtxos, UtxoSet};

fn make_txids(n: usize) -> Vec<Hash256> {
    (0..n)
        .map(|i| Hash256(*blake3::hash(&(i as u64).to_le_bytes()).as_bytes()))
        .collect()
}

/// A funding block with `n` outputs, and a block spending each of them.
fn funding_and_spending(n: usize) -> (Block, Block) {
    let funding = Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint::null(),
            signature: vec![0],
            public_key: vec![],
        }],
        outputs: (0..n)
            .map(|i| TxOutput { value: 1_000 + i as u64, pubkey_hash: Hash256([0xAA; 32]) })
            .collect(),
        lock_time: 0,
    };
    let funding_txid = funding.txid().unwrap();
    let b0 = block(0, vec![funding]);

    let mut txs = vec![Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint::null(),
            signature: vec![1],
            public_key: vec![],
        }],
        outputs: vec![TxOutput { value: 50, pubkey_hash: Hash256([0xBB; 32]) }],
        lock_time: 1,
    }];
    txs.extend((0..n as u32).map(|i| Transaction {
        version: 1,
        inputs: vec![TxInput {
            previous_output: OutPoint::new(funding_txid, i),
            signature: vec![0; 64],
            public_key: vec![0; 32],
        }],
        outputs: vec![TxOutput { value: 900, pubkey_hash: Hash256([0xCC; 32]) }],
        lock_time: 0,
    }));
    (b0, block(1, txs))
}

fn block(height: u64, transactions: Vec<Transaction>) -> Block {
    Block {
        header: BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            txs_root: txs_root(&transactions).unwrap(),
            context_root: Hash256::ZERO,
            timestamp: 1_700_000_000,
            bits: 0,
            nonce: 0,
            height,
        },
        transactions,
    }
}

fn bench_merkle_root(c: &mut Criterion) {
    let txids = make_txids(1000);
    c.bench_function("merkle_root_1000_txids", |b| {
        b.iter(|| merkle_root(black_box(&txids)))
    });
}

fn bench_header_hash(c: &mut Criterion) {
    let (b0, _) = funding_and_spending(1);
    c.bench_function("block_header_hash", |b| b.iter(|| black_box(&b0.header).hash()));
}

fn bench_apply_revert(c: &mut Criterion) {
    let (b0, b1) = funding_and_spending(500);
    let mut base = UtxoSet::new();
    base.apply_block(&b0).unwrap();

    c.bench_function("utxo_apply_revert_500_tx_block", |b| {
        b.iter(|| {
            let mut view = base.clone();
            view.apply_block(black_box(&b1)).unwrap();
            view.revert_block(&b1).unwrap();
            view
        })
    });
}

fn bench_load_block_utxos(c: &mut Criterion) {
    let (b0, b1) = funding_and_spending(500);
    let store = MemoryStore::new();
    let mut base = UtxoSet::new();
    base.apply_block(&b0).unwrap();
    base.persist(&store).unwrap();

    c.bench_function("load_block_utxos_500_tx_block", |b| {
        b.iter(|| {
            let mut view = UtxoSet::new();
            view.load_block_utxos(black_box(&b1), &StoredUtxos(&store)).unwrap();
            view
        })
    });
}

fn bench_height_locator(c: &mut Criterion) {
    c.bench_function("height_locator_1m", |b| b.iter(|| height_locator(black_box(1_000_000))));
}

criterion_group!(
    benches,
    bench_merkle_root,
    bench_header_hash,
    bench_apply_revert,
    bench_load_block_utxos,
    bench_height_locator,
);
criterion_main!(benches);
