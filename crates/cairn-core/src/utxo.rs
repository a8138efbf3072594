//! UTXO set with apply/revert semantics.
//!
//! A [`UtxoSet`] is a working view over part of the ledger. The chain engine
//! loads exactly the entries a block touches from storage, applies or reverts
//! blocks on the view, and persists the view back in one write batch.
//!
//! Spending never deletes: an entry is flagged `is_spent` so that a reorg can
//! flip it back. Reverting a transaction deletes the outputs it created; the
//! view remembers those outpoints so that persisting removes them from
//! storage too.

use std::collections::{HashMap, HashSet};

use tracing::error;

use crate::error::{StorageError, UtxoError};
use crate::traits::{KeyValueStore, WriteBatch};
use crate::types::{Block, OutPoint, Transaction, UtxoEntry};

/// Key prefix for UTXO records.
pub const UTXO_KEY_PREFIX: u8 = b'u';

/// Anything entries can be fetched from: storage, another view, the pool.
pub trait UtxoSource {
    fn fetch_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StorageError>;
}

impl UtxoSource for UtxoSet {
    fn fetch_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StorageError> {
        Ok(self.find_utxo(outpoint).cloned())
    }
}

/// UTXO records persisted in a [`KeyValueStore`].
pub struct StoredUtxos<'a, S: KeyValueStore + ?Sized>(pub &'a S);

impl<S: KeyValueStore + ?Sized> UtxoSource for StoredUtxos<'_, S> {
    fn fetch_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StorageError> {
        let key = outpoint_key(outpoint);
        match self.0.get(&key)? {
            Some(bytes) => decode_entry(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }
}

/// Storage key for an outpoint: `b'u' || txid || vlq(index)`.
pub fn outpoint_key(outpoint: &OutPoint) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32 + 5);
    key.push(UTXO_KEY_PREFIX);
    key.extend_from_slice(outpoint.txid.as_bytes());
    put_vlq(&mut key, u64::from(outpoint.index));
    key
}

/// Append `n` as an MSB-first base-128 varint.
///
/// Each continuation step subtracts one before shifting, which removes the
/// redundant encodings a plain base-128 varint has.
fn put_vlq(out: &mut Vec<u8>, mut n: u64) {
    let start = out.len();
    let mut continuation = 0x00;
    loop {
        out.push((n & 0x7f) as u8 | continuation);
        if n <= 0x7f {
            break;
        }
        n = (n >> 7) - 1;
        continuation = 0x80;
    }
    out[start..].reverse();
}

fn encode_entry(entry: &UtxoEntry) -> Result<Vec<u8>, StorageError> {
    bincode::encode_to_vec(entry, bincode::config::standard())
        .map_err(|e| StorageError::Backend(format!("encode utxo entry: {e}")))
}

fn decode_entry(key: &[u8], bytes: &[u8]) -> Result<UtxoEntry, StorageError> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(entry, _)| entry)
        .map_err(|e| StorageError::Corrupt {
            key: hex::encode(key),
            reason: e.to_string(),
        })
}

/// A working view of UTXO entries.
#[derive(Debug, Clone, Default)]
pub struct UtxoSet {
    entries: HashMap<OutPoint, UtxoEntry>,
    /// Outpoints deleted by a revert; persisted as deletes.
    removed: HashSet<OutPoint>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, spent ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&OutPoint, &UtxoEntry)> {
        self.entries.iter()
    }

    pub fn find_utxo(&self, outpoint: &OutPoint) -> Option<&UtxoEntry> {
        self.entries.get(outpoint)
    }

    /// Whether the view already has an opinion on `outpoint`, either an
    /// entry or a deletion. Known outpoints are never re-fetched.
    fn is_known(&self, outpoint: &OutPoint) -> bool {
        self.entries.contains_key(outpoint) || self.removed.contains(outpoint)
    }

    /// Add output `index` of `tx` as a fresh unspent entry.
    pub fn add_utxo(&mut self, tx: &Transaction, index: u32, height: u64) -> Result<(), UtxoError> {
        let txid = tx.txid()?;
        let output = tx.outputs.get(index as usize).ok_or(UtxoError::OutOfBounds {
            txid,
            index,
            len: tx.outputs.len(),
        })?;
        let outpoint = OutPoint::new(txid, index);
        if self.entries.contains_key(&outpoint) {
            return Err(UtxoError::AlreadyExists(outpoint));
        }
        self.removed.remove(&outpoint);
        self.entries.insert(
            outpoint,
            UtxoEntry {
                output: output.clone(),
                block_height: height,
                is_coinbase: tx.is_coinbase(),
                is_spent: false,
            },
        );
        Ok(())
    }

    /// Mark an entry spent. Absent outpoints are ignored.
    pub fn remove_utxo(&mut self, outpoint: &OutPoint) {
        if let Some(entry) = self.entries.get_mut(outpoint) {
            entry.is_spent = true;
        }
    }

    /// Add every output of `tx`, then spend its inputs.
    pub fn apply_tx(&mut self, tx: &Transaction, height: u64) -> Result<(), UtxoError> {
        for index in 0..tx.outputs.len() as u32 {
            self.add_utxo(tx, index, height)?;
        }
        if tx.is_coinbase() {
            return Ok(());
        }
        for input in &tx.inputs {
            self.remove_utxo(&input.previous_output);
        }
        Ok(())
    }

    /// Undo [`apply_tx`](Self::apply_tx): delete the created outputs and
    /// unspend the inputs.
    ///
    /// An input with no entry means apply and revert went out of step;
    /// this is reported as [`UtxoError::MissingSpentOutput`].
    pub fn revert_tx(&mut self, tx: &Transaction) -> Result<(), UtxoError> {
        let txid = tx.txid()?;
        for outpoint in tx.output_outpoints(txid) {
            self.entries.remove(&outpoint);
            self.removed.insert(outpoint);
        }
        if tx.is_coinbase() {
            return Ok(());
        }
        for input in &tx.inputs {
            match self.entries.get_mut(&input.previous_output) {
                Some(entry) => entry.is_spent = false,
                None => {
                    error!(outpoint = %input.previous_output, %txid, "unspending a missing output");
                    return Err(UtxoError::MissingSpentOutput(input.previous_output));
                }
            }
        }
        Ok(())
    }

    pub fn apply_block(&mut self, block: &Block) -> Result<(), UtxoError> {
        for tx in &block.transactions {
            self.apply_tx(tx, block.header.height)?;
        }
        Ok(())
    }

    /// Revert in reverse order: later transactions may spend outputs of
    /// earlier ones in the same block.
    pub fn revert_block(&mut self, block: &Block) -> Result<(), UtxoError> {
        for tx in block.transactions.iter().rev() {
            self.revert_tx(tx)?;
        }
        Ok(())
    }

    /// Whether every input of `tx` resolves to an unspent entry.
    pub fn is_tx_funded(&self, tx: &Transaction) -> bool {
        if tx.is_coinbase() {
            return true;
        }
        tx.inputs.iter().all(|input| {
            self.find_utxo(&input.previous_output)
                .is_some_and(|entry| !entry.is_spent)
        })
    }

    /// Fetch the entries `tx` touches: the outputs it would create and,
    /// unless coinbase, the outputs it spends.
    pub fn load_tx_utxos<S: UtxoSource + ?Sized>(
        &mut self,
        tx: &Transaction,
        source: &S,
    ) -> Result<(), UtxoError> {
        let txid = tx.txid()?;
        let mut wanted: Vec<OutPoint> = tx.output_outpoints(txid).collect();
        if !tx.is_coinbase() {
            wanted.extend(tx.inputs.iter().map(|input| input.previous_output));
        }
        self.fetch_missing(wanted, source)
    }

    /// Fetch the entries `block` touches, skipping inputs that an earlier
    /// transaction of the same block creates.
    pub fn load_block_utxos<S: UtxoSource + ?Sized>(
        &mut self,
        block: &Block,
        source: &S,
    ) -> Result<(), UtxoError> {
        let mut created = HashSet::new();
        let mut wanted = Vec::new();
        for tx in &block.transactions {
            let txid = tx.txid()?;
            if !tx.is_coinbase() {
                wanted.extend(
                    tx.inputs
                        .iter()
                        .map(|input| input.previous_output)
                        .filter(|outpoint| !created.contains(outpoint)),
                );
            }
            for outpoint in tx.output_outpoints(txid) {
                created.insert(outpoint);
                wanted.push(outpoint);
            }
        }
        self.fetch_missing(wanted, source)
    }

    fn fetch_missing<S: UtxoSource + ?Sized>(
        &mut self,
        outpoints: Vec<OutPoint>,
        source: &S,
    ) -> Result<(), UtxoError> {
        for outpoint in outpoints {
            if self.is_known(&outpoint) {
                continue;
            }
            if let Some(entry) = source.fetch_utxo(&outpoint)? {
                self.entries.insert(outpoint, entry);
            }
        }
        Ok(())
    }

    /// Queue this view's changes into `batch`: every entry is written,
    /// every reverted output deleted.
    pub fn stage(&self, batch: &mut WriteBatch) -> Result<(), StorageError> {
        for (outpoint, entry) in &self.entries {
            batch.put(outpoint_key(outpoint), encode_entry(entry)?);
        }
        for outpoint in self.removed.iter().filter(|o| !self.entries.contains_key(o)) {
            batch.delete(outpoint_key(outpoint));
        }
        Ok(())
    }

    /// Write this view to `store` in one batch.
    pub fn persist<S: KeyValueStore + ?Sized>(&self, store: &S) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        self.stage(&mut batch)?;
        store.write_batch(batch)
    }
}
