//! Trait interfaces between the chain-state engine and its collaborators.
//!
//! - [`KeyValueStore`]: byte-keyed persistence (cairn-node implements with RocksDB)
//! - [`Broadcaster`]: relay to peers, fire-and-forget
//! - [`TxValidator`]: input and script validation against a UTXO view
//! - [`ChainView`]: the read-only chain surface the transaction pool consults

use std::fmt;
use std::sync::Arc;

use crate::error::{NetworkError, StorageError, TransactionError};
use crate::types::{OutPoint, Transaction, UtxoEntry};
use crate::utxo::UtxoSet;

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Ordered list of mutations applied together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(WriteOp::Delete { key: key.into() });
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Byte-keyed persistent storage.
///
/// Keys are opaque. Implementations must be safe to share across threads;
/// the chain engine is the only writer.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    fn delete(&self, key: &[u8]) -> Result<(), StorageError>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Apply a batch of mutations.
    ///
    /// The default applies ops one at a time and is not atomic; backends
    /// with native batches override it.
    fn write_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        for op in batch.iter() {
            match op {
                WriteOp::Put { key, value } => self.put(key, value)?,
                WriteOp::Delete { key } => self.delete(key)?,
            }
        }
        Ok(())
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        (**self).delete(key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        (**self).scan_prefix(prefix)
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        (**self).write_batch(batch)
    }
}

/// Kind of payload being relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Transaction,
    Block,
}

/// Opaque identifier of a connected peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Feedback about a peer's relayed data, used by the transport for scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerReport {
    GoodTransaction,
    BadTransaction,
    GoodBlock,
    BadBlock,
}

/// Outbound relay. No delivery guarantee is assumed.
pub trait Broadcaster: Send + Sync {
    /// Send a payload to every connected peer.
    fn broadcast(&self, kind: MessageType, payload: &[u8]) -> Result<(), NetworkError>;

    /// Send a payload to one peer.
    fn send_to_peer(
        &self,
        kind: MessageType,
        payload: &[u8],
        peer: &PeerId,
    ) -> Result<(), NetworkError>;

    /// Report a peer's behavior. Default: ignored.
    fn report_peer(&self, _peer: &PeerId, _report: PeerReport) {}
}

/// A broadcaster that drops everything. Useful for isolated nodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBroadcaster;

impl Broadcaster for NoopBroadcaster {
    fn broadcast(&self, _kind: MessageType, _payload: &[u8]) -> Result<(), NetworkError> {
        Ok(())
    }

    fn send_to_peer(
        &self,
        _kind: MessageType,
        _payload: &[u8],
        _peer: &PeerId,
    ) -> Result<(), NetworkError> {
        Ok(())
    }
}

/// Transaction validation against a UTXO view.
///
/// Both the chain engine (per block, at the block's height) and the pool
/// (at tip height + 1) call through this trait.
pub trait TxValidator: Send + Sync {
    /// Check funding, maturity, and value conservation. Returns the fee.
    fn validate_inputs(
        &self,
        view: &UtxoSet,
        tx: &Transaction,
        spend_height: u64,
    ) -> Result<u64, TransactionError>;

    /// Check every input's unlocking data against the output it spends.
    fn validate_scripts(&self, view: &UtxoSet, tx: &Transaction) -> Result<(), TransactionError>;
}

/// Read-only chain surface consulted by the transaction pool.
///
/// Implementations synchronize internally; callers never hold pool locks
/// across these calls.
pub trait ChainView: Send + Sync {
    /// Height of the current main-chain tip.
    fn tip_height(&self) -> u64;

    /// Look up an outpoint in the canonical UTXO state. Spent entries are
    /// returned with `is_spent` set.
    fn fetch_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StorageError>;
}
