//! Error types for the Cairn chain-state engine.
use thiserror::Error;

use crate::types::{Hash256, OutPoint};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("unknown UTXO: {0}")] UnknownUtxo(String),
    #[error("output already spent: {0}")] SpentOutput(String),
    #[error("insufficient funds: have {have}, need {need}")] InsufficientFunds { have: u64, need: u64 },
    #[error("invalid signature on input {index}")] InvalidSignature { index: usize },
    #[error("duplicate input: {0}")] DuplicateInput(String),
    #[error("oversized: {size} > {max}")] OversizedTransaction { size: usize, max: usize },
    #[error("empty inputs or outputs")] EmptyInputsOrOutputs,
    #[error("value overflow")] ValueOverflow,
    #[error("invalid coinbase: {0}")] InvalidCoinbase(String),
    #[error("serialization: {0}")] Serialization(String),
    #[error("immature coinbase UTXO at input {index}")] ImmatureCoinbase { index: usize },
    #[error("zero-value output at index {0}")] ZeroValueOutput(usize),
    #[error("null outpoint in non-coinbase input {0}")] NullOutpointInRegularTx(usize),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("invalid merkle root")] InvalidMerkleRoot,
    #[error("oversized: {size} > {max}")] OversizedBlock { size: usize, max: usize },
    #[error("no coinbase")] NoCoinbase,
    #[error("first transaction is not coinbase")] FirstTxNotCoinbase,
    #[error("multiple coinbase transactions")] MultipleCoinbase,
    #[error("duplicate txid: {0}")] DuplicateTxid(String),
    #[error("height mismatch: expected {expected}, got {got}")] HeightMismatch { expected: u64, got: u64 },
    #[error("tx error in {index}: {source}")] TransactionError { index: usize, source: TransactionError },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UtxoError {
    #[error("output index {index} out of bounds for tx {txid} with {len} outputs")] OutOfBounds { txid: Hash256, index: u32, len: usize },
    #[error("utxo already exists: {0}")] AlreadyExists(OutPoint),
    #[error("unspending missing output {0}: apply/revert bookkeeping is corrupt")] MissingSpentOutput(OutPoint),
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Storage(#[from] StorageError),
}

impl UtxoError {
    /// Whether this error means the UTXO bookkeeping itself is broken.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::MissingSpentOutput(_))
    }

    /// Whether the data being applied broke a ledger rule (as opposed to
    /// local storage or bookkeeping failures).
    pub fn is_rule_violation(&self) -> bool {
        matches!(self, Self::OutOfBounds { .. } | Self::AlreadyExists(_) | Self::Transaction(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage backend: {0}")] Backend(String),
    #[error("corrupt record under key {key}: {reason}")] Corrupt { key: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("peer disconnected: {0}")] PeerDisconnected(String),
    #[error("message too large: {size}")] MessageTooLarge { size: usize },
    #[error("relay channel closed")] ChannelClosed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
    #[error("pubkey hash does not match expected")] PubkeyHashMismatch,
    #[error("input index out of bounds: {index} >= {len}")] InputIndexOutOfBounds { index: usize, len: usize },
    #[error("sighash encoding: {0}")] Encoding(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("block already known: {0}")] AlreadyExists(Hash256),
    #[error("parent block unknown: {0}")] ParentUnknown(Hash256),
    #[error("invalid block: {0}")] Block(#[from] BlockError),
    #[error("tx {index} rejected: {source}")] Transaction { index: usize, source: TransactionError },
    #[error(transparent)] Utxo(#[from] UtxoError),
    #[error(transparent)] Storage(#[from] StorageError),
    #[error("chain invariant violated: {0}")] Invariant(String),
}

impl ChainError {
    /// Whether the block was provably invalid, so the peer that relayed it
    /// should be penalized. Unknown parents and re-receipts are normal traffic.
    pub fn is_misbehavior(&self) -> bool {
        match self {
            Self::Block(_) | Self::Transaction { .. } => true,
            Self::Utxo(e) => e.is_rule_violation(),
            _ => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already in pool: {0}")] DuplicateInPool(Hash256),
    #[error("transaction already confirmed: {0}")] AlreadyInChain(Hash256),
    #[error("standalone coinbase transaction")] CoinbaseTx,
    #[error("non-standard transaction: {0}")] NonStandard(String),
    #[error("outpoint {outpoint} already spent by pool tx {spender}")] OutputAlreadySpent { outpoint: OutPoint, spender: Hash256 },
    #[error("orphan transaction: {0}")] OrphanTransaction(Hash256),
    #[error("fee too low: {fee} < {required}")] FeeTooLow { fee: u64, required: u64 },
    #[error("pool full")] PoolFull,
    #[error(transparent)] Invalid(#[from] TransactionError),
    #[error(transparent)] Utxo(#[from] UtxoError),
    #[error(transparent)] Storage(#[from] StorageError),
}

impl MempoolError {
    /// Whether the sender should be penalized for relaying this transaction.
    ///
    /// Orphans, duplicates, and pool conflicts are expected steady-state
    /// traffic; structurally invalid or unspendable transactions are not.
    pub fn is_misbehavior(&self) -> bool {
        matches!(self, Self::Invalid(_) | Self::CoinbaseTx | Self::NonStandard(_))
    }
}

#[derive(Error, Debug)]
pub enum CairnError {
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] Utxo(#[from] UtxoError),
    #[error(transparent)] Storage(#[from] StorageError),
    #[error(transparent)] Network(#[from] NetworkError),
    #[error(transparent)] Crypto(#[from] CryptoError),
    #[error(transparent)] Chain(#[from] ChainError),
    #[error(transparent)] Mempool(#[from] MempoolError),
    #[error("config: {0}")] Config(String),
}
