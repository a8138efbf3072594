//! Pool of unconfirmed transactions with orphan resolution.
//!
//! [`TransactionPool`] admits transactions whose inputs resolve against the
//! chain or against other pool transactions. Transactions spending outputs
//! nobody has seen yet are parked in a bounded orphan pool and retried when
//! a parent is admitted.
//!
//! The pool reacts to main-chain changes: confirmed transactions leave the
//! pool (together with anything that now double-spends them), and
//! transactions from disconnected blocks are offered again.
//!
//! All index state lives behind one mutex. The mutex is never held while
//! reading chain state, so admission of a transaction runs in phases:
//! pre-checks and a snapshot of pooled parents under the lock, UTXO
//! loading and validation without it, then a re-checked insert.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::chain::ChainUpdate;
use crate::config::MempoolConfig;
use crate::error::{MempoolError, StorageError};
use crate::traits::{Broadcaster, ChainView, MessageType, TxValidator};
use crate::types::{Hash256, OutPoint, Transaction, UtxoEntry};
use crate::utxo::{UtxoSet, UtxoSource};
use crate::validation::validate_transaction_structure;

/// A pooled transaction with admission metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxWrap {
    pub tx: Transaction,
    pub txid: Hash256,
    /// Unix seconds at admission.
    pub added_timestamp: i64,
    /// Height of the block the transaction was validated for (tip + 1).
    pub height: u64,
    pub fee: u64,
    /// Serialized size in bytes.
    pub size: usize,
    /// Fee in base units per 1000 bytes.
    pub fee_per_kb: u64,
}

/// Relay policy: standardness and minimum fee.
pub trait MempoolPolicy: Send + Sync {
    /// Reject transactions this node does not relay, with a reason.
    fn check_standard(&self, tx: &Transaction, size: usize) -> Result<(), String>;

    /// Minimum fee for a transaction of `size` bytes.
    fn min_fee(&self, size: usize) -> u64;
}

/// Threshold policy driven by [`MempoolConfig`]. With default settings every
/// transaction is standard and free transactions are relayed.
#[derive(Debug, Clone)]
pub struct DefaultPolicy {
    pub min_relay_fee_per_kb: u64,
    pub max_standard_tx_size: usize,
    pub max_standard_version: u64,
}

impl DefaultPolicy {
    pub fn from_config(config: &MempoolConfig) -> Self {
        Self {
            min_relay_fee_per_kb: config.min_relay_fee_per_kb,
            max_standard_tx_size: config.max_standard_tx_size,
            max_standard_version: config.max_standard_version,
        }
    }
}

impl MempoolPolicy for DefaultPolicy {
    fn check_standard(&self, tx: &Transaction, size: usize) -> Result<(), String> {
        if tx.version > self.max_standard_version {
            return Err(format!("version {} above {}", tx.version, self.max_standard_version));
        }
        if size > self.max_standard_tx_size {
            return Err(format!("size {size} above {}", self.max_standard_tx_size));
        }
        Ok(())
    }

    fn min_fee(&self, size: usize) -> u64 {
        let fee = u128::from(self.min_relay_fee_per_kb) * size as u128 / 1000;
        fee.min(u128::from(u64::MAX)) as u64
    }
}

fn fee_per_kb(fee: u64, size: usize) -> u64 {
    if size == 0 {
        return u64::MAX;
    }
    let rate = u128::from(fee) * 1000 / size as u128;
    rate.min(u128::from(u64::MAX)) as u64
}

/// Entry lookups for admission: outputs of pooled parents first, then the chain.
struct PoolSource<'a> {
    parents: HashMap<OutPoint, UtxoEntry>,
    chain: &'a dyn ChainView,
}

impl UtxoSource for PoolSource<'_> {
    fn fetch_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StorageError> {
        match self.parents.get(outpoint) {
            Some(entry) => Ok(Some(entry.clone())),
            None => self.chain.fetch_utxo(outpoint),
        }
    }
}

#[derive(Debug, Default)]
struct PoolIndex {
    txs: HashMap<Hash256, TxWrap>,
    /// Outpoint → the pool transaction spending it. First seen wins.
    spent: HashMap<OutPoint, Hash256>,
    orphans: HashMap<Hash256, Transaction>,
    /// Outpoint → orphans spending it. Several may compete.
    orphan_spends: HashMap<OutPoint, HashSet<Hash256>>,
    /// Orphans oldest first, for eviction.
    orphan_order: VecDeque<Hash256>,
}

impl PoolIndex {
    fn insert_tx(&mut self, wrap: TxWrap) {
        for input in &wrap.tx.inputs {
            self.spent.insert(input.previous_output, wrap.txid);
        }
        self.txs.insert(wrap.txid, wrap);
    }

    fn take_tx(&mut self, txid: &Hash256) -> Option<TxWrap> {
        let wrap = self.txs.remove(txid)?;
        for input in &wrap.tx.inputs {
            if self.spent.get(&input.previous_output) == Some(txid) {
                self.spent.remove(&input.previous_output);
            }
        }
        Some(wrap)
    }

    /// Remove a transaction. With `recursive`, every pooled descendant is
    /// moved to the orphan pool, to any depth.
    fn remove_tx(&mut self, txid: &Hash256, recursive: bool, max_orphans: usize) -> Option<TxWrap> {
        let removed = self.take_tx(txid)?;
        if !recursive {
            return Some(removed);
        }

        let mut work = VecDeque::from([(removed.txid, removed.tx.outputs.len())]);
        while let Some((parent, outputs)) = work.pop_front() {
            for index in 0..outputs as u32 {
                let Some(child) = self.spent.get(&OutPoint::new(parent, index)).copied() else {
                    continue;
                };
                if let Some(wrap) = self.take_tx(&child) {
                    debug!(txid = %child, %parent, "demoting pool transaction to orphan");
                    work.push_back((child, wrap.tx.outputs.len()));
                    self.add_orphan(child, wrap.tx, max_orphans);
                }
            }
        }
        Some(removed)
    }

    /// Remove, recursively, every pool transaction spending an input of `tx`.
    fn remove_double_spend_txs(&mut self, tx: &Transaction, max_orphans: usize) {
        for input in &tx.inputs {
            if let Some(spender) = self.spent.get(&input.previous_output).copied() {
                debug!(txid = %spender, "removing pool double spend");
                self.remove_tx(&spender, true, max_orphans);
            }
        }
    }

    fn add_orphan(&mut self, txid: Hash256, tx: Transaction, max_orphans: usize) {
        if self.orphans.contains_key(&txid) {
            return;
        }
        while self.orphans.len() >= max_orphans.max(1) {
            let Some(oldest) = self.orphan_order.front().copied() else { break };
            debug!(txid = %oldest, "evicting orphan transaction");
            self.remove_orphan(&oldest);
        }
        for input in &tx.inputs {
            self.orphan_spends
                .entry(input.previous_output)
                .or_default()
                .insert(txid);
        }
        self.orphan_order.push_back(txid);
        self.orphans.insert(txid, tx);
    }

    fn remove_orphan(&mut self, txid: &Hash256) -> Option<Transaction> {
        let tx = self.orphans.remove(txid)?;
        for input in &tx.inputs {
            if let Some(spenders) = self.orphan_spends.get_mut(&input.previous_output) {
                spenders.remove(txid);
                if spenders.is_empty() {
                    self.orphan_spends.remove(&input.previous_output);
                }
            }
        }
        self.orphan_order.retain(|h| h != txid);
        Some(tx)
    }

    /// Drop every orphan spending an input of `tx`.
    fn remove_double_spend_orphans(&mut self, tx: &Transaction) {
        for input in &tx.inputs {
            let spenders: Vec<Hash256> = self
                .orphan_spends
                .get(&input.previous_output)
                .map(|s| s.iter().copied().collect())
                .unwrap_or_default();
            for orphan in spenders {
                self.remove_orphan(&orphan);
            }
        }
    }

    /// Orphans spending `outpoint`, in txid order.
    fn orphans_spending(&self, outpoint: &OutPoint) -> Vec<(Hash256, Transaction)> {
        let mut found: Vec<(Hash256, Transaction)> = self
            .orphan_spends
            .get(outpoint)
            .into_iter()
            .flatten()
            .filter_map(|id| self.orphans.get(id).map(|tx| (*id, tx.clone())))
            .collect();
        found.sort_by_key(|(id, _)| *id);
        found
    }
}

/// The transaction pool.
pub struct TransactionPool {
    chain: Arc<dyn ChainView>,
    validator: Arc<dyn TxValidator>,
    policy: Box<dyn MempoolPolicy>,
    broadcaster: Arc<dyn Broadcaster>,
    config: MempoolConfig,
    index: Mutex<PoolIndex>,
}

impl TransactionPool {
    pub fn new(
        chain: Arc<dyn ChainView>,
        validator: Arc<dyn TxValidator>,
        broadcaster: Arc<dyn Broadcaster>,
        config: MempoolConfig,
    ) -> Self {
        Self {
            chain,
            validator,
            policy: Box::new(DefaultPolicy::from_config(&config)),
            broadcaster,
            config,
            index: Mutex::new(PoolIndex::default()),
        }
    }

    /// Replace the relay policy.
    pub fn with_policy(mut self, policy: Box<dyn MempoolPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Admit `tx` and any orphans it unblocks.
    ///
    /// Returns the txids admitted, in dependency order (`tx` first).
    pub fn process_tx(
        &self,
        tx: Transaction,
        broadcast: bool,
    ) -> Result<Vec<Hash256>, MempoolError> {
        let txid = tx.txid()?;
        self.maybe_accept(&tx, txid, broadcast, true)?;
        Ok(self.process_orphans(tx, txid))
    }

    fn maybe_accept(
        &self,
        tx: &Transaction,
        txid: Hash256,
        broadcast: bool,
        detect_dup_orphan: bool,
    ) -> Result<(), MempoolError> {
        let (size, parents) = self.precheck(tx, txid, detect_dup_orphan)?;

        let source = PoolSource { parents, chain: self.chain.as_ref() };
        let mut view = UtxoSet::new();
        view.load_tx_utxos(tx, &source)?;
        if tx.output_outpoints(txid).any(|op| view.find_utxo(&op).is_some()) {
            debug!(%txid, "transaction already confirmed");
            return Err(MempoolError::AlreadyInChain(txid));
        }
        if !view.is_tx_funded(tx) {
            debug!(%txid, "stored orphan transaction");
            self.index
                .lock()
                .add_orphan(txid, tx.clone(), self.config.max_orphan_txs);
            return Err(MempoolError::OrphanTransaction(txid));
        }

        let height = self.chain.tip_height() + 1;
        let fee = self.validator.validate_inputs(&view, tx, height)?;
        self.validator.validate_scripts(&view, tx)?;
        let required = self.policy.min_fee(size);
        if fee < required {
            return Err(MempoolError::FeeTooLow { fee, required });
        }

        let wrap = TxWrap {
            tx: tx.clone(),
            txid,
            added_timestamp: chrono::Utc::now().timestamp(),
            height,
            fee,
            size,
            fee_per_kb: fee_per_kb(fee, size),
        };
        {
            let mut index = self.index.lock();
            if index.txs.contains_key(&txid) {
                return Err(MempoolError::DuplicateInPool(txid));
            }
            Self::check_pool_double_spend(&index, tx)?;
            if index.txs.len() >= self.config.max_pool_txs {
                return Err(MempoolError::PoolFull);
            }
            index.insert_tx(wrap);
        }
        debug!(%txid, fee, size, "accepted transaction");

        if broadcast {
            match tx.encode() {
                Ok(payload) => {
                    if let Err(e) = self.broadcaster.broadcast(MessageType::Transaction, &payload) {
                        debug!("failed to broadcast transaction: {e}");
                    }
                }
                Err(e) => debug!("failed to encode transaction for relay: {e}"),
            }
        }
        Ok(())
    }

    /// Context-free checks and the pool conflict check, under the lock.
    /// Returns the serialized size and the outputs of pooled parents.
    fn precheck(
        &self,
        tx: &Transaction,
        txid: Hash256,
        detect_dup_orphan: bool,
    ) -> Result<(usize, HashMap<OutPoint, UtxoEntry>), MempoolError> {
        let index = self.index.lock();
        if index.txs.contains_key(&txid) || (detect_dup_orphan && index.orphans.contains_key(&txid)) {
            debug!(%txid, "transaction already in pool");
            return Err(MempoolError::DuplicateInPool(txid));
        }
        validate_transaction_structure(tx)?;
        if tx.is_coinbase() {
            return Err(MempoolError::CoinbaseTx);
        }
        let size = tx.serialized_size()?;
        self.policy
            .check_standard(tx, size)
            .map_err(MempoolError::NonStandard)?;
        Self::check_pool_double_spend(&index, tx)?;

        let mut parents = HashMap::new();
        for input in &tx.inputs {
            let outpoint = input.previous_output;
            let Some(parent) = index.txs.get(&outpoint.txid) else { continue };
            if let Some(output) = parent.tx.outputs.get(outpoint.index as usize) {
                parents.insert(
                    outpoint,
                    UtxoEntry {
                        output: output.clone(),
                        block_height: parent.height,
                        is_coinbase: false,
                        is_spent: false,
                    },
                );
            }
        }
        Ok((size, parents))
    }

    fn check_pool_double_spend(index: &PoolIndex, tx: &Transaction) -> Result<(), MempoolError> {
        for input in &tx.inputs {
            if let Some(spender) = index.spent.get(&input.previous_output) {
                return Err(MempoolError::OutputAlreadySpent {
                    outpoint: input.previous_output,
                    spender: *spender,
                });
            }
        }
        Ok(())
    }

    /// Retry orphans spending outputs of `tx`, then of whatever gets admitted,
    /// breadth first. At most one orphan is admitted per outpoint; orphans
    /// left double-spending an admitted transaction are dropped.
    fn process_orphans(&self, tx: Transaction, txid: Hash256) -> Vec<Hash256> {
        let mut accepted = vec![(txid, tx)];
        let mut next = 0;
        while next < accepted.len() {
            let (parent_id, parent) = accepted[next].clone();
            next += 1;
            for outpoint in parent.output_outpoints(parent_id) {
                let candidates = self.index.lock().orphans_spending(&outpoint);
                for (orphan_id, orphan) in candidates {
                    match self.maybe_accept(&orphan, orphan_id, false, false) {
                        Ok(()) => {
                            self.index.lock().remove_orphan(&orphan_id);
                            accepted.push((orphan_id, orphan));
                            break;
                        }
                        Err(e) if e.is_misbehavior() => {
                            debug!(txid = %orphan_id, "dropping invalid orphan: {e}");
                            self.index.lock().remove_orphan(&orphan_id);
                        }
                        Err(e) => debug!(txid = %orphan_id, "orphan not accepted: {e}"),
                    }
                }
            }
        }

        let mut index = self.index.lock();
        for (_, tx) in &accepted {
            index.remove_double_spend_orphans(tx);
        }
        accepted.into_iter().map(|(id, _)| id).collect()
    }

    /// React to a main-chain change.
    pub fn on_chain_update(&self, update: &ChainUpdate) {
        let block = &update.block;
        if update.connected {
            info!(hash = %block.hash(), "block connected; pruning pool");
            self.remove_block_txs(update);
        } else {
            info!(hash = %block.hash(), "block disconnected; re-offering its transactions");
            for tx in block.non_coinbase() {
                if let Err(e) = self.process_tx(tx.clone(), false) {
                    debug!("disconnected transaction not re-admitted: {e}");
                }
            }
        }
    }

    fn remove_block_txs(&self, update: &ChainUpdate) {
        let max_orphans = self.config.max_orphan_txs;
        let mut confirmed = Vec::with_capacity(update.block.transactions.len());
        for tx in &update.block.transactions {
            let txid = match tx.txid() {
                Ok(txid) => txid,
                Err(e) => {
                    debug!("skipping unhashable block transaction: {e}");
                    continue;
                }
            };
            confirmed.push((txid, tx));
            if tx.is_coinbase() {
                continue;
            }
            let mut index = self.index.lock();
            // Children of a confirmed transaction stay valid.
            index.remove_tx(&txid, false, max_orphans);
            index.remove_double_spend_txs(tx, max_orphans);
            index.remove_orphan(&txid);
            index.remove_double_spend_orphans(tx);
        }

        // Outputs confirmed by the block may fund waiting orphans.
        for (txid, tx) in confirmed {
            let admitted = self.process_orphans(tx.clone(), txid);
            if admitted.len() > 1 {
                debug!(count = admitted.len() - 1, "block confirmation admitted orphans");
            }
        }
    }

    pub fn get_all_txs(&self) -> Vec<TxWrap> {
        self.index.lock().txs.values().cloned().collect()
    }

    pub fn transactions_in_pool(&self) -> Vec<Transaction> {
        self.index.lock().txs.values().map(|w| w.tx.clone()).collect()
    }

    pub fn get(&self, txid: &Hash256) -> Option<TxWrap> {
        self.index.lock().txs.get(txid).cloned()
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.index.lock().txs.contains_key(txid)
    }

    pub fn is_orphan(&self, txid: &Hash256) -> bool {
        self.index.lock().orphans.contains_key(txid)
    }

    /// Pool transaction spending `outpoint`, if any.
    pub fn spender_of(&self, outpoint: &OutPoint) -> Option<Hash256> {
        self.index.lock().spent.get(outpoint).copied()
    }

    pub fn size(&self) -> usize {
        self.index.lock().txs.len()
    }

    pub fn orphan_size(&self) -> usize {
        self.index.lock().orphans.len()
    }

    /// Pick transactions for a block body of at most `max_bytes`.
    ///
    /// Highest fee rate first, but a transaction is only picked once every
    /// pooled parent has been picked.
    pub fn select_for_block(&self, max_bytes: usize) -> Vec<Transaction> {
        let index = self.index.lock();
        let mut candidates: Vec<&TxWrap> = index.txs.values().collect();
        candidates.sort_by(|a, b| b.fee_per_kb.cmp(&a.fee_per_kb).then(a.txid.cmp(&b.txid)));

        let mut picked: HashSet<Hash256> = HashSet::new();
        let mut selected = Vec::new();
        let mut used = 0usize;
        loop {
            let mut progressed = false;
            for wrap in &candidates {
                if picked.contains(&wrap.txid) || used + wrap.size > max_bytes {
                    continue;
                }
                let ready = wrap.tx.inputs.iter().all(|input| {
                    let parent = &input.previous_output.txid;
                    !index.txs.contains_key(parent) || picked.contains(parent)
                });
                if !ready {
                    continue;
                }
                picked.insert(wrap.txid);
                used += wrap.size;
                selected.push(wrap.tx.clone());
                progressed = true;
            }
            if !progressed {
                return selected;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::error::{NetworkError, TransactionError};
    use crate::merkle;
    use crate::traits::PeerId;
    use crate::types::{Block, BlockHeader, TxInput, TxOutput};
    use crate::validation::AcceptAllScripts;

    #[derive(Default)]
    struct FakeChain {
        utxos: parking_lot::RwLock<UtxoSet>,
        height: AtomicU64,
    }

    impl FakeChain {
        fn fund(&self, tx: &Transaction) {
            self.utxos.write().apply_tx(tx, 0).unwrap();
        }
    }

    impl ChainView for FakeChain {
        fn tip_height(&self) -> u64 {
            self.height.load(Ordering::SeqCst)
        }

        fn fetch_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StorageError> {
            Ok(self.utxos.read().find_utxo(outpoint).cloned())
        }
    }

    #[derive(Default)]
    struct RecordingBroadcaster {
        sent: parking_lot::Mutex<Vec<Vec<u8>>>,
    }

    impl Broadcaster for RecordingBroadcaster {
        fn broadcast(&self, _kind: MessageType, payload: &[u8]) -> Result<(), NetworkError> {
            self.sent.lock().push(payload.to_vec());
            Ok(())
        }

        fn send_to_peer(&self, _: MessageType, _: &[u8], _: &PeerId) -> Result<(), NetworkError> {
            Ok(())
        }
    }

    struct Harness {
        chain: Arc<FakeChain>,
        relay: Arc<RecordingBroadcaster>,
        pool: TransactionPool,
    }

    fn harness_with(config: MempoolConfig) -> Harness {
        let chain = Arc::new(FakeChain::default());
        let relay = Arc::new(RecordingBroadcaster::default());
        let pool = TransactionPool::new(
            chain.clone(),
            Arc::new(AcceptAllScripts::default()),
            relay.clone(),
            config,
        );
        Harness { chain, relay, pool }
    }

    fn harness() -> Harness {
        harness_with(MempoolConfig::default())
    }

    fn funding(tag: u8, value: u64) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::new(Hash256([tag; 32]), 0),
                signature: vec![0; 64],
                public_key: vec![0; 32],
            }],
            outputs: vec![TxOutput { value, pubkey_hash: Hash256([tag; 32]) }],
            lock_time: 0,
        }
    }

    fn spend(outpoints: &[OutPoint], value: u64, lock_time: u64) -> Transaction {
        Transaction {
            version: 1,
            inputs: outpoints
                .iter()
                .map(|op| TxInput {
                    previous_output: *op,
                    signature: vec![0; 64],
                    public_key: vec![0; 32],
                })
                .collect(),
            outputs: vec![TxOutput { value, pubkey_hash: Hash256([0xCC; 32]) }],
            lock_time,
        }
    }

    fn out(tx: &Transaction) -> OutPoint {
        OutPoint::new(tx.txid().unwrap(), 0)
    }

    fn id(tx: &Transaction) -> Hash256 {
        tx.txid().unwrap()
    }

    fn block_with(txs: Vec<Transaction>) -> Arc<Block> {
        let mut all = vec![Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::null(),
                signature: vec![1],
                public_key: vec![],
            }],
            outputs: vec![TxOutput { value: 50, pubkey_hash: Hash256::ZERO }],
            lock_time: 1,
        }];
        all.extend(txs);
        Arc::new(Block {
            header: BlockHeader {
                version: 1,
                prev_hash: Hash256::ZERO,
                txs_root: merkle::txs_root(&all).unwrap(),
                context_root: Hash256::ZERO,
                timestamp: 0,
                bits: 0,
                nonce: 0,
                height: 1,
            },
            transactions: all,
        })
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    #[test]
    fn accepts_funded_transaction_and_broadcasts() {
        let h = harness();
        let f = funding(1, 1000);
        h.chain.fund(&f);
        let tx = spend(&[out(&f)], 900, 0);

        assert_eq!(h.pool.process_tx(tx.clone(), true).unwrap(), vec![id(&tx)]);
        assert_eq!(h.pool.size(), 1);
        let wrap = h.pool.get(&id(&tx)).unwrap();
        assert_eq!(wrap.fee, 100);
        assert_eq!(wrap.height, 1);
        assert_eq!(wrap.fee_per_kb, 100 * 1000 / wrap.size as u64);
        assert_eq!(h.relay.sent.lock().len(), 1);
    }

    #[test]
    fn no_broadcast_when_not_requested() {
        let h = harness();
        let f = funding(1, 1000);
        h.chain.fund(&f);
        h.pool.process_tx(spend(&[out(&f)], 900, 0), false).unwrap();
        assert!(h.relay.sent.lock().is_empty());
    }

    #[test]
    fn duplicate_is_rejected() {
        let h = harness();
        let f = funding(1, 1000);
        h.chain.fund(&f);
        let tx = spend(&[out(&f)], 900, 0);
        h.pool.process_tx(tx.clone(), false).unwrap();
        assert_eq!(
            h.pool.process_tx(tx.clone(), false).unwrap_err(),
            MempoolError::DuplicateInPool(id(&tx))
        );
        assert_eq!(h.pool.size(), 1);
    }

    #[test]
    fn coinbase_and_malformed_are_rejected() {
        let h = harness();
        let cb = block_with(vec![]).transactions[0].clone();
        assert_eq!(h.pool.process_tx(cb, false).unwrap_err(), MempoolError::CoinbaseTx);

        let mut empty = funding(1, 10);
        empty.outputs.clear();
        let err = h.pool.process_tx(empty, false).unwrap_err();
        assert_eq!(err, MempoolError::Invalid(TransactionError::EmptyInputsOrOutputs));
        assert!(err.is_misbehavior());
    }

    #[test]
    fn double_spend_rejected_first_stays() {
        let h = harness();
        let f = funding(1, 1000);
        h.chain.fund(&f);
        let first = spend(&[out(&f)], 900, 0);
        let second = spend(&[out(&f)], 800, 0);
        h.pool.process_tx(first.clone(), false).unwrap();
        assert_eq!(
            h.pool.process_tx(second, false).unwrap_err(),
            MempoolError::OutputAlreadySpent { outpoint: out(&f), spender: id(&first) }
        );
        assert!(h.pool.contains(&id(&first)));
        assert_eq!(h.pool.spender_of(&out(&f)), Some(id(&first)));
    }

    #[test]
    fn overspend_is_invalid() {
        let h = harness();
        let f = funding(1, 1000);
        h.chain.fund(&f);
        assert_eq!(
            h.pool.process_tx(spend(&[out(&f)], 1001, 0), false).unwrap_err(),
            MempoolError::Invalid(TransactionError::InsufficientFunds { have: 1000, need: 1001 })
        );
        assert_eq!(h.pool.size(), 0);
    }

    #[test]
    fn confirmed_transaction_is_already_in_chain() {
        let h = harness();
        let f = funding(1, 1000);
        h.chain.fund(&f);
        assert_eq!(
            h.pool.process_tx(f.clone(), false).unwrap_err(),
            MempoolError::AlreadyInChain(id(&f))
        );
    }

    #[test]
    fn policy_limits_apply() {
        let h = harness_with(MempoolConfig {
            min_relay_fee_per_kb: 1_000_000,
            max_standard_version: 1,
            ..MempoolConfig::default()
        });
        let f = funding(1, 1000);
        h.chain.fund(&f);

        let mut v2 = spend(&[out(&f)], 900, 0);
        v2.version = 2;
        assert!(matches!(
            h.pool.process_tx(v2, false).unwrap_err(),
            MempoolError::NonStandard(_)
        ));
        assert!(matches!(
            h.pool.process_tx(spend(&[out(&f)], 999, 0), false).unwrap_err(),
            MempoolError::FeeTooLow { fee: 1, .. }
        ));
    }

    #[test]
    fn full_pool_rejects() {
        let h = harness_with(MempoolConfig { max_pool_txs: 1, ..MempoolConfig::default() });
        let (f1, f2) = (funding(1, 1000), funding(2, 1000));
        h.chain.fund(&f1);
        h.chain.fund(&f2);
        h.pool.process_tx(spend(&[out(&f1)], 900, 0), false).unwrap();
        assert_eq!(
            h.pool.process_tx(spend(&[out(&f2)], 900, 0), false).unwrap_err(),
            MempoolError::PoolFull
        );
    }

    // ------------------------------------------------------------------
    // Orphans
    // ------------------------------------------------------------------

    #[test]
    fn orphan_admitted_when_parent_arrives() {
        let h = harness();
        let f = funding(1, 1000);
        h.chain.fund(&f);
        let t1 = spend(&[out(&f)], 900, 0);
        let t2 = spend(&[out(&t1)], 800, 0);
        let t3 = spend(&[out(&t2)], 700, 0);

        assert_eq!(
            h.pool.process_tx(t3.clone(), false).unwrap_err(),
            MempoolError::OrphanTransaction(id(&t3))
        );
        assert_eq!(
            h.pool.process_tx(t2.clone(), false).unwrap_err(),
            MempoolError::OrphanTransaction(id(&t2))
        );
        assert_eq!(
            h.pool.process_tx(t2.clone(), false).unwrap_err(),
            MempoolError::DuplicateInPool(id(&t2))
        );
        assert_eq!(h.pool.orphan_size(), 2);

        let admitted = h.pool.process_tx(t1.clone(), false).unwrap();
        assert_eq!(admitted, vec![id(&t1), id(&t2), id(&t3)]);
        assert_eq!(h.pool.size(), 3);
        assert_eq!(h.pool.orphan_size(), 0);
    }

    #[test]
    fn competing_orphans_first_wins_rest_dropped() {
        let h = harness();
        let f = funding(1, 1000);
        h.chain.fund(&f);
        let parent = spend(&[out(&f)], 900, 0);
        let a = spend(&[out(&parent)], 800, 1);
        let b = spend(&[out(&parent)], 700, 2);
        h.pool.process_tx(a.clone(), false).unwrap_err();
        h.pool.process_tx(b.clone(), false).unwrap_err();

        let admitted = h.pool.process_tx(parent.clone(), false).unwrap();
        assert_eq!(admitted.len(), 2);
        let winner = admitted[1];
        assert!(winner == id(&a) || winner == id(&b));
        assert_eq!(h.pool.orphan_size(), 0);
        assert_eq!(h.pool.size(), 2);
    }

    #[test]
    fn orphan_pool_is_bounded() {
        let h = harness_with(MempoolConfig { max_orphan_txs: 2, ..MempoolConfig::default() });
        let orphans: Vec<Transaction> = (1..=3)
            .map(|tag| spend(&[OutPoint::new(Hash256([tag; 32]), 0)], 1, 0))
            .collect();
        for o in &orphans {
            h.pool.process_tx(o.clone(), false).unwrap_err();
        }
        assert_eq!(h.pool.orphan_size(), 2);
        assert!(!h.pool.is_orphan(&id(&orphans[0])));
        assert!(h.pool.is_orphan(&id(&orphans[2])));
    }

    // ------------------------------------------------------------------
    // Chain updates
    // ------------------------------------------------------------------

    #[test]
    fn confirmed_parent_keeps_children() {
        let h = harness();
        let f = funding(1, 1000);
        h.chain.fund(&f);
        let t1 = spend(&[out(&f)], 900, 0);
        let t2 = spend(&[out(&t1)], 800, 0);
        h.pool.process_tx(t1.clone(), false).unwrap();
        h.pool.process_tx(t2.clone(), false).unwrap();

        h.chain.fund(&t1);
        h.pool.on_chain_update(&ChainUpdate { block: block_with(vec![t1.clone()]), connected: true });
        assert!(!h.pool.contains(&id(&t1)));
        assert!(h.pool.contains(&id(&t2)));
        assert_eq!(h.pool.orphan_size(), 0);
    }

    #[test]
    fn conflicting_block_demotes_descendants() {
        let h = harness();
        let f = funding(1, 1000);
        h.chain.fund(&f);
        let t1 = spend(&[out(&f)], 900, 0);
        let t2 = spend(&[out(&t1)], 800, 0);
        let t3 = spend(&[out(&t2)], 700, 0);
        for t in [&t1, &t2, &t3] {
            h.pool.process_tx(t.clone(), false).unwrap();
        }

        let rival = spend(&[out(&f)], 500, 9);
        h.chain.fund(&rival);
        h.pool.on_chain_update(&ChainUpdate { block: block_with(vec![rival]), connected: true });

        assert_eq!(h.pool.size(), 0);
        assert!(!h.pool.is_orphan(&id(&t1)));
        assert!(h.pool.is_orphan(&id(&t2)));
        assert!(h.pool.is_orphan(&id(&t3)));
    }

    #[test]
    fn block_confirmation_funds_orphans() {
        let h = harness();
        let f = funding(1, 1000);
        let t = spend(&[out(&f)], 900, 0);
        h.pool.process_tx(t.clone(), false).unwrap_err();
        h.chain.fund(&f);
        h.pool.on_chain_update(&ChainUpdate { block: block_with(vec![f]), connected: true });
        assert!(h.pool.contains(&id(&t)));
    }

    #[test]
    fn disconnected_block_transactions_return() {
        let h = harness();
        let f = funding(1, 1000);
        h.chain.fund(&f);
        let t1 = spend(&[out(&f)], 900, 0);
        let block = block_with(vec![t1.clone()]);

        // t1 leaves the chain when its block is disconnected.
        h.pool.on_chain_update(&ChainUpdate { block, connected: false });
        assert!(h.pool.contains(&id(&t1)));
        assert!(h.relay.sent.lock().is_empty());
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    #[test]
    fn selection_orders_by_fee_rate_with_parents_first() {
        let h = harness();
        let (f1, f2) = (funding(1, 10_000), funding(2, 10_000));
        h.chain.fund(&f1);
        h.chain.fund(&f2);
        let cheap_parent = spend(&[out(&f1)], 9_999, 0);
        let rich_child = spend(&[out(&cheap_parent)], 1_000, 0);
        let middle = spend(&[out(&f2)], 9_000, 0);
        for t in [&cheap_parent, &rich_child, &middle] {
            h.pool.process_tx(t.clone(), false).unwrap();
        }

        let picked: Vec<Hash256> = h.pool.select_for_block(usize::MAX).iter().map(id).collect();
        let pos = |t: &Transaction| picked.iter().position(|p| *p == id(t)).unwrap();
        assert_eq!(picked.len(), 3);
        assert!(pos(&cheap_parent) < pos(&rich_child));
        assert_eq!(picked[0], id(&middle));

        let size = h.pool.get(&id(&middle)).unwrap().size;
        assert_eq!(h.pool.select_for_block(size).len(), 1);
    }
}
