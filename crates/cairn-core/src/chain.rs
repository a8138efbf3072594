//! Block tree with fork choice, reorganization, and orphan handling.
//!
//! [`BlockChain`] keeps every attached block in an arena keyed by hash
//! (parents referenced by hash), plus the main chain as a height-indexed list
//! of hashes ending at the tip. The longest chain wins; on equal height the
//! first-seen chain stays.
//!
//! Every block is fully validated against the UTXO state *at its parent*
//! before it is stored, whether it extends the tip, forks, or triggers a
//! reorganization. That view is built by reverting main-chain blocks down to
//! the fork point and applying the side branch on top, all in memory. A
//! reorg therefore commits in a single write batch (UTXO changes, the new
//! block, and the tip) and an invalid block leaves no trace.
//!
//! Storage layout:
//! - `b'b' || hash` → bincode [`Block`]
//! - `b"mtip"` → tip hash
//! - `b'u' || ...` → UTXO entries (see [`crate::utxo`])

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::ChainConfig;
use crate::error::{BlockError, ChainError, StorageError};
use crate::locator::height_locator;
use crate::traits::{ChainView, KeyValueStore, TxValidator, WriteBatch};
use crate::types::{Block, Hash256, OutPoint, UtxoEntry};
use crate::utxo::{StoredUtxos, UtxoSet, UtxoSource};
use crate::validation::validate_block_structure;

const BLOCK_KEY_PREFIX: u8 = b'b';
const TIP_KEY: &[u8] = b"mtip";

fn block_key(hash: &Hash256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(BLOCK_KEY_PREFIX);
    key.extend_from_slice(hash.as_bytes());
    key
}

fn encode_block(block: &Block) -> Result<Vec<u8>, StorageError> {
    bincode::encode_to_vec(block, bincode::config::standard())
        .map_err(|e| StorageError::Backend(format!("encode block: {e}")))
}

fn decode_block(key: &[u8], bytes: &[u8]) -> Result<Block, StorageError> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(block, _)| block)
        .map_err(|e| StorageError::Corrupt {
            key: hex::encode(key),
            reason: e.to_string(),
        })
}

/// A block joining or leaving the main chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainUpdate {
    pub block: Arc<Block>,
    /// `true` when connected, `false` when disconnected by a reorg.
    pub connected: bool,
}

/// Result of [`BlockChain::process_block`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// The block ended up on the main chain.
    pub is_main_chain: bool,
    /// The block was queued waiting for its parent.
    pub is_orphan: bool,
    /// Main-chain changes in the order they happened, including any caused
    /// by orphans this block unblocked.
    pub updates: Vec<ChainUpdate>,
}

/// Where a known block sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLocation {
    MainChain,
    SideChain,
    Orphan,
}

#[derive(Debug, Clone)]
struct BlockNode {
    block: Arc<Block>,
    height: u64,
}

/// The block tree and canonical UTXO state.
pub struct BlockChain<S: KeyValueStore> {
    store: S,
    validator: Arc<dyn TxValidator>,
    config: ChainConfig,
    index: HashMap<Hash256, BlockNode>,
    /// Main-chain hashes by height; the last one is the tip.
    main_chain: Vec<Hash256>,
    orphans: HashMap<Hash256, Arc<Block>>,
    /// Parent hash → orphans waiting on it.
    orphan_children: HashMap<Hash256, Vec<Hash256>>,
    /// Orphans oldest first, for eviction.
    orphan_order: VecDeque<Hash256>,
}

impl<S: KeyValueStore> BlockChain<S> {
    /// Open the chain in `store`.
    ///
    /// An empty store is initialized with `genesis`. Otherwise every stored
    /// block is reloaded and the main chain is rebuilt from the stored tip.
    pub fn open(
        store: S,
        genesis: &Block,
        validator: Arc<dyn TxValidator>,
        config: ChainConfig,
    ) -> Result<Self, ChainError> {
        let mut chain = Self {
            store,
            validator,
            config,
            index: HashMap::new(),
            main_chain: Vec::new(),
            orphans: HashMap::new(),
            orphan_children: HashMap::new(),
            orphan_order: VecDeque::new(),
        };

        match chain.store.get(TIP_KEY)? {
            None => chain.init_genesis(genesis)?,
            Some(tip) => chain.reload(&tip)?,
        }

        if chain.main_chain.first() != Some(&genesis.hash()) {
            return Err(ChainError::Invariant(
                "stored chain was built on a different genesis block".into(),
            ));
        }
        info!(height = chain.height(), tip = %chain.tip(), "chain opened");
        Ok(chain)
    }

    fn init_genesis(&mut self, genesis: &Block) -> Result<(), ChainError> {
        validate_block_structure(genesis)?;
        if genesis.height() != 0 {
            return Err(BlockError::HeightMismatch { expected: 0, got: genesis.height() }.into());
        }
        let hash = genesis.hash();
        let mut view = UtxoSet::new();
        view.apply_block(genesis)?;

        let mut batch = WriteBatch::new();
        view.stage(&mut batch)?;
        batch.put(block_key(&hash), encode_block(genesis)?);
        batch.put(TIP_KEY, hash.as_bytes().to_vec());
        self.store.write_batch(batch)?;

        self.index.insert(
            hash,
            BlockNode { block: Arc::new(genesis.clone()), height: 0 },
        );
        self.main_chain.push(hash);
        Ok(())
    }

    fn reload(&mut self, tip_bytes: &[u8]) -> Result<(), ChainError> {
        let tip = Hash256(tip_bytes.try_into().map_err(|_| StorageError::Corrupt {
            key: hex::encode(TIP_KEY),
            reason: format!("tip hash has {} bytes", tip_bytes.len()),
        })?);

        for (key, value) in self.store.scan_prefix(&[BLOCK_KEY_PREFIX])? {
            let block = decode_block(&key, &value)?;
            let height = block.height();
            self.index.insert(block.hash(), BlockNode { block: Arc::new(block), height });
        }

        let tip_height = self
            .index
            .get(&tip)
            .map(|node| node.height)
            .ok_or_else(|| ChainError::Invariant(format!("stored tip {tip} has no block")))?;
        let mut main_chain = vec![Hash256::ZERO; tip_height as usize + 1];
        let mut cursor = tip;
        for height in (0..=tip_height).rev() {
            let node = self.index.get(&cursor).ok_or_else(|| {
                ChainError::Invariant(format!("main chain broken at height {height}: {cursor} missing"))
            })?;
            main_chain[height as usize] = cursor;
            cursor = node.block.header.prev_hash;
        }
        self.main_chain = main_chain;
        debug!(blocks = self.index.len(), "reloaded block tree");
        Ok(())
    }

    pub fn tip(&self) -> Hash256 {
        self.main_chain.last().copied().unwrap_or(Hash256::ZERO)
    }

    /// Height of the longest chain.
    pub fn height(&self) -> u64 {
        self.main_chain.len().saturating_sub(1) as u64
    }

    pub fn tip_block(&self) -> Option<Arc<Block>> {
        self.block(&self.tip())
    }

    /// An attached block (main or side chain) by hash.
    pub fn block(&self, hash: &Hash256) -> Option<Arc<Block>> {
        self.index.get(hash).map(|node| node.block.clone())
    }

    /// The main-chain block at `height`.
    pub fn block_at_height(&self, height: u64) -> Option<Arc<Block>> {
        let hash = self.main_chain.get(usize::try_from(height).ok()?)?;
        self.block(hash)
    }

    pub fn block_location(&self, hash: &Hash256) -> Option<BlockLocation> {
        if let Some(node) = self.index.get(hash) {
            return Some(if self.is_main(hash, node.height) {
                BlockLocation::MainChain
            } else {
                BlockLocation::SideChain
            });
        }
        self.orphans.contains_key(hash).then_some(BlockLocation::Orphan)
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Main-chain hashes at [`height_locator`] heights, tip first.
    pub fn hash_locator(&self) -> Vec<Hash256> {
        height_locator(self.height())
            .into_iter()
            .filter_map(|h| self.main_chain.get(h as usize).copied())
            .collect()
    }

    fn is_main(&self, hash: &Hash256, height: u64) -> bool {
        self.main_chain.get(height as usize) == Some(hash)
    }

    /// Accept a block from any source.
    ///
    /// With `allow_orphan`, a block whose parent is unknown is queued until
    /// the parent arrives; otherwise it is rejected with
    /// [`ChainError::ParentUnknown`]. A rejected block changes nothing.
    ///
    /// A storage or invariant failure while attaching unblocked orphans is
    /// returned even though the block itself was stored; the failed orphan
    /// stays queued and is retried when the next block attaches.
    pub fn process_block(
        &mut self,
        block: Block,
        allow_orphan: bool,
    ) -> Result<ProcessOutcome, ChainError> {
        let hash = block.hash();
        if self.index.contains_key(&hash) || self.orphans.contains_key(&hash) {
            return Err(ChainError::AlreadyExists(hash));
        }
        validate_block_structure(&block)?;

        let block = Arc::new(block);
        let parent = block.header.prev_hash;
        if !self.index.contains_key(&parent) {
            if !allow_orphan {
                return Err(ChainError::ParentUnknown(parent));
            }
            self.add_orphan(hash, block);
            return Ok(ProcessOutcome { is_orphan: true, ..Default::default() });
        }

        let (is_main_chain, mut updates) = self.attach(hash, block)?;
        self.connect_orphans(hash, &mut updates)?;
        Ok(ProcessOutcome { is_main_chain, is_orphan: false, updates })
    }

    /// Validate and store a block whose parent is in the tree. Returns
    /// whether it became the tip, and the resulting main-chain changes.
    fn attach(
        &mut self,
        hash: Hash256,
        block: Arc<Block>,
    ) -> Result<(bool, Vec<ChainUpdate>), ChainError> {
        let parent = block.header.prev_hash;
        let parent_height = self
            .index
            .get(&parent)
            .map(|node| node.height)
            .ok_or(ChainError::ParentUnknown(parent))?;
        let height = parent_height + 1;
        if block.height() != height {
            return Err(BlockError::HeightMismatch { expected: height, got: block.height() }.into());
        }

        let (fork_height, branch) = self.branch_from_main(parent)?;
        let view = self.view_with_block(fork_height, &branch, &block)?;

        if height <= self.height() {
            self.store.put(&block_key(&hash), &encode_block(&block)?)?;
            self.index.insert(hash, BlockNode { block, height });
            debug!(%hash, height, "stored side-chain block");
            return Ok((false, Vec::new()));
        }

        let mut batch = WriteBatch::new();
        view.stage(&mut batch)?;
        batch.put(block_key(&hash), encode_block(&block)?);
        batch.put(TIP_KEY, hash.as_bytes().to_vec());
        self.store.write_batch(batch)?;

        let mut updates = Vec::new();
        for old in self.main_chain.drain(fork_height as usize + 1..).rev() {
            if let Some(node) = self.index.get(&old) {
                updates.push(ChainUpdate { block: node.block.clone(), connected: false });
            }
        }
        for side in branch {
            self.main_chain.push(side.hash());
            updates.push(ChainUpdate { block: side, connected: true });
        }
        self.main_chain.push(hash);
        self.index.insert(hash, BlockNode { block: block.clone(), height });
        updates.push(ChainUpdate { block, connected: true });

        let disconnected = updates.iter().filter(|u| !u.connected).count();
        if disconnected > 0 {
            info!(
                fork_height,
                disconnected,
                connected = updates.len() - disconnected,
                "chain reorganized"
            );
        }
        info!(height, %hash, "connected block");
        Ok((true, updates))
    }

    /// Walk from `hash` back to the main chain. Returns the fork height and
    /// the side-branch blocks above it in fork-to-tip order (empty when
    /// `hash` is itself on the main chain).
    fn branch_from_main(&self, hash: Hash256) -> Result<(u64, Vec<Arc<Block>>), ChainError> {
        let mut branch = Vec::new();
        let mut cursor = hash;
        loop {
            let node = self
                .index
                .get(&cursor)
                .ok_or_else(|| ChainError::Invariant(format!("side branch broken at {cursor}")))?;
            if self.is_main(&cursor, node.height) {
                branch.reverse();
                return Ok((node.height, branch));
            }
            branch.push(node.block.clone());
            cursor = node.block.header.prev_hash;
        }
    }

    /// Build the UTXO view at the new block's parent and connect the block
    /// onto it, validating every transaction.
    fn view_with_block(
        &self,
        fork_height: u64,
        branch: &[Arc<Block>],
        block: &Block,
    ) -> Result<UtxoSet, ChainError> {
        let source = StoredUtxos(&self.store);
        let mut view = UtxoSet::new();

        for height in (fork_height + 1..=self.height()).rev() {
            let old = self
                .block_at_height(height)
                .ok_or_else(|| ChainError::Invariant(format!("main chain missing height {height}")))?;
            view.load_block_utxos(&old, &source)?;
            view.revert_block(&old).inspect_err(|e| {
                error!(height, hash = %old.hash(), "revert failed while building view: {e}");
            })?;
        }
        for side in branch {
            view.load_block_utxos(side, &source)?;
            view.apply_block(side)?;
        }

        view.load_block_utxos(block, &source)?;
        let height = block.height();
        for (index, tx) in block.transactions.iter().enumerate() {
            if !tx.is_coinbase() {
                self.validator
                    .validate_inputs(&view, tx, height)
                    .and_then(|_| self.validator.validate_scripts(&view, tx))
                    .map_err(|source| ChainError::Transaction { index, source })?;
            }
            view.apply_tx(tx, height)?;
        }
        Ok(view)
    }

    fn add_orphan(&mut self, hash: Hash256, block: Arc<Block>) {
        while self.orphans.len() >= self.config.max_orphan_blocks.max(1) {
            let Some(oldest) = self.orphan_order.front().copied() else { break };
            debug!(%oldest, "evicting orphan block");
            self.take_orphan(&oldest);
        }
        let parent = block.header.prev_hash;
        debug!(%hash, %parent, "queued orphan block");
        self.orphan_children.entry(parent).or_default().push(hash);
        self.orphan_order.push_back(hash);
        self.orphans.insert(hash, block);
    }

    fn take_orphan(&mut self, hash: &Hash256) -> Option<Arc<Block>> {
        let block = self.orphans.remove(hash)?;
        self.orphan_order.retain(|h| h != hash);
        let parent = block.header.prev_hash;
        if let Some(siblings) = self.orphan_children.get_mut(&parent) {
            siblings.retain(|h| h != hash);
            if siblings.is_empty() {
                self.orphan_children.remove(&parent);
            }
        }
        Some(block)
    }

    /// Attach every orphan descending from `parent`, breadth first.
    ///
    /// Orphans left waiting on an attached parent by an earlier failure are
    /// retried too. Invalid orphans are dropped; any other failure puts the
    /// orphan back in the pool and stops the walk.
    fn connect_orphans(
        &mut self,
        parent: Hash256,
        updates: &mut Vec<ChainUpdate>,
    ) -> Result<(), ChainError> {
        let mut work = VecDeque::from([parent]);
        work.extend(
            self.orphan_children
                .keys()
                .filter(|p| **p != parent && self.index.contains_key(*p))
                .copied(),
        );
        while let Some(parent) = work.pop_front() {
            let children = self.orphan_children.get(&parent).cloned().unwrap_or_default();
            for child in children {
                let Some(block) = self.take_orphan(&child) else { continue };
                match self.attach(child, block.clone()) {
                    Ok((_, connected)) => {
                        updates.extend(connected);
                        work.push_back(child);
                    }
                    Err(e) if e.is_misbehavior() => {
                        warn!(hash = %child, "dropping invalid orphan block: {e}");
                    }
                    Err(e) => {
                        error!(hash = %child, "failed to attach orphan block: {e}");
                        self.add_orphan(child, block);
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }
}

impl<S: KeyValueStore> ChainView for BlockChain<S> {
    fn tip_height(&self) -> u64 {
        self.height()
    }

    fn fetch_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StorageError> {
        StoredUtxos(&self.store).fetch_utxo(outpoint)
    }
}
