//! Node composition and service loops.
//!
//! [`Node::start`] opens the chain in RocksDB and spawns two tokio tasks.
//! The chain service is the only writer of the [`BlockChain`]; it publishes
//! every main-chain change on the [`ChainUpdateBus`]. The pool service feeds
//! relayed transactions and chain updates into the [`TransactionPool`] and
//! logs pool metrics on a timer. Both loops stop on a shared shutdown signal.
//!
//! The pool reads chain state through [`NodeChainView`], which takes the
//! chain's read lock on each call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use cairn_core::chain::{BlockChain, BlockLocation, ChainUpdate, ProcessOutcome};
use cairn_core::error::{ChainError, MempoolError, NetworkError, StorageError};
use cairn_core::genesis;
use cairn_core::mempool::{TransactionPool, TxWrap};
use cairn_core::traits::{
    Broadcaster, ChainView, KeyValueStore, MessageType, PeerId, PeerReport, TxValidator,
};
use cairn_core::types::{Block, Hash256, OutPoint, Transaction, UtxoEntry};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::storage::RocksStore;

/// A block tree shared between the chain service (writer) and readers.
pub type SharedChain<S> = Arc<RwLock<BlockChain<S>>>;

/// Adapter exposing a shared [`BlockChain`] as the pool's [`ChainView`].
///
/// Takes a read lock on each call, so pool lookups run concurrently with
/// each other and wait only while a block is being connected.
pub struct NodeChainView<S: KeyValueStore> {
    chain: SharedChain<S>,
}

impl<S: KeyValueStore> NodeChainView<S> {
    pub fn new(chain: SharedChain<S>) -> Self {
        Self { chain }
    }
}

impl<S: KeyValueStore> ChainView for NodeChainView<S> {
    fn tip_height(&self) -> u64 {
        self.chain.read().height()
    }

    fn fetch_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StorageError> {
        self.chain.read().fetch_utxo(outpoint)
    }
}

// --- Chain update bus ---

/// Handle returned by [`ChainUpdateBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// In-process publish/subscribe for [`ChainUpdate`]s.
///
/// Every subscriber has its own bounded channel and receives every update
/// in publication order. A full channel applies backpressure to the
/// publisher rather than dropping updates.
#[derive(Default)]
pub struct ChainUpdateBus {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, mpsc::Sender<ChainUpdate>)>>,
}

impl ChainUpdateBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, capacity: usize) -> (SubscriptionId, mpsc::Receiver<ChainUpdate>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.subscribers.lock().push((id, tx));
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().retain(|(sid, _)| *sid != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver `update` to every subscriber, waiting for channel capacity.
    ///
    /// Subscribers whose receiver was dropped are removed.
    pub async fn publish(&self, update: &ChainUpdate) {
        let subscribers = self.subscribers.lock().clone();
        for (id, sender) in subscribers {
            if sender.send(update.clone()).await.is_err() {
                debug!(?id, "chain update subscriber gone, removing");
                self.unsubscribe(id);
            }
        }
    }
}

// --- Broadcaster for isolated nodes ---

/// Broadcaster for a node without a transport: every relay is logged and
/// dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingBroadcaster;

impl Broadcaster for LoggingBroadcaster {
    fn broadcast(&self, kind: MessageType, payload: &[u8]) -> Result<(), NetworkError> {
        debug!(?kind, bytes = payload.len(), "broadcast (no transport)");
        Ok(())
    }

    fn send_to_peer(
        &self,
        kind: MessageType,
        payload: &[u8],
        peer: &PeerId,
    ) -> Result<(), NetworkError> {
        debug!(?kind, %peer, bytes = payload.len(), "send to peer (no transport)");
        Ok(())
    }

    fn report_peer(&self, peer: &PeerId, report: PeerReport) {
        debug!(%peer, ?report, "peer report");
    }
}

// --- Service requests ---

struct BlockRequest {
    block: Block,
    peer: Option<PeerId>,
    reply: Option<oneshot::Sender<Result<ProcessOutcome, ChainError>>>,
}

struct TxRequest {
    tx: Transaction,
    peer: Option<PeerId>,
    reply: Option<oneshot::Sender<Result<Vec<Hash256>, MempoolError>>>,
}

// --- Service loops ---

async fn run_chain_service<S: KeyValueStore + 'static>(
    chain: SharedChain<S>,
    bus: Arc<ChainUpdateBus>,
    broadcaster: Arc<dyn Broadcaster>,
    mut inbox: mpsc::Receiver<BlockRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("chain service started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let request = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            request = inbox.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let BlockRequest { block, peer, reply } = request;
        let hash = block.hash();
        // Store commits block the calling thread.
        let writer = Arc::clone(&chain);
        let result = tokio::task::spawn_blocking(move || writer.write().process_block(block, true))
            .await
            .unwrap_or_else(|e| Err(ChainError::Invariant(format!("block processing task failed: {e}"))));

        match &result {
            Ok(outcome) => {
                for update in &outcome.updates {
                    bus.publish(update).await;
                }
                if outcome.is_main_chain {
                    relay_block(&chain, broadcaster.as_ref(), &hash);
                }
                if let Some(peer) = &peer {
                    broadcaster.report_peer(peer, PeerReport::GoodBlock);
                }
            }
            Err(e) if e.is_misbehavior() => {
                warn!(%hash, "rejected invalid block: {e}");
                if let Some(peer) = &peer {
                    broadcaster.report_peer(peer, PeerReport::BadBlock);
                }
            }
            Err(ChainError::Storage(e)) => error!(%hash, "storage failure processing block: {e}"),
            Err(e) => debug!(%hash, "block not processed: {e}"),
        }

        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }
    info!("chain service stopped");
}

fn relay_block<S: KeyValueStore>(
    chain: &SharedChain<S>,
    broadcaster: &dyn Broadcaster,
    hash: &Hash256,
) {
    let Some(block) = chain.read().block(hash) else {
        return;
    };
    match bincode::encode_to_vec(block.as_ref(), bincode::config::standard()) {
        Ok(payload) => {
            if let Err(e) = broadcaster.broadcast(MessageType::Block, &payload) {
                debug!("failed to broadcast block: {e}");
            }
        }
        Err(e) => error!(%hash, "failed to encode block for relay: {e}"),
    }
}

struct PoolService {
    pool: Arc<TransactionPool>,
    bus: Arc<ChainUpdateBus>,
    subscription: SubscriptionId,
    updates: mpsc::Receiver<ChainUpdate>,
    broadcaster: Arc<dyn Broadcaster>,
    inbox: mpsc::Receiver<TxRequest>,
    metrics_interval: Duration,
}

impl PoolService {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("pool service started");
        let mut metrics = tokio::time::interval(self.metrics_interval);
        metrics.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            // Chain updates go first so admission always sees the latest tip.
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                update = self.updates.recv() => match update {
                    Some(update) => self.pool.on_chain_update(&update),
                    None => break,
                },
                request = self.inbox.recv() => match request {
                    Some(request) => handle_tx(&self.pool, self.broadcaster.as_ref(), request),
                    None => break,
                },
                _ = metrics.tick() => {
                    info!(txs = self.pool.size(), orphans = self.pool.orphan_size(), "transaction pool");
                }
            }
        }

        self.bus.unsubscribe(self.subscription);
        info!("pool service stopped");
    }
}

fn handle_tx(pool: &TransactionPool, broadcaster: &dyn Broadcaster, request: TxRequest) {
    let TxRequest { tx, peer, reply } = request;
    let result = pool.process_tx(tx, true);

    match (&result, &peer) {
        (Ok(_), Some(peer)) => broadcaster.report_peer(peer, PeerReport::GoodTransaction),
        (Err(e), Some(peer)) if e.is_misbehavior() => {
            warn!(%peer, "peer relayed invalid transaction: {e}");
            broadcaster.report_peer(peer, PeerReport::BadTransaction);
        }
        (Err(e), _) => debug!("transaction not accepted: {e}"),
        (Ok(_), None) => {}
    }

    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}

// --- Node ---

/// A running node: the chain in RocksDB, the transaction pool, and the two
/// services that own their mutation.
pub struct Node {
    config: NodeConfig,
    chain: SharedChain<RocksStore>,
    pool: Arc<TransactionPool>,
    bus: Arc<ChainUpdateBus>,
    blocks: mpsc::Sender<BlockRequest>,
    txs: mpsc::Sender<TxRequest>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Open (or initialize) the chain under `config.db_path()` and spawn the
    /// chain and pool services. Must be called within a tokio runtime.
    pub fn start(
        config: NodeConfig,
        validator: Arc<dyn TxValidator>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Result<Self, NodeError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let store = RocksStore::open(config.db_path())?;
        let chain = BlockChain::open(
            store,
            genesis::genesis_block(),
            Arc::clone(&validator),
            config.chain.clone(),
        )?;
        let chain = Arc::new(RwLock::new(chain));

        let view: Arc<dyn ChainView> = Arc::new(NodeChainView::new(Arc::clone(&chain)));
        let pool = Arc::new(TransactionPool::new(
            view,
            validator,
            Arc::clone(&broadcaster),
            config.mempool.clone(),
        ));

        let capacity = config.channel_capacity.max(1);
        let bus = Arc::new(ChainUpdateBus::new());
        // Subscribe before the chain service can publish anything.
        let (subscription, updates) = bus.subscribe(capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (blocks, block_rx) = mpsc::channel(capacity);
        let (txs, tx_rx) = mpsc::channel(capacity);

        let chain_task = tokio::spawn(run_chain_service(
            Arc::clone(&chain),
            Arc::clone(&bus),
            Arc::clone(&broadcaster),
            block_rx,
            shutdown_rx.clone(),
        ));
        let pool_service = PoolService {
            pool: Arc::clone(&pool),
            bus: Arc::clone(&bus),
            subscription,
            updates,
            broadcaster,
            inbox: tx_rx,
            metrics_interval: Duration::from_secs(config.metrics_interval_secs.max(1)),
        };
        let pool_task = tokio::spawn(pool_service.run(shutdown_rx));

        Ok(Self {
            config,
            chain,
            pool,
            bus,
            blocks,
            txs,
            shutdown,
            tasks: vec![chain_task, pool_task],
        })
    }

    // --- Inbound ---

    /// Hand a block to the chain service and wait for the outcome.
    pub async fn submit_block(
        &self,
        block: Block,
        peer: Option<PeerId>,
    ) -> Result<ProcessOutcome, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.blocks
            .send(BlockRequest { block, peer, reply: Some(reply) })
            .await
            .map_err(|_| NodeError::ServiceStopped("chain"))?;
        let result = rx.await.map_err(|_| NodeError::ServiceStopped("chain"))?;
        Ok(result?)
    }

    /// Queue a block relayed by `peer` without waiting for the outcome.
    pub async fn relay_block(&self, block: Block, peer: PeerId) -> Result<(), NodeError> {
        self.blocks
            .send(BlockRequest { block, peer: Some(peer), reply: None })
            .await
            .map_err(|_| NodeError::ServiceStopped("chain"))
    }

    /// Hand a transaction to the pool service and wait for the outcome.
    ///
    /// On success returns every txid admitted, `tx` first, followed by the
    /// orphans it unblocked.
    pub async fn submit_tx(
        &self,
        tx: Transaction,
        peer: Option<PeerId>,
    ) -> Result<Vec<Hash256>, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.txs
            .send(TxRequest { tx, peer, reply: Some(reply) })
            .await
            .map_err(|_| NodeError::ServiceStopped("pool"))?;
        let result = rx.await.map_err(|_| NodeError::ServiceStopped("pool"))?;
        Ok(result?)
    }

    /// Queue a transaction relayed by `peer` without waiting for the outcome.
    pub async fn relay_tx(&self, tx: Transaction, peer: PeerId) -> Result<(), NodeError> {
        self.txs
            .send(TxRequest { tx, peer: Some(peer), reply: None })
            .await
            .map_err(|_| NodeError::ServiceStopped("pool"))
    }

    // --- Queries ---

    /// Current chain tip as `(height, block_hash)`.
    pub fn chain_tip(&self) -> (u64, Hash256) {
        let chain = self.chain.read();
        (chain.height(), chain.tip())
    }

    pub fn get_block(&self, hash: &Hash256) -> Option<Arc<Block>> {
        self.chain.read().block(hash)
    }

    pub fn get_block_at_height(&self, height: u64) -> Option<Arc<Block>> {
        self.chain.read().block_at_height(height)
    }

    pub fn block_location(&self, hash: &Hash256) -> Option<BlockLocation> {
        self.chain.read().block_location(hash)
    }

    /// Block locator for sync, newest first.
    pub fn hash_locator(&self) -> Vec<Hash256> {
        self.chain.read().hash_locator()
    }

    /// Look up an outpoint in the canonical UTXO state.
    pub fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StorageError> {
        self.chain.read().fetch_utxo(outpoint)
    }

    /// Pool transaction and orphan counts.
    pub fn mempool_info(&self) -> (usize, usize) {
        (self.pool.size(), self.pool.orphan_size())
    }

    pub fn get_mempool_tx(&self, txid: &Hash256) -> Option<TxWrap> {
        self.pool.get(txid)
    }

    /// Pool transactions for a block of at most `max_bytes`, best fee rate
    /// first with parents ahead of children.
    pub fn block_template_txs(&self, max_bytes: usize) -> Vec<Transaction> {
        self.pool.select_for_block(max_bytes)
    }

    /// The bus carrying main-chain changes, for additional subscribers.
    pub fn chain_updates(&self) -> &ChainUpdateBus {
        &self.bus
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    // --- Shutdown ---

    /// Signal both services to stop. Requests not yet taken are discarded
    /// and their callers see [`NodeError::ServiceStopped`].
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Stop the services, wait for them to exit, and flush storage.
    pub async fn shutdown(mut self) -> Result<(), NodeError> {
        self.stop();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("service task failed: {e}");
            }
        }
        self.chain.read().store().flush()?;
        info!("node stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::genesis::GENESIS_REWARD;
    use cairn_core::merkle;
    use cairn_core::types::{BlockHeader, TxInput, TxOutput};
    use cairn_core::validation::AcceptAllScripts;

    #[derive(Default)]
    struct RecordingBroadcaster {
        broadcasts: Mutex<Vec<MessageType>>,
        reports: Mutex<Vec<PeerReport>>,
    }

    impl Broadcaster for RecordingBroadcaster {
        fn broadcast(&self, kind: MessageType, _payload: &[u8]) -> Result<(), NetworkError> {
            self.broadcasts.lock().push(kind);
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

        fn report_peer(&self, _peer: &PeerId, report: PeerReport) {
            self.reports.lock().push(report);
        }
    }

    fn test_node(dir: &tempfile::TempDir, broadcaster: Arc<RecordingBroadcaster>) -> Node {
        let config = NodeConfig {
            data_dir: dir.path().to_path_buf(),
            channel_capacity: 16,
            ..NodeConfig::default()
        };
        Node::start(config, Arc::new(AcceptAllScripts::default()), broadcaster).unwrap()
    }

    fn coinbase(height: u64) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::null(),
                signature: height.to_le_bytes().to_vec(),
                public_key: vec![],
            }],
            outputs: vec![TxOutput { value: 50, pubkey_hash: Hash256([0xAA; 32]) }],
            lock_time: height,
        }
    }

    fn spend_genesis(value: u64) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::new(genesis::genesis_coinbase_txid(), 0),
                signature: vec![0; 64],
                public_key: vec![0; 32],
            }],
            outputs: vec![TxOutput { value, pubkey_hash: Hash256([0xBB; 32]) }],
            lock_time: 0,
        }
    }

    fn child(parent: &Block, extra: Vec<Transaction>) -> Block {
        let height = parent.height() + 1;
        let mut txs = vec![coinbase(height)];
        txs.extend(extra);
        Block {
            header: BlockHeader {
                version: 1,
                prev_hash: parent.hash(),
                txs_root: merkle::txs_root(&txs).unwrap(),
                context_root: Hash256::ZERO,
                timestamp: parent.header.timestamp + 60,
                bits: 0,
                nonce: 0,
                height,
            },
            transactions: txs,
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    // ------------------------------------------------------------------
    // Chain view and bus
    // ------------------------------------------------------------------

    #[test]
    fn chain_view_reads_through_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path().join("chaindata")).unwrap();
        let chain = BlockChain::open(
            store,
            genesis::genesis_block(),
            Arc::new(AcceptAllScripts::default()),
            Default::default(),
        )
        .unwrap();
        let view = NodeChainView::new(Arc::new(RwLock::new(chain)));

        assert_eq!(view.tip_height(), 0);
        let entry = view
            .fetch_utxo(&OutPoint::new(genesis::genesis_coinbase_txid(), 0))
            .unwrap()
            .unwrap();
        assert_eq!(entry.value(), GENESIS_REWARD);
    }

    #[tokio::test]
    async fn bus_delivers_in_order_and_drops_closed_subscribers() {
        let bus = ChainUpdateBus::new();
        let (_, mut first) = bus.subscribe(4);
        let (_, second) = bus.subscribe(4);
        drop(second);

        let block = Arc::new(genesis::genesis_block().clone());
        for connected in [true, false, true] {
            bus.publish(&ChainUpdate { block: Arc::clone(&block), connected }).await;
        }

        let seen: Vec<bool> = [
            first.recv().await.unwrap(),
            first.recv().await.unwrap(),
            first.recv().await.unwrap(),
        ]
        .iter()
        .map(|u| u.connected)
        .collect();
        assert_eq!(seen, vec![true, false, true]);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn unsubscribe_removes_only_that_subscriber() {
        let bus = ChainUpdateBus::new();
        let (a, _ra) = bus.subscribe(1);
        let (_b, _rb) = bus.subscribe(1);
        bus.unsubscribe(a);
        assert_eq!(bus.subscriber_count(), 1);
    }

    // ------------------------------------------------------------------
    // Services
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn node_starts_with_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(&dir, Arc::default());
        assert_eq!(node.chain_tip(), (0, genesis::genesis_hash()));
        assert_eq!(node.mempool_info(), (0, 0));
        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn submitted_block_extends_tip_and_is_relayed() {
        let dir = tempfile::tempdir().unwrap();
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let node = test_node(&dir, Arc::clone(&broadcaster));

        let b1 = child(genesis::genesis_block(), vec![]);
        let outcome = node.submit_block(b1.clone(), Some(PeerId("p1".into()))).await.unwrap();
        assert!(outcome.is_main_chain);
        assert_eq!(node.chain_tip(), (1, b1.hash()));
        assert_eq!(*broadcaster.broadcasts.lock(), vec![MessageType::Block]);
        assert_eq!(*broadcaster.reports.lock(), vec![PeerReport::GoodBlock]);
        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn blocked_chain_writer_leaves_runtime_responsive() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(&dir, Arc::default());

        // A reader holds the chain lock from another thread, so the block
        // commit has to wait for it.
        let chain = Arc::clone(&node.chain);
        let (held_tx, held_rx) = std::sync::mpsc::channel();
        let reader = std::thread::spawn(move || {
            let _guard = chain.read();
            held_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(300));
        });
        held_rx.recv().unwrap();

        let b1 = child(genesis::genesis_block(), vec![]);
        let pending = node.submit_block(b1.clone(), None);
        tokio::pin!(pending);
        // The timer still fires on this single-threaded runtime.
        assert!(tokio::time::timeout(Duration::from_millis(50), &mut pending).await.is_err());

        reader.join().unwrap();
        assert!(pending.await.unwrap().is_main_chain);
        assert_eq!(node.chain_tip(), (1, b1.hash()));
        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_block_penalizes_peer() {
        let dir = tempfile::tempdir().unwrap();
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let node = test_node(&dir, Arc::clone(&broadcaster));

        let mut bad = child(genesis::genesis_block(), vec![]);
        bad.header.txs_root = Hash256([9; 32]);
        let err = node.submit_block(bad, Some(PeerId("p1".into()))).await.unwrap_err();
        assert!(matches!(err, NodeError::Chain(ref e) if e.is_misbehavior()));
        assert_eq!(*broadcaster.reports.lock(), vec![PeerReport::BadBlock]);
        assert_eq!(node.chain_tip().0, 0);
        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn pool_drops_transactions_confirmed_by_block() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(&dir, Arc::default());

        let tx = spend_genesis(GENESIS_REWARD - 1_000);
        let txid = tx.txid().unwrap();
        let admitted = node.submit_tx(tx.clone(), None).await.unwrap();
        assert_eq!(admitted, vec![txid]);
        assert!(node.get_mempool_tx(&txid).is_some());
        assert_eq!(node.block_template_txs(1_000_000), vec![tx.clone()]);

        let b1 = child(genesis::genesis_block(), vec![tx]);
        node.submit_block(b1, None).await.unwrap();
        wait_for(|| node.mempool_info().0 == 0).await;
        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_transaction_penalizes_peer() {
        let dir = tempfile::tempdir().unwrap();
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let node = test_node(&dir, Arc::clone(&broadcaster));

        let err = node
            .submit_tx(coinbase(7), Some(PeerId("p2".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Mempool(MempoolError::CoinbaseTx)));
        assert_eq!(*broadcaster.reports.lock(), vec![PeerReport::BadTransaction]);
        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stopped_node_acknowledges_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(&dir, Arc::default());
        node.stop();

        let err = node.submit_tx(spend_genesis(10), None).await.unwrap_err();
        assert!(matches!(err, NodeError::ServiceStopped("pool")));
        let err = node
            .submit_block(child(genesis::genesis_block(), vec![]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::ServiceStopped("chain")));
        assert_eq!(node.mempool_info(), (0, 0));
        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn pool_unsubscribes_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(&dir, Arc::default());
        assert_eq!(node.chain_updates().subscriber_count(), 1);
        let bus = Arc::clone(&node.bus);
        node.shutdown().await.unwrap();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn chain_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let b1 = child(genesis::genesis_block(), vec![]);
        {
            let node = test_node(&dir, Arc::default());
            node.submit_block(b1.clone(), None).await.unwrap();
            node.shutdown().await.unwrap();
        }
        let node = test_node(&dir, Arc::default());
        assert_eq!(node.chain_tip(), (1, b1.hash()));
        assert_eq!(node.block_location(&b1.hash()), Some(BlockLocation::MainChain));
        node.shutdown().await.unwrap();
    }
}
