//! The node service: one shared ledger plus the contract registry, peers and
//! snapshot store, exposing every operation the route layer needs.

use crate::blockchain::{Block, Blockchain};
use crate::config::Config;
use crate::consensus::ConsensusResolver;
use crate::contract::{ChainSnapshotView, ContractOutcome, ContractRegistry, LedgerReader, SmartContract};
use crate::error::ChainError;
use crate::miner;
use crate::network::{ChainResponse, NetworkNode, PeerClient};
use crate::persistence::{JsonFileStore, SnapshotStore};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// How often `mine` re-solves after the tip moved under it before giving up.
const MAX_MINING_ATTEMPTS: usize = 3;

/// Install the fmt subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_target(true).try_init();
}

pub struct Node {
    config: Config,
    ledger: Arc<RwLock<Blockchain>>,
    network: NetworkNode,
    consensus: ConsensusResolver,
    contracts: Arc<Mutex<ContractRegistry>>,
    store: Arc<dyn SnapshotStore>,
    mining: Mutex<()>,
    saving: Mutex<()>,
}

impl Node {
    pub fn new(config: Config, peers: Arc<dyn PeerClient>, store: Arc<dyn SnapshotStore>) -> Self {
        let network = NetworkNode::new(peers, config.network.node_timeout());
        Self {
            ledger: Arc::new(RwLock::new(Blockchain::new(config.chain.clone()))),
            consensus: ConsensusResolver::new(network.clone()),
            network,
            contracts: Arc::new(Mutex::new(ContractRegistry::new(config.contracts.clone()))),
            store,
            mining: Mutex::new(()),
            saving: Mutex::new(()),
            config,
        }
    }

    /// Validate `config`, open the JSON snapshot it names and restore from it.
    /// An unreadable snapshot is logged and the node starts from genesis.
    pub async fn open(config: Config, peers: Arc<dyn PeerClient>) -> Result<Self, ChainError> {
        config.validate()?;
        let store = Arc::new(JsonFileStore::new(&config.storage.chain_file));
        let node = Self::new(config, peers, store);
        if let Err(e) = node.load_chain().await {
            warn!("Error loading blockchain from memory, starting fresh: {}", e);
        }
        info!(
            difficulty = node.config.chain.difficulty,
            blocks = node.ledger.read().await.len(),
            "Node ready"
        );
        Ok(node)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared ledger. Writers must hold the lock for the whole mutation.
    pub fn ledger(&self) -> &Arc<RwLock<Blockchain>> {
        &self.ledger
    }

    /// Save the current ledger. Saves are serialized from snapshot to disk so
    /// an older snapshot never overwrites a newer one.
    async fn persist(&self) {
        let _saving = self.saving.lock().await;
        let snapshot = self.ledger.read().await.snapshot();
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to save chain: {}", e),
            Err(e) => error!("Save task failed: {}", e),
        }
    }

    // ------------------------------------------------------------------------
    // Ledger
    // ------------------------------------------------------------------------

    /// Solve the puzzle on the current tip, credit `miner_address` with the
    /// block reward plus pending gas and append the block.
    pub async fn mine(&self, miner_address: &str) -> Result<Block, ChainError> {
        self.mine_with(miner_address, Arc::new(miner::solve)).await
    }

    /// `mine` with the proof search supplied by the caller. `solve` runs on a
    /// blocking worker.
    async fn mine_with(
        &self,
        miner_address: &str,
        solve: Arc<dyn Fn(u64, usize) -> u64 + Send + Sync>,
    ) -> Result<Block, ChainError> {
        if miner_address.trim().is_empty() {
            return Err(ChainError::InvalidField("miner_address".to_string()));
        }
        let _mining = self.mining.lock().await;

        for attempt in 1..=MAX_MINING_ATTEMPTS {
            let (prev_proof, prev_hash, difficulty) = {
                let ledger = self.ledger.read().await;
                let prev = ledger.get_prev_block();
                (prev.proof, prev.hash()?, ledger.difficulty())
            };

            let solve = Arc::clone(&solve);
            let proof = tokio::task::spawn_blocking(move || solve(prev_proof, difficulty))
                .await
                .map_err(|e| ChainError::Internal(format!("mining task failed: {}", e)))?;

            let mut ledger = self.ledger.write().await;
            let tip = ledger.get_prev_block();
            if tip.proof != prev_proof || tip.hash()? != prev_hash {
                debug!(attempt, "Chain tip changed while mining, retrying");
                continue;
            }

            let reward = ledger.params().block_reward + ledger.mempool().total_gas();
            ledger.queue_reward(miner_address, reward)?;
            let block = ledger.create_block(proof, prev_hash);
            drop(ledger);

            info!(index = block.index, miner = miner_address, "Block mined successfully");
            self.persist().await;
            return Ok(block);
        }

        warn!("Giving up mining after {} stale attempts", MAX_MINING_ATTEMPTS);
        Err(ChainError::StaleTip)
    }

    /// Queue a transfer and hand it to every peer. Returns the index of the
    /// block expected to include it.
    pub async fn submit_transaction(
        &self,
        sender: &str,
        receiver: &str,
        amount: f64,
    ) -> Result<u64, ChainError> {
        let (tx, index, peers) = {
            let mut ledger = self.ledger.write().await;
            let tx = ledger.accept_transaction(sender, receiver, amount)?;
            (tx, ledger.next_index(), ledger.nodes().to_vec())
        };

        if !tx.is_system() && !peers.is_empty() {
            let delivered = self.network.broadcast_transaction(peers, &tx).await;
            debug!(delivered, "Transaction broadcast finished");
        }
        self.persist().await;
        Ok(index)
    }

    pub async fn register_node(&self, address: &str) -> Result<String, ChainError> {
        let location = self.ledger.write().await.add_node(address)?;
        self.persist().await;
        Ok(location)
    }

    /// Register every address, stopping at the first invalid one. Returns the
    /// full sorted peer list.
    pub async fn register_nodes(&self, addresses: &[String]) -> Result<Vec<String>, ChainError> {
        let outcome = {
            let mut ledger = self.ledger.write().await;
            addresses
                .iter()
                .try_for_each(|address| ledger.add_node(address).map(drop))
        };
        self.persist().await;
        outcome?;
        Ok(self.nodes().await)
    }

    pub async fn nodes(&self) -> Vec<String> {
        let mut nodes = self.ledger.read().await.nodes().to_vec();
        nodes.sort();
        nodes
    }

    pub async fn get_chain(&self) -> ChainResponse {
        let ledger = self.ledger.read().await;
        ChainResponse {
            chain: ledger.chain().to_vec(),
            length: ledger.len(),
        }
    }

    pub async fn pending_transactions(&self) -> usize {
        self.ledger.read().await.mempool().len()
    }

    /// Adopt the first strictly longer valid chain among the peers.
    pub async fn replace_chain(&self) -> bool {
        let replaced = self.consensus.replace_chain(&self.ledger).await;
        self.persist().await;
        replaced
    }

    pub async fn is_valid(&self) -> bool {
        self.ledger.read().await.is_chain_valid(None)
    }

    pub async fn get_balance(&self, user: &str) -> f64 {
        self.ledger.read().await.get_user_balance(user)
    }

    /// Restore from the snapshot store. `Ok(false)` means nothing was saved
    /// yet and the ledger is left as it is.
    pub async fn load_chain(&self) -> Result<bool, ChainError> {
        let store = Arc::clone(&self.store);
        let loaded = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| ChainError::Internal(format!("load task failed: {}", e)))??;

        let Some(snapshot) = loaded else {
            return Ok(false);
        };
        self.ledger.write().await.restore(snapshot)?;
        self.persist().await;
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Contracts
    // ------------------------------------------------------------------------

    pub async fn deploy_contract(&self, code: &str, owner: &str) -> Result<String, ChainError> {
        self.contracts.lock().await.deploy(code, owner)
    }

    /// Run a deployed contract against a snapshot of the chain taken now.
    pub async fn execute_contract(
        &self,
        address: &str,
        params: Map<String, Value>,
    ) -> Result<ContractOutcome, ChainError> {
        let view: Arc<dyn LedgerReader> =
            Arc::new(ChainSnapshotView::of(&*self.ledger.read().await));
        let mut registry = Arc::clone(&self.contracts).lock_owned().await;
        let address = address.to_string();
        tokio::task::spawn_blocking(move || registry.execute(&address, view, params))
            .await
            .map_err(|e| ChainError::Internal(format!("contract task failed: {}", e)))?
    }

    pub async fn contract(&self, address: &str) -> Option<SmartContract> {
        self.contracts.lock().await.get(address).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::network::testing::{MockPeers, PeerBehavior};
    use crate::persistence::InMemoryPersistence;
    use crate::transaction::Transaction;
    use serde_json::json;
    use std::time::Duration;

    fn config() -> Config {
        Config {
            chain: ChainConfig {
                difficulty: 2,
                ..ChainConfig::default()
            },
            ..Config::default()
        }
    }

    fn node_with(peers: Arc<MockPeers>) -> (Node, InMemoryPersistence) {
        let store = InMemoryPersistence::new();
        (Node::new(config(), peers, Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_mine_credits_reward_plus_gas() {
        tokio::time::timeout(Duration::from_secs(20), async {
            let (node, store) = node_with(Arc::new(MockPeers::new()));
            node.mine("alice").await.unwrap();
            node.submit_transaction("alice", "bob", 0.5).await.unwrap();

            let block = node.mine("carol").await.unwrap();
            assert_eq!(block.index, 3);
            assert_eq!(block.transactions.len(), 2);
            let reward = &block.transactions[1];
            assert_eq!(reward.sender, "0");
            assert!((reward.amount - (1.0 + 0.5 * 0.01)).abs() < 1e-12);

            assert!((node.get_balance("alice").await - (1.0 - 0.505)).abs() < 1e-12);
            assert_eq!(node.pending_transactions().await, 0);
            assert!(node.is_valid().await);
            assert_eq!(store.load().unwrap().unwrap().chain.len(), 3);
        })
        .await
        .expect("test_mine_credits_reward_plus_gas timed out");
    }

    /// A proof search that appends a competing block before returning its
    /// (now stale) answer, for the first `races` calls.
    fn racing_solver(
        ledger: Arc<RwLock<Blockchain>>,
        races: usize,
    ) -> Arc<dyn Fn(u64, usize) -> u64 + Send + Sync> {
        let calls = std::sync::atomic::AtomicUsize::new(0);
        Arc::new(move |prev_proof, difficulty| {
            if calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < races {
                let mut ledger = ledger.blocking_write();
                let tip = ledger.get_prev_block().clone();
                let proof = miner::solve(tip.proof, difficulty);
                ledger.create_block(proof, tip.hash().unwrap());
            }
            miner::solve(prev_proof, difficulty)
        })
    }

    #[tokio::test]
    async fn test_mine_retries_on_new_tip_without_losing_transactions() {
        tokio::time::timeout(Duration::from_secs(20), async {
            let (node, _) = node_with(Arc::new(MockPeers::new()));
            node.mine("alice").await.unwrap();
            node.submit_transaction("alice", "bob", 0.5).await.unwrap();

            let solver = racing_solver(Arc::clone(node.ledger()), 1);
            let block = node.mine_with("carol", solver).await.unwrap();

            let chain = node.get_chain().await.chain;
            assert_eq!(chain.len(), 4);
            assert_eq!(block.index, 4);
            assert_eq!(block.prev_hash, chain[2].hash().unwrap());
            assert!(node.is_valid().await);

            // The competing block took the pending transfer; it is not mined twice.
            let transfers = chain
                .iter()
                .flat_map(|b| &b.transactions)
                .filter(|tx| tx.sender == "alice" && tx.receiver == "bob")
                .count();
            assert_eq!(transfers, 1);
            assert_eq!(block.transactions, vec![Transaction::system_reward("carol", 1.0)]);
            assert_eq!(node.pending_transactions().await, 0);
        })
        .await
        .expect("test_mine_retries_on_new_tip timed out");
    }

    #[tokio::test]
    async fn test_mine_gives_up_when_tip_keeps_moving() {
        tokio::time::timeout(Duration::from_secs(20), async {
            let (node, _) = node_with(Arc::new(MockPeers::new()));
            let solver = racing_solver(Arc::clone(node.ledger()), MAX_MINING_ATTEMPTS);

            assert_eq!(node.mine_with("carol", solver).await, Err(ChainError::StaleTip));
            assert_eq!(node.get_chain().await.length, 1 + MAX_MINING_ATTEMPTS);
            assert_eq!(node.get_balance("carol").await, 0.0);
            assert_eq!(node.pending_transactions().await, 0);
            assert!(node.is_valid().await);
        })
        .await
        .expect("test_mine_gives_up timed out");
    }

    #[tokio::test]
    async fn test_overlapping_saves_keep_latest_snapshot() {
        tokio::time::timeout(Duration::from_secs(20), async {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(JsonFileStore::new(dir.path().join("blockchain.json")));
            let node = Arc::new(Node::new(
                config(),
                Arc::new(MockPeers::new()),
                Arc::clone(&store) as Arc<dyn SnapshotStore>,
            ));

            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let node = Arc::clone(&node);
                    tokio::spawn(async move { node.register_node(&format!("10.0.0.{}:5000", i)).await })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            let saved = store.load().unwrap().unwrap();
            assert_eq!(saved.nodes.len(), 16);
            assert_eq!(saved, node.ledger().read().await.snapshot());
        })
        .await
        .expect("test_overlapping_saves timed out");
    }

    #[tokio::test]
    async fn test_mine_requires_miner_address() {
        let (node, _) = node_with(Arc::new(MockPeers::new()));
        assert_eq!(
            node.mine("  ").await.unwrap_err(),
            ChainError::InvalidField("miner_address".into())
        );
    }

    #[tokio::test]
    async fn test_concurrent_mining_produces_one_block_each() {
        tokio::time::timeout(Duration::from_secs(30), async {
            let (node, _) = node_with(Arc::new(MockPeers::new()));
            let node = Arc::new(node);
            let mut handles = Vec::new();
            for miner in ["a", "b", "c", "d"] {
                let node = Arc::clone(&node);
                handles.push(tokio::spawn(async move { node.mine(miner).await }));
            }
            for handle in handles {
                handle.await.unwrap().unwrap();
            }
            let chain = node.get_chain().await;
            assert_eq!(chain.length, 5);
            assert!(node.is_valid().await);
            for block in &chain.chain[1..] {
                assert_eq!(block.transactions.len(), 1);
            }
        })
        .await
        .expect("test_concurrent_mining timed out");
    }

    #[tokio::test]
    async fn test_submit_broadcasts_to_peers_and_skips_unreachable() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let peers = Arc::new(MockPeers::new());
            peers.set("up:5000", PeerBehavior::Serve(Vec::new()));
            peers.set("down:5000", PeerBehavior::Unreachable);
            let (node, _) = node_with(Arc::clone(&peers));
            node.register_nodes(&["http://up:5000".into(), "down:5000".into()])
                .await
                .unwrap();
            node.mine("alice").await.unwrap();

            assert_eq!(node.submit_transaction("alice", "bob", 0.25).await, Ok(3));
            let received = peers.received.lock().unwrap().clone();
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].0, "up:5000");
            assert_eq!(received[0].1.receiver, "bob");
        })
        .await
        .expect("test_submit_broadcasts timed out");
    }

    #[tokio::test]
    async fn test_register_nodes_returns_sorted_locations() {
        let (node, _) = node_with(Arc::new(MockPeers::new()));
        let nodes = node
            .register_nodes(&["http://b:1".into(), "a:2".into(), "http://b:1/x".into()])
            .await
            .unwrap();
        assert_eq!(nodes, vec!["a:2".to_string(), "b:1".to_string()]);
        assert!(node.register_node("").await.is_err());
    }

    #[tokio::test]
    async fn test_load_chain_without_snapshot_keeps_genesis() {
        let (node, _) = node_with(Arc::new(MockPeers::new()));
        assert_eq!(node.load_chain().await, Ok(false));
        assert_eq!(node.get_chain().await.length, 1);
    }

    #[tokio::test]
    async fn test_contract_round_trip_reads_ledger() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let (node, _) = node_with(Arc::new(MockPeers::new()));
            node.mine("alice").await.unwrap();
            let address = node
                .deploy_contract(
                    "state[\"seen\"] = blockchain.get_block_number();\nresult = blockchain.get_balance(sender);",
                    "alice",
                )
                .await
                .unwrap();

            let params = json!({"sender": "alice"}).as_object().cloned().unwrap();
            let outcome = node.execute_contract(&address, params).await.unwrap();
            assert_eq!(outcome.state["seen"], json!(2));
            assert_eq!(outcome.result, Some(json!(1.0)));
            assert!(node.contract(&address).await.unwrap().last_execution.is_some());
        })
        .await
        .expect("test_contract_round_trip timed out");
    }
}
