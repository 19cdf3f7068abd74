use crate::config::ChainConfig;
use crate::error::ChainError;
use crate::hashing::hash_block;
use crate::mempool::{Mempool, ProcessedTransactions};
use crate::network::NodeSet;
use crate::transaction::{required_balance, validate_amount, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Proof recorded in the genesis block.
pub const GENESIS_PROOF: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: String,
    pub transactions: Vec<Transaction>,
    pub proof: u64,
    pub prev_hash: String,
}

impl Block {
    pub fn new(index: u64, transactions: Vec<Transaction>, proof: u64, prev_hash: String) -> Self {
        Block {
            index,
            timestamp: chrono::Utc::now().to_rfc3339(),
            transactions,
            proof,
            prev_hash,
        }
    }

    pub fn hash(&self) -> Result<String, ChainError> {
        hash_block(self)
    }
}

/// The ledger: chain, mempool, processed-transaction index and peer set.
///
/// The chain is never empty; construction installs the genesis block and
/// wholesale replacement only ever installs non-empty chains.
#[derive(Debug, Clone)]
pub struct Blockchain {
    pub(crate) chain: Vec<Block>,
    pub(crate) mempool: Mempool,
    pub(crate) processed: ProcessedTransactions,
    pub(crate) nodes: NodeSet,
    pub(crate) params: ChainConfig,
}

impl Blockchain {
    pub fn new(params: ChainConfig) -> Self {
        info!(difficulty = params.difficulty, "Initializing new blockchain");
        let mut blockchain = Blockchain {
            chain: Vec::new(),
            mempool: Mempool::new(),
            processed: ProcessedTransactions::new(),
            nodes: NodeSet::new(),
            params,
        };
        let genesis_prev_hash = blockchain.genesis_prev_hash();
        blockchain.create_block(GENESIS_PROOF, genesis_prev_hash);
        blockchain
    }

    /// Sentinel `prev_hash` of the genesis block: `difficulty` zero characters.
    pub fn genesis_prev_hash(&self) -> String {
        "0".repeat(self.params.difficulty)
    }

    pub fn params(&self) -> &ChainConfig {
        &self.params
    }

    pub fn difficulty(&self) -> usize {
        self.params.difficulty
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn processed_transactions(&self) -> &ProcessedTransactions {
        &self.processed
    }

    pub fn nodes(&self) -> &NodeSet {
        &self.nodes
    }

    /// Register a peer; returns its normalized network location.
    pub fn add_node(&mut self, address: &str) -> Result<String, ChainError> {
        let location = self.nodes.add(address)?;
        info!(node = %location, "Added new node");
        Ok(location)
    }

    /// Index the next mined block will receive.
    pub fn next_index(&self) -> u64 {
        self.chain.len() as u64 + 1
    }

    /// Drain the mempool into a new block at the next index and append it.
    ///
    /// Destructive: the pending transactions move into the block.
    pub fn create_block(&mut self, proof: u64, prev_hash: String) -> Block {
        info!(proof, "Creating new block");
        let block = Block::new(self.next_index(), self.mempool.drain(), proof, prev_hash);
        self.chain.push(block.clone());
        info!(index = block.index, txs = block.transactions.len(), "Block created successfully");
        block
    }

    pub fn get_prev_block(&self) -> &Block {
        &self.chain[self.chain.len() - 1]
    }

    /// Validate and queue a transaction, returning the accepted transaction.
    pub fn accept_transaction(
        &mut self,
        sender: &str,
        receiver: &str,
        amount: f64,
    ) -> Result<Transaction, ChainError> {
        if let Err(e) = validate_amount(amount) {
            warn!(amount, "Invalid transaction: amount must be positive");
            return Err(e);
        }

        let tx = Transaction::new(sender, receiver, amount, self.params.gas_fee);
        if !tx.is_system() {
            let balance = self.get_user_balance(sender);
            let required = required_balance(amount, self.params.gas_fee);
            if balance < required {
                warn!(user = sender, balance, required, "Transaction failed: insufficient balance");
                return Err(ChainError::InsufficientFunds {
                    user: sender.to_string(),
                    balance,
                    required,
                });
            }
        }

        let tx_hash = tx.hash()?;
        if self.processed.contains(&tx_hash) {
            warn!(hash = %tx_hash, "Transaction already processed");
            return Err(ChainError::DuplicateTransaction(tx_hash));
        }

        self.mempool.add_transaction(tx.clone());
        self.processed.insert(tx_hash);
        info!(sender, receiver, amount, "Added transaction");
        Ok(tx)
    }

    /// Queue a transaction and return the index of the block expected to include it.
    pub fn add_transaction(
        &mut self,
        sender: &str,
        receiver: &str,
        amount: f64,
    ) -> Result<u64, ChainError> {
        self.accept_transaction(sender, receiver, amount)?;
        Ok(self.next_index())
    }

    /// Queue the system reward for the block about to be mined.
    ///
    /// Rewards skip the balance and duplicate checks: two blocks mined by the
    /// same miner at the same reward carry identical reward transactions.
    pub fn queue_reward(&mut self, miner: &str, amount: f64) -> Result<Transaction, ChainError> {
        validate_amount(amount)?;
        let tx = Transaction::system_reward(miner, amount);
        self.mempool.add_transaction(tx.clone());
        info!(miner, amount, "Queued mining reward");
        Ok(tx)
    }

    /// Install a replacement chain wholesale. Empty chains are refused.
    pub(crate) fn adopt_chain(&mut self, chain: Vec<Block>) -> bool {
        if chain.is_empty() {
            debug!("Refusing to adopt an empty chain");
            return false;
        }
        self.chain = chain;
        true
    }
}
