//! Snapshot persistence for Minichain
//!
//! A snapshot holds exactly the chain, the peer list, the mempool and the
//! processed-transaction fingerprints. All four round-trip; in particular
//! the de-duplication history survives a reload.

use crate::blockchain::{Block, Blockchain};
use crate::error::ChainError;
use crate::mempool::{Mempool, ProcessedTransactions};
use crate::network::NodeSet;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub chain: Vec<Block>,
    pub nodes: Vec<String>,
    pub mempool: Vec<Transaction>,
    pub processed_transactions: Vec<String>,
}

/// Abstraction for snapshot storage backends.
pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &Snapshot) -> Result<(), ChainError>;

    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<Snapshot>, ChainError>;
}

impl Blockchain {
    pub fn snapshot(&self) -> Snapshot {
        let mut nodes = self.nodes.to_vec();
        nodes.sort();
        Snapshot {
            chain: self.chain.clone(),
            nodes,
            mempool: self.mempool.get_all_transactions().to_vec(),
            processed_transactions: self.processed.to_sorted_vec(),
        }
    }

    /// Replace ledger state with `snapshot`. An empty snapshot chain is rejected
    /// and the current state is kept.
    pub fn restore(&mut self, snapshot: Snapshot) -> Result<(), ChainError> {
        if snapshot.chain.is_empty() {
            return Err(ChainError::PersistenceError(
                "snapshot contains an empty chain".to_string(),
            ));
        }
        self.chain = snapshot.chain;
        self.mempool = Mempool::from_transactions(snapshot.mempool);
        self.processed = snapshot.processed_transactions.into_iter().collect::<ProcessedTransactions>();
        self.nodes = snapshot.nodes.into_iter().collect::<NodeSet>();
        Ok(())
    }
}

/// JSON file backend. Each write goes to its own uniquely named temp file in
/// the same directory and is renamed into place, so concurrent saves never
/// share a temp path.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonFileStore {
    fn save(&self, snapshot: &Snapshot) -> Result<(), ChainError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let json = serde_json::to_vec(snapshot)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        info!(path = %self.path.display(), "Chain saved successfully");
        Ok(())
    }

    fn load(&self) -> Result<Option<Snapshot>, ChainError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "Nonexistent blockchain snapshot");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        info!(path = %self.path.display(), blocks = snapshot.chain.len(), "Chain loaded successfully");
        Ok(Some(snapshot))
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    pub snapshot: Arc<Mutex<Option<Snapshot>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemoryPersistence {
    fn save(&self, snapshot: &Snapshot) -> Result<(), ChainError> {
        let mut slot = self
            .snapshot
            .lock()
            .map_err(|_| ChainError::PersistenceError("Mutex poisoned".to_string()))?;
        *slot = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<Snapshot>, ChainError> {
        let slot = self
            .snapshot
            .lock()
            .map_err(|_| ChainError::PersistenceError("Mutex poisoned".to_string()))?;
        Ok(slot.clone())
    }
}
