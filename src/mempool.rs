//! Pending transaction pool and the processed-transaction index
//!
//! The mempool is drained wholesale into each new block. The processed set
//! remembers the fingerprint of every transaction ever accepted, so replays
//! are rejected even after the original has been mined.

use crate::transaction::Transaction;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct Mempool {
    transactions: Vec<Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_transactions(transactions: Vec<Transaction>) -> Self {
        Self { transactions }
    }

    pub fn add_transaction(&mut self, tx: Transaction) {
        self.transactions.push(tx);
    }

    pub fn get_all_transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Sum of gas over all pending transactions.
    pub fn total_gas(&self) -> f64 {
        self.transactions.iter().map(|tx| tx.gas).sum()
    }

    /// Take every pending transaction, leaving the pool empty.
    pub fn drain(&mut self) -> Vec<Transaction> {
        std::mem::take(&mut self.transactions)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessedTransactions {
    hashes: HashSet<String>,
}

impl ProcessedTransactions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.hashes.contains(hash)
    }

    /// Record a fingerprint. Returns false if it was already present.
    pub fn insert(&mut self, hash: String) -> bool {
        self.hashes.insert(hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Fingerprints in sorted order, for stable snapshots.
    pub fn to_sorted_vec(&self) -> Vec<String> {
        let mut hashes: Vec<String> = self.hashes.iter().cloned().collect();
        hashes.sort();
        hashes
    }
}

impl FromIterator<String> for ProcessedTransactions {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            hashes: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_empties_pool() {
        let mut pool = Mempool::new();
        pool.add_transaction(Transaction::new("a", "b", 1.0, 0.01));
        pool.add_transaction(Transaction::new("a", "c", 2.0, 0.01));
        assert!((pool.total_gas() - 0.03).abs() < 1e-12);

        let drained = pool.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].receiver, "b");
        assert!(pool.is_empty());
        assert_eq!(pool.total_gas(), 0.0);
    }

    #[test]
    fn test_processed_set_rejects_repeat() {
        let mut processed = ProcessedTransactions::new();
        assert!(processed.insert("abc".to_string()));
        assert!(!processed.insert("abc".to_string()));
        assert!(processed.contains("abc"));
        assert_eq!(processed.len(), 1);
    }
}
