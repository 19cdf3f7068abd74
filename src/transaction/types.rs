//! Transaction types for Minichain
use crate::error::ChainError;
use crate::hashing::hash_transaction;
use serde::{Deserialize, Serialize};

/// Sender identity used for mining rewards; exempt from balance checks and gas.
pub const SYSTEM_SENDER: &str = "0";

/// A value transfer between two identities. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: String,
    pub receiver: String,
    pub amount: f64,
    pub gas: f64,
}

impl Transaction {
    /// Build a transaction, charging `amount * gas_fee` unless the sender is the system.
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        amount: f64,
        gas_fee: f64,
    ) -> Self {
        let sender = sender.into();
        let gas = if sender == SYSTEM_SENDER {
            0.0
        } else {
            amount * gas_fee
        };
        Transaction {
            sender,
            receiver: receiver.into(),
            amount,
            gas,
        }
    }

    pub fn system_reward(receiver: impl Into<String>, amount: f64) -> Self {
        Transaction::new(SYSTEM_SENDER, receiver, amount, 0.0)
    }

    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }

    /// What the sender pays: the amount plus gas.
    pub fn total_debit(&self) -> f64 {
        self.amount + self.gas
    }

    /// Canonical content hash, used as the de-duplication fingerprint.
    pub fn hash(&self) -> Result<String, ChainError> {
        hash_transaction(self)
    }
}
