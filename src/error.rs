//! Error types for Minichain

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChainError {
    #[error("Transaction amount must be positive")]
    InvalidAmount,
    #[error("Insufficient funds: {user} has {balance}, needs {required}")]
    InsufficientFunds {
        user: String,
        balance: f64,
        required: f64,
    },
    #[error("Transaction {0} already processed")]
    DuplicateTransaction(String),
    #[error("Invalid chain at block {index}: {reason}")]
    ChainValidationFailure { index: usize, reason: String },
    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },
    #[error("Contract syntax error: {0}")]
    ContractSyntaxError(String),
    #[error("Prohibited operation: {0}")]
    ContractSecurityViolation(String),
    #[error("Contract execution timed out after {0} ms")]
    ContractTimeout(u64),
    #[error("Contract execution failed: {0}")]
    ContractExecutionFailed(String),
    #[error("Contract not found: {0}")]
    ContractNotFound(String),
    #[error("Missing or invalid field: {0}")]
    InvalidField(String),
    #[error("Persistence error: {0}")]
    PersistenceError(String),
    #[error("Chain tip changed while mining")]
    StaleTip,
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChainError {
    pub fn peer_unreachable(peer: impl Into<String>, reason: impl ToString) -> Self {
        ChainError::PeerUnreachable {
            peer: peer.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::PersistenceError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::PersistenceError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
