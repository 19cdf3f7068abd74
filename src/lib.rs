//! Minichain - a minimal proof-of-work ledger with longest-chain consensus
//! and sandboxed smart contracts
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Blockchain
//! - [`blockchain`] - Blocks, the ledger, balance replay and chain validation
//! - [`transaction`] - Transaction type, gas and amount checks
//! - [`mempool`] - Pending transactions and the processed-transaction index
//! - [`hashing`] - Canonical JSON hashing
//!
//! ## Consensus & Mining
//! - [`miner`] - Proof-of-work puzzle
//! - [`consensus`] - Longest valid chain resolution
//!
//! ## Contracts
//! - [`contract`] - Contract language, interpreter and watchdog execution
//!
//! ## State Management
//! - [`persistence`] - Snapshots and snapshot stores
//!
//! ## Networking & Integration
//! - [`network`] - Peer set and the abstract peer interface
//! - [`sync`] - Background chain synchronization
//! - [`node`] - The node service
//! - `api` - HTTP routes (feature `api`)
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Blockchain
// ============================================================================
pub mod blockchain;
pub mod hashing;
pub mod mempool;
pub mod transaction;

// ============================================================================
// Consensus & Mining
// ============================================================================
pub mod consensus;
pub mod miner;

// ============================================================================
// Contracts
// ============================================================================
pub mod contract;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;

// ============================================================================
// Networking
// ============================================================================
pub mod network;
pub mod node;
pub mod sync;

// ============================================================================
// Integration
// ============================================================================
#[cfg(feature = "api")]
pub mod api;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;

pub use error::{ChainError, Result};
