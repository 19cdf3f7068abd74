//! Canonical content hashing for blocks and transactions.
//!
//! Structures are serialized to JSON with keys in sorted order and digested
//! with SHA-256. The hex digest is used both for block linkage and for the
//! transaction fingerprints that back mempool de-duplication.

use crate::blockchain::Block;
use crate::error::ChainError;
use crate::transaction::Transaction;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Serialize `value` with sorted keys.
///
/// Going through `serde_json::Value` sorts object keys, since the default
/// `serde_json::Map` is ordered.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, ChainError> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&value)?)
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn content_hash<T: Serialize>(value: &T) -> Result<String, ChainError> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}

pub fn hash_block(block: &Block) -> Result<String, ChainError> {
    content_hash(block)
}

pub fn hash_transaction(tx: &Transaction) -> Result<String, ChainError> {
    content_hash(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
        assert_eq!(canonical_json(&a).unwrap(), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn test_field_change_changes_hash() {
        let tx = Transaction::system_reward("alice", 1.0);
        let mut changed = tx.clone();
        changed.amount = 1.5;
        assert_ne!(
            hash_transaction(&tx).unwrap(),
            hash_transaction(&changed).unwrap()
        );
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        let digest = sha256_hex(b"abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
