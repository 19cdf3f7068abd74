use super::chain::{Block, Blockchain};
use crate::error::ChainError;
use crate::miner;
use tracing::{error, info};

/// Check linkage and proof-of-work for every adjacent pair of blocks.
///
/// Stops at the first violation; the error carries the position of the
/// offending block within `chain`.
pub fn validate_chain(chain: &[Block], difficulty: usize) -> Result<(), ChainError> {
    if chain.is_empty() {
        return Err(ChainError::ChainValidationFailure {
            index: 0,
            reason: "chain is empty".to_string(),
        });
    }

    for (position, pair) in chain.windows(2).enumerate() {
        let (prev_block, block) = (&pair[0], &pair[1]);
        let index = position + 1;

        if block.prev_hash != prev_block.hash()? {
            return Err(ChainError::ChainValidationFailure {
                index,
                reason: "hash mismatch".to_string(),
            });
        }

        if !miner::verify(prev_block.proof, block.proof, difficulty) {
            return Err(ChainError::ChainValidationFailure {
                index,
                reason: "proof of work invalid".to_string(),
            });
        }
    }
    Ok(())
}

impl Blockchain {
    /// Validate `chain`, or the local chain when `None`.
    ///
    /// An invalid chain is an expected state, so this reports `false` rather
    /// than an error.
    pub fn is_chain_valid(&self, chain: Option<&[Block]>) -> bool {
        let chain = chain.unwrap_or(&self.chain);
        info!(blocks = chain.len(), "Validating blockchain");
        match validate_chain(chain, self.params.difficulty) {
            Ok(()) => {
                info!("Chain validation successful");
                true
            }
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }
}
