use super::chain::{Block, Blockchain};
use tracing::debug;

/// Replay `chain` and compute `user`'s balance.
///
/// Every send debits `amount + gas`, every receipt credits `amount`. Nothing
/// is cached; the cost is linear in the number of transactions on the chain.
pub fn replay_balance(chain: &[Block], user: &str) -> f64 {
    let mut balance = 0.0;
    for tx in chain.iter().flat_map(|block| block.transactions.iter()) {
        if tx.sender == user {
            balance -= tx.total_debit();
        } else if tx.receiver == user {
            balance += tx.amount;
        }
    }
    balance
}

impl Blockchain {
    pub fn get_user_balance(&self, user: &str) -> f64 {
        let balance = replay_balance(&self.chain, user);
        debug!(user, balance, "Calculated balance");
        balance
    }
}
