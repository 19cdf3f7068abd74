//! Longest-valid-chain reconciliation against the peer set
//!
//! Peers are polled in the set's (unspecified) iteration order. The first
//! peer whose chain is strictly longer than the local one and passes
//! validation wins; there is no tie-break and no quorum, so two runs
//! against the same peers may adopt different qualifying chains.

use crate::blockchain::{validate_chain, Blockchain};
use crate::network::NetworkNode;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct ConsensusResolver {
    network: NetworkNode,
}

impl ConsensusResolver {
    pub fn new(network: NetworkNode) -> Self {
        Self { network }
    }

    /// Replace the local chain with the first strictly longer valid peer chain.
    ///
    /// Peers are fetched without holding the ledger lock. Unreachable or
    /// misbehaving peers are logged and skipped. Returns whether the chain
    /// was replaced.
    pub async fn replace_chain(&self, ledger: &RwLock<Blockchain>) -> bool {
        let (peers, difficulty, mut max_len) = {
            let ledger = ledger.read().await;
            (ledger.nodes().to_vec(), ledger.difficulty(), ledger.len())
        };

        for peer in peers {
            let response = match self.network.fetch_chain(&peer).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Failed to connect to node: {}", e);
                    continue;
                }
            };

            if response.length != response.chain.len() {
                warn!(
                    peer = %peer,
                    reported = response.length,
                    actual = response.chain.len(),
                    "Peer reported a length that does not match its chain"
                );
                continue;
            }
            if response.length <= max_len {
                continue;
            }
            if let Err(e) = validate_chain(&response.chain, difficulty) {
                warn!(peer = %peer, "Rejected peer chain: {}", e);
                continue;
            }

            let mut ledger = ledger.write().await;
            // The local chain may have grown while the lock was released.
            max_len = max_len.max(ledger.len());
            if response.length > max_len && ledger.adopt_chain(response.chain) {
                info!(peer = %peer, length = response.length, "Chain replaced with longer chain from node");
                return true;
            }
        }

        info!("Chain replacement not needed - current chain is longest");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Block;
    use crate::config::ChainConfig;
    use crate::miner;
    use crate::network::testing::{MockPeers, PeerBehavior};
    use std::sync::Arc;
    use std::time::Duration;

    fn params() -> ChainConfig {
        ChainConfig {
            difficulty: 2,
            ..ChainConfig::default()
        }
    }

    fn grow(chain: &mut Blockchain, blocks: usize, miner_address: &str) {
        for _ in 0..blocks {
            chain
                .add_transaction("0", miner_address, chain.len() as f64)
                .unwrap();
            let prev = chain.get_prev_block().clone();
            let proof = miner::solve(prev.proof, chain.difficulty());
            chain.create_block(proof, prev.hash().unwrap());
        }
    }

    fn valid_chain(len: usize) -> Vec<Block> {
        let mut chain = Blockchain::new(params());
        grow(&mut chain, len - 1, "peer-miner");
        chain.chain().to_vec()
    }

    fn resolver(peers: Arc<MockPeers>) -> ConsensusResolver {
        ConsensusResolver::new(NetworkNode::new(peers, Duration::from_millis(200)))
    }

    #[tokio::test]
    async fn test_adopts_longer_valid_chain_despite_unreachable_peer() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let remote = valid_chain(5);
            let peers = Arc::new(MockPeers::new());
            peers.set("a:5000", PeerBehavior::Serve(remote.clone()));
            peers.set("b:5000", PeerBehavior::Unreachable);

            let mut local = Blockchain::new(params());
            local.add_node("http://a:5000").unwrap();
            local.add_node("http://b:5000").unwrap();
            let ledger = RwLock::new(local);

            assert!(resolver(peers).replace_chain(&ledger).await);
            let ledger = ledger.read().await;
            assert_eq!(ledger.chain(), remote.as_slice());
            assert!(ledger.is_chain_valid(None));
        })
        .await
        .expect("test_adopts_longer_valid_chain timed out");
    }

    #[tokio::test]
    async fn test_keeps_local_chain_when_peers_are_shorter() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let peers = Arc::new(MockPeers::new());
            peers.set("a:5000", PeerBehavior::Serve(valid_chain(2)));

            let mut local = Blockchain::new(params());
            grow(&mut local, 3, "me");
            local.add_node("a:5000").unwrap();
            let before = local.chain().to_vec();
            let ledger = RwLock::new(local);

            assert!(!resolver(peers).replace_chain(&ledger).await);
            assert_eq!(ledger.read().await.chain(), before.as_slice());
        })
        .await
        .expect("test_keeps_local_chain timed out");
    }

    #[tokio::test]
    async fn test_rejects_longer_invalid_chain() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let mut forged = valid_chain(4);
            forged[1].transactions.clear();
            let peers = Arc::new(MockPeers::new());
            peers.set("a:5000", PeerBehavior::Serve(forged));

            let mut local = Blockchain::new(params());
            local.add_node("a:5000").unwrap();
            let ledger = RwLock::new(local);

            assert!(!resolver(peers).replace_chain(&ledger).await);
            assert_eq!(ledger.read().await.len(), 1);
        })
        .await
        .expect("test_rejects_longer_invalid_chain timed out");
    }

    #[tokio::test]
    async fn test_equal_length_chain_is_not_adopted() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let peers = Arc::new(MockPeers::new());
            peers.set("a:5000", PeerBehavior::Serve(valid_chain(3)));

            let mut local = Blockchain::new(params());
            grow(&mut local, 2, "me");
            local.add_node("a:5000").unwrap();
            let ledger = RwLock::new(local);

            assert!(!resolver(peers).replace_chain(&ledger).await);
        })
        .await
        .expect("test_equal_length_chain_is_not_adopted timed out");
    }

    #[tokio::test]
    async fn test_hanging_peer_is_bounded_by_timeout() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let peers = Arc::new(MockPeers::new());
            peers.set("slow:5000", PeerBehavior::Hang);

            let mut local = Blockchain::new(params());
            local.add_node("slow:5000").unwrap();
            let ledger = RwLock::new(local);

            assert!(!resolver(peers).replace_chain(&ledger).await);
        })
        .await
        .expect("hanging peer blocked consensus");
    }
}
