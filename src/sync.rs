//! Background chain synchronization
//!
//! Periodically runs consensus against the registered peers so a node catches
//! up without an explicit `replace_chain` call.

use crate::node::Node;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Spawn the sync loop. The first round runs one `interval` after the call.
/// Abort the returned handle to stop it.
pub fn spawn_sync_loop(node: Arc<Node>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs_f64(), "Chain sync loop started");

        loop {
            ticker.tick().await;
            if node.replace_chain().await {
                info!("Sync adopted a longer chain from a peer");
            } else {
                debug!("Sync round finished, local chain kept");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Blockchain;
    use crate::config::{ChainConfig, Config};
    use crate::miner;
    use crate::network::testing::{MockPeers, PeerBehavior};
    use crate::persistence::InMemoryPersistence;

    #[tokio::test]
    async fn test_sync_loop_adopts_peer_chain() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let params = ChainConfig {
                difficulty: 2,
                ..ChainConfig::default()
            };
            let mut remote = Blockchain::new(params.clone());
            for _ in 0..3 {
                let prev = remote.get_prev_block().clone();
                let proof = miner::solve(prev.proof, 2);
                remote.create_block(proof, prev.hash().unwrap());
            }

            let peers = Arc::new(MockPeers::new());
            peers.set("peer:5000", PeerBehavior::Serve(remote.chain().to_vec()));
            let config = Config {
                chain: params,
                ..Config::default()
            };
            let node = Arc::new(Node::new(config, peers, Arc::new(InMemoryPersistence::new())));
            node.register_node("peer:5000").await.unwrap();

            let handle = spawn_sync_loop(Arc::clone(&node), Duration::from_millis(50));
            while node.get_chain().await.length < 4 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            handle.abort();
            assert_eq!(node.get_chain().await.chain, remote.chain());
        })
        .await
        .expect("sync loop never adopted the peer chain");
    }
}
