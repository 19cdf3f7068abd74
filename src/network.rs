//! Peer set and the abstract peer request/response interface
//!
//! No transport ships with the crate. Embedders implement [`PeerClient`]
//! over whatever they use to reach other nodes; [`NetworkNode`] bounds every
//! call with a timeout and turns failures into logged, skipped peers.

use crate::blockchain::Block;
use crate::error::ChainError;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use url::Url;

/// A peer's answer to a chain request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainResponse {
    pub chain: Vec<Block>,
    pub length: usize,
}

/// Request/response calls a node makes against its peers.
#[async_trait::async_trait]
pub trait PeerClient: Send + Sync {
    /// Ask `peer` for its full chain and length.
    async fn fetch_chain(&self, peer: &str) -> Result<ChainResponse, ChainError>;

    /// Hand `tx` to `peer` for inclusion in its mempool.
    async fn send_transaction(&self, peer: &str, tx: &Transaction) -> Result<(), ChainError>;
}

/// Set of unique peer network locations (`host:port`). Unordered.
#[derive(Debug, Clone, Default)]
pub struct NodeSet {
    nodes: HashSet<String>,
}

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize `address` to its network location and insert it.
    pub fn add(&mut self, address: &str) -> Result<String, ChainError> {
        let location = parse_node_address(address)?;
        self.nodes.insert(location.clone());
        Ok(location)
    }

    pub fn contains(&self, location: &str) -> bool {
        self.nodes.contains(location)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.nodes.iter()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.nodes.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl FromIterator<String> for NodeSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

/// Extract `host[:port]` from a URL such as `http://127.0.0.1:5001/`.
/// Bare `host:port` strings are accepted as well.
pub fn parse_node_address(address: &str) -> Result<String, ChainError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(ChainError::InvalidField("address".to_string()));
    }

    let parsed = if address.contains("://") {
        Url::parse(address)
    } else {
        Url::parse(&format!("http://{}", address))
    }
    .map_err(|e| ChainError::InvalidField(format!("address: {}", e)))?;

    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ChainError::InvalidField("address: missing host".to_string()))?;

    Ok(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Timeout-bounded access to peers through a [`PeerClient`].
#[derive(Clone)]
pub struct NetworkNode {
    client: Arc<dyn PeerClient>,
    timeout: Duration,
}

impl NetworkNode {
    pub fn new(client: Arc<dyn PeerClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch a peer's chain. Transport failures and timeouts become `PeerUnreachable`.
    pub async fn fetch_chain(&self, peer: &str) -> Result<ChainResponse, ChainError> {
        match tokio::time::timeout(self.timeout, self.client.fetch_chain(peer)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ChainError::peer_unreachable(peer, e)),
            Err(_) => Err(ChainError::peer_unreachable(peer, "request timed out")),
        }
    }

    async fn send_transaction(&self, peer: &str, tx: &Transaction) -> Result<(), ChainError> {
        match tokio::time::timeout(self.timeout, self.client.send_transaction(peer, tx)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ChainError::peer_unreachable(peer, e)),
            Err(_) => Err(ChainError::peer_unreachable(peer, "request timed out")),
        }
    }

    /// Best-effort fan-out of `tx` to every peer. Returns how many accepted it.
    pub async fn broadcast_transaction(&self, peers: Vec<String>, tx: &Transaction) -> usize {
        let mut tasks = JoinSet::new();
        for peer in peers {
            let net = self.clone();
            let tx = tx.clone();
            tasks.spawn(async move {
                let outcome = net.send_transaction(&peer, &tx).await;
                (peer, outcome)
            });
        }

        let mut delivered = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((peer, Ok(()))) => {
                    debug!(peer = %peer, "Transaction broadcast delivered");
                    delivered += 1;
                }
                Ok((_, Err(e))) => warn!("Could not broadcast transaction: {}", e),
                Err(e) => warn!("Broadcast task failed: {}", e),
            }
        }
        delivered
    }
}

/// Peer client for a node that runs without a transport. Every request fails
/// as unreachable, so registered peers are logged and skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflinePeers;

#[async_trait::async_trait]
impl PeerClient for OfflinePeers {
    async fn fetch_chain(&self, peer: &str) -> Result<ChainResponse, ChainError> {
        Err(ChainError::peer_unreachable(peer, "no transport configured"))
    }

    async fn send_transaction(&self, peer: &str, _tx: &Transaction) -> Result<(), ChainError> {
        Err(ChainError::peer_unreachable(peer, "no transport configured"))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory peers for tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Clone)]
    pub enum PeerBehavior {
        Serve(Vec<Block>),
        Unreachable,
        Hang,
    }

    #[derive(Default)]
    pub struct MockPeers {
        peers: Mutex<HashMap<String, PeerBehavior>>,
        pub received: Mutex<Vec<(String, Transaction)>>,
    }

    impl MockPeers {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, peer: &str, behavior: PeerBehavior) {
            self.peers.lock().unwrap().insert(peer.to_string(), behavior);
        }

        fn behavior(&self, peer: &str) -> PeerBehavior {
            self.peers
                .lock()
                .unwrap()
                .get(peer)
                .cloned()
                .unwrap_or(PeerBehavior::Unreachable)
        }
    }

    #[async_trait::async_trait]
    impl PeerClient for MockPeers {
        async fn fetch_chain(&self, peer: &str) -> Result<ChainResponse, ChainError> {
            match self.behavior(peer) {
                PeerBehavior::Serve(chain) => Ok(ChainResponse {
                    length: chain.len(),
                    chain,
                }),
                PeerBehavior::Unreachable => Err(ChainError::peer_unreachable(peer, "connection refused")),
                PeerBehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ChainError::peer_unreachable(peer, "hung"))
                }
            }
        }

        async fn send_transaction(&self, peer: &str, tx: &Transaction) -> Result<(), ChainError> {
            match self.behavior(peer) {
                PeerBehavior::Serve(_) => {
                    self.received.lock().unwrap().push((peer.to_string(), tx.clone()));
                    Ok(())
                }
                PeerBehavior::Unreachable => Err(ChainError::peer_unreachable(peer, "connection refused")),
                PeerBehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{MockPeers, PeerBehavior};
    use super::*;

    #[test]
    fn test_parse_url_keeps_network_location() {
        assert_eq!(
            parse_node_address("http://127.0.0.1:5001").unwrap(),
            "127.0.0.1:5001"
        );
        assert_eq!(
            parse_node_address("https://peer.example:8443/get_chain").unwrap(),
            "peer.example:8443"
        );
        assert_eq!(parse_node_address("10.0.0.2:5000").unwrap(), "10.0.0.2:5000");
    }

    #[test]
    fn test_parse_rejects_empty_address() {
        assert!(matches!(
            parse_node_address("  "),
            Err(ChainError::InvalidField(_))
        ));
    }

    #[test]
    fn test_node_set_is_unique() {
        let mut nodes = NodeSet::new();
        nodes.add("http://127.0.0.1:5001").unwrap();
        nodes.add("127.0.0.1:5001").unwrap();
        nodes.add("http://127.0.0.1:5002/").unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.contains("127.0.0.1:5002"));
    }

    #[tokio::test]
    async fn test_broadcast_skips_failing_peers() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let peers = Arc::new(MockPeers::new());
            peers.set("a:1", PeerBehavior::Serve(Vec::new()));
            peers.set("b:1", PeerBehavior::Unreachable);
            peers.set("c:1", PeerBehavior::Hang);
            let net = NetworkNode::new(peers.clone(), Duration::from_millis(100));

            let tx = Transaction::new("alice", "bob", 1.0, 0.01);
            let delivered = net
                .broadcast_transaction(vec!["a:1".into(), "b:1".into(), "c:1".into()], &tx)
                .await;

            assert_eq!(delivered, 1);
            let received = peers.received.lock().unwrap();
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].0, "a:1");
        })
        .await
        .expect("test_broadcast_skips_failing_peers timed out");
    }

    #[tokio::test]
    async fn test_fetch_chain_times_out() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let peers = Arc::new(MockPeers::new());
            peers.set("slow:1", PeerBehavior::Hang);
            let net = NetworkNode::new(peers, Duration::from_millis(50));
            let err = net.fetch_chain("slow:1").await.unwrap_err();
            assert!(matches!(err, ChainError::PeerUnreachable { ref peer, .. } if peer == "slow:1"));
        })
        .await
        .expect("test_fetch_chain_times_out timed out");
    }
}
