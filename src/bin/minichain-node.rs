//! Runs a Minichain node: loads `config.toml`, restores the saved chain,
//! starts background sync and serves the HTTP routes.

use std::sync::Arc;
use minichain::api::run_api_server;
use minichain::config::load_config;
use minichain::network::OfflinePeers;
use minichain::node::{init_tracing, Node};
use minichain::sync::spawn_sync_loop;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = load_config()?;
    let sync_interval = config.network.sync_interval();

    // No peer transport ships with the crate; registered peers are skipped.
    let node = Arc::new(Node::open(config, Arc::new(OfflinePeers)).await?);
    let sync = spawn_sync_loop(Arc::clone(&node), sync_interval);

    info!("Starting Minichain node");
    let served = run_api_server(node).await;
    sync.abort();
    served?;
    Ok(())
}
